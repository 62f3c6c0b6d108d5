//! Name-keyed store of constructed providers.
//!
//! Tracks which provider is the default and a total order among them.
//! Lookups take a read lock only, so they never block each other.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::RegistryError;
use crate::provider::{CapabilityDescriptor, Provider};

struct Entry {
    provider: Arc<dyn Provider>,
    enabled: bool,
    priority: u32,
    /// Registration sequence, breaks priority ties.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    default: Option<String>,
    next_seq: u64,
}

impl Inner {
    fn ordered(&self) -> Vec<(&String, &Entry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, e)| (e.priority, e.seq));
        entries
    }
}

/// Summary row for listing surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderListing {
    pub descriptor: CapabilityDescriptor,
    pub enabled: bool,
    pub priority: u32,
    pub is_default: bool,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled provider ranked after every existing one.
    pub fn register(&self, name: &str, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        let priority = {
            let inner = self.read();
            inner
                .entries
                .values()
                .map(|e| e.priority.saturating_add(1))
                .max()
                .unwrap_or(0)
        };
        self.register_with(name, provider, true, priority)
    }

    /// Register with an explicit enabled flag and priority (lower is tried earlier).
    pub fn register_with(
        &self,
        name: &str,
        provider: Arc<dyn Provider>,
        enabled: bool,
        priority: u32,
    ) -> Result<(), RegistryError> {
        let descriptor = provider.capabilities();
        if let Some(field) = descriptor.missing_field() {
            return Err(RegistryError::InvalidProvider {
                name: name.to_string(),
                reason: format!("descriptor is missing '{field}'"),
            });
        }
        if descriptor.name != name {
            return Err(RegistryError::InvalidProvider {
                name: name.to_string(),
                reason: format!("descriptor is named '{}'", descriptor.name),
            });
        }

        let mut inner = self.write();
        if inner.entries.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            name.to_string(),
            Entry {
                provider,
                enabled,
                priority,
                seq,
            },
        );
        if enabled && inner.default.is_none() {
            inner.default = Some(name.to_string());
        }

        info!(provider = name, enabled, priority, "Registered provider");
        Ok(())
    }

    /// Shared handle to a provider. Always the same instance for a name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, RegistryError> {
        self.read()
            .entries
            .get(name)
            .map(|e| Arc::clone(&e.provider))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let entry = inner
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !entry.enabled {
            return Err(RegistryError::DisabledProvider(name.to_string()));
        }
        if inner.default.as_deref() != Some(name) {
            debug!(provider = name, "Default provider changed");
            inner.default = Some(name.to_string());
        }
        Ok(())
    }

    pub fn default_provider(&self) -> Option<String> {
        self.read().default.clone()
    }

    /// All names in priority order.
    pub fn list(&self) -> Vec<String> {
        self.read()
            .ordered()
            .into_iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn enabled_in_priority_order(&self) -> Vec<String> {
        self.read()
            .ordered()
            .into_iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().entries.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.read().entries.get(name).is_some_and(|e| e.enabled)
    }

    /// Toggle a provider. Disabling the default clears the default marker.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let entry = inner
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entry.enabled = enabled;
        if !enabled && inner.default.as_deref() == Some(name) {
            inner.default = None;
        }
        Ok(())
    }

    pub fn set_priority(&self, name: &str, priority: u32) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let entry = inner
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entry.priority = priority;
        Ok(())
    }

    /// Descriptor snapshot of every provider, in priority order.
    pub fn descriptors(&self) -> Vec<ProviderListing> {
        let inner = self.read();
        inner
            .ordered()
            .into_iter()
            .map(|(name, e)| ProviderListing {
                descriptor: e.provider.capabilities().clone(),
                enabled: e.enabled,
                priority: e.priority,
                is_default: inner.default.as_deref() == Some(name.as_str()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
