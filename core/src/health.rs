//! Provider health probes with a short-lived cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::Provider;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub provider: String,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub response_time: Duration,
}

struct CacheEntry {
    status: HealthStatus,
    at: Instant,
}

/// Probes providers and remembers the outcome for `ttl`.
pub struct HealthChecker {
    cache: RwLock<HashMap<String, CacheEntry>>,
    probe_timeout: Duration,
    ttl: Duration,
}

impl HealthChecker {
    pub fn new(probe_timeout: Duration, ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            probe_timeout,
            ttl,
        }
    }

    /// Cached status if still fresh, otherwise a new probe.
    pub async fn check(&self, provider: &dyn Provider) -> HealthStatus {
        match self.cached_status(provider.name()) {
            Some(status) => status,
            None => self.probe(provider).await,
        }
    }

    /// Probe unconditionally and refresh the cache.
    pub async fn probe(&self, provider: &dyn Provider) -> HealthStatus {
        let name = provider.name().to_string();
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, provider.health_check()).await;
        let response_time = started.elapsed();

        let last_error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.message),
            Err(_) => Some(format!("probe timed out after {:?}", self.probe_timeout)),
        };
        let status = HealthStatus {
            provider: name.clone(),
            healthy: last_error.is_none(),
            checked_at: Utc::now(),
            last_error,
            response_time,
        };
        debug!(
            provider = %name,
            healthy = status.healthy,
            elapsed_ms = response_time.as_millis() as u64,
            "Health probe finished"
        );

        self.cache.write().unwrap_or_else(PoisonError::into_inner).insert(
            name,
            CacheEntry {
                status: status.clone(),
                at: Instant::now(),
            },
        );
        status
    }

    /// Probe every registered provider concurrently.
    pub async fn check_all(&self, registry: &Registry) -> Vec<HealthStatus> {
        let providers: Vec<_> = registry
            .list()
            .iter()
            .filter_map(|name| registry.get(name).ok())
            .collect();
        join_all(providers.iter().map(|p| self.probe(p.as_ref()))).await
    }

    /// Fresh cached status. Never probes.
    pub fn cached_status(&self, name: &str) -> Option<HealthStatus> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(name)
            .filter(|entry| entry.at.elapsed() < self.ttl)
            .map(|entry| entry.status.clone())
    }

    pub fn is_marked_unhealthy(&self, name: &str) -> bool {
        self.cached_status(name).is_some_and(|s| !s.healthy)
    }

    /// Last known status of every probed provider, stale or not.
    pub fn statuses(&self) -> Vec<HealthStatus> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut statuses: Vec<_> = cache.values().map(|e| e.status.clone()).collect();
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }

    /// Re-probe all providers every `interval` until `cancel` fires.
    pub fn spawn_monitor(
        self: &Arc<Self>,
        registry: Arc<Registry>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Health monitor started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for status in checker.check_all(&registry).await {
                            if !status.healthy {
                                warn!(
                                    provider = %status.provider,
                                    error = status.last_error.as_deref().unwrap_or_default(),
                                    "Provider unhealthy"
                                );
                            }
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
