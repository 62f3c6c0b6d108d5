//! Routing rules and fallback-chain construction.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::health::HealthChecker;
use crate::provider::{AudioFormat, TranscriptionRequest};
use crate::registry::Registry;

const MB: u64 = 1024 * 1024;

/// Facts about a request used to pick a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHints {
    pub file_size: Option<u64>,
    pub language: Option<String>,
    pub format: Option<AudioFormat>,
}

impl RoutingHints {
    /// Derive hints from the request, reading the file size from disk.
    pub async fn from_request(request: &TranscriptionRequest) -> Self {
        let file_size = tokio::fs::metadata(&request.input)
            .await
            .ok()
            .map(|m| m.len());
        Self {
            file_size,
            language: request.language_hint().map(str::to_string),
            format: AudioFormat::from_path(&request.input),
        }
    }
}

/// A condition mapped to a preferred provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum RoutingRule {
    SizeAbove { mb: u64, provider: String },
    SizeBelow { mb: u64, provider: String },
    Language { language: String, provider: String },
    Format { format: AudioFormat, provider: String },
}

impl RoutingRule {
    pub fn provider(&self) -> &str {
        match self {
            RoutingRule::SizeAbove { provider, .. }
            | RoutingRule::SizeBelow { provider, .. }
            | RoutingRule::Language { provider, .. }
            | RoutingRule::Format { provider, .. } => provider,
        }
    }

    pub fn matches(&self, hints: &RoutingHints) -> bool {
        match self {
            RoutingRule::SizeAbove { mb, .. } => hints.file_size.is_some_and(|s| s > mb * MB),
            RoutingRule::SizeBelow { mb, .. } => hints.file_size.is_some_and(|s| s < mb * MB),
            RoutingRule::Language { language, .. } => hints
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(language)),
            RoutingRule::Format { format, .. } => hints.format == Some(*format),
        }
    }
}

/// Turns routing hints into an ordered list of provider names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Router {
    rules: Vec<RoutingRule>,
    fallback_chain: Vec<String>,
}

impl Router {
    pub fn new(rules: Vec<RoutingRule>, fallback_chain: Vec<String>) -> Self {
        Self {
            rules,
            fallback_chain,
        }
    }

    /// First matching rule naming an enabled provider, else the registry default.
    pub fn primary(&self, registry: &Registry, hints: &RoutingHints) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| rule.matches(hints) && registry.is_enabled(rule.provider()))
            .map(|rule| rule.provider().to_string())
            .or_else(|| registry.default_provider())
    }

    /// Ordered candidates for a request.
    ///
    /// The primary goes first, followed by the explicit fallback chain or,
    /// without one, every enabled provider in priority order. Unknown,
    /// disabled and duplicate names are dropped. Providers that cannot take
    /// the input, then unhealthy providers, are dropped only while something
    /// else remains. Health comes from [`HealthChecker::check`], so a stale
    /// or missing cache entry is checked again here.
    pub async fn chain(
        &self,
        registry: &Registry,
        health: &HealthChecker,
        hints: &RoutingHints,
        forced_primary: Option<&str>,
    ) -> Vec<String> {
        let primary = match forced_primary {
            Some(name) => Some(name.to_string()),
            None => self.primary(registry, hints),
        };
        let rest = if self.fallback_chain.is_empty() {
            registry.enabled_in_priority_order()
        } else {
            self.fallback_chain.clone()
        };

        let mut chain: Vec<String> = Vec::new();
        for name in primary.into_iter().chain(rest) {
            if registry.is_enabled(&name) && !chain.contains(&name) {
                chain.push(name);
            }
        }

        let capable: Vec<String> = chain
            .iter()
            .filter(|name| accepts(registry, name, hints))
            .cloned()
            .collect();
        if !capable.is_empty() {
            chain = capable;
        }

        let checks = chain.iter().map(|name| async move {
            match registry.get(name) {
                Ok(provider) => health.check(provider.as_ref()).await.healthy,
                Err(_) => false,
            }
        });
        let verdicts = join_all(checks).await;
        let healthy: Vec<String> = chain
            .iter()
            .zip(verdicts)
            .filter_map(|(name, healthy)| healthy.then(|| name.clone()))
            .collect();
        if !healthy.is_empty() {
            chain = healthy;
        }

        debug!(chain = ?chain, "Built provider chain");
        chain
    }
}

fn accepts(registry: &Registry, name: &str, hints: &RoutingHints) -> bool {
    let Ok(provider) = registry.get(name) else {
        return false;
    };
    let caps = provider.capabilities();
    hints.format.is_none_or(|f| caps.supports_format(f))
        && hints.file_size.is_none_or(|s| caps.accepts_size(s))
        && hints
            .language
            .as_deref()
            .is_none_or(|l| caps.supports_language(l))
}

#[cfg(test)]
#[path = "routing_test.rs"]
mod tests;
