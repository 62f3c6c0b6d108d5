//! Per-provider request metrics.
//!
//! Each provider's counters sit behind their own mutex; the outer map is
//! only write-locked the first time a provider is seen.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorCode;

/// Weight kept from the previous average on each update.
const LATENCY_DECAY: f64 = 0.8;

/// Requests needed before a provider can be called most reliable.
const RELIABILITY_MIN_REQUESTS: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderStats {
    pub provider: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_latency: Duration,
    /// Exponentially weighted average, in milliseconds.
    pub average_latency_ms: f64,
    pub total_audio_secs: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub error_breakdown: BTreeMap<ErrorCode, u64>,
}

impl ProviderStats {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Self::default()
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    fn record(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.average_latency_ms = if self.total_requests == 0 {
            ms
        } else {
            self.average_latency_ms * LATENCY_DECAY + ms * (1.0 - LATENCY_DECAY)
        };
        self.total_requests += 1;
        self.total_latency += latency;
        self.last_used = Some(Utc::now());
    }
}

/// Aggregate view across all providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub fastest_provider: Option<String>,
    pub most_reliable_provider: Option<String>,
    pub providers: Vec<ProviderStats>,
}

#[derive(Default)]
pub struct ProviderMetrics {
    providers: RwLock<HashMap<String, Arc<Mutex<ProviderStats>>>>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str, latency: Duration, audio: Option<Duration>) {
        self.update(provider, |stats| {
            stats.record(latency);
            stats.successful_requests += 1;
            if let Some(audio) = audio {
                stats.total_audio_secs += audio.as_secs_f64();
            }
        });
    }

    pub fn record_failure(&self, provider: &str, latency: Duration, code: ErrorCode) {
        self.update(provider, |stats| {
            stats.record(latency);
            stats.failed_requests += 1;
            *stats.error_breakdown.entry(code).or_default() += 1;
        });
    }

    pub fn snapshot(&self, provider: &str) -> Option<ProviderStats> {
        let slot = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()?;
        let stats = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(stats.clone())
    }

    /// Snapshots of every provider seen so far, sorted by name.
    pub fn all(&self) -> Vec<ProviderStats> {
        let slots: Vec<_> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut all: Vec<ProviderStats> = slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    pub fn overall(&self) -> OverallStats {
        let providers = self.all();
        let total_requests: u64 = providers.iter().map(|p| p.total_requests).sum();
        let successful_requests: u64 = providers.iter().map(|p| p.successful_requests).sum();
        let failed_requests: u64 = providers.iter().map(|p| p.failed_requests).sum();

        let fastest_provider = providers
            .iter()
            .filter(|p| p.successful_requests > 0)
            .min_by(|a, b| a.average_latency_ms.total_cmp(&b.average_latency_ms))
            .map(|p| p.provider.clone());
        let most_reliable_provider = providers
            .iter()
            .filter(|p| p.total_requests >= RELIABILITY_MIN_REQUESTS)
            .max_by(|a, b| a.success_rate().total_cmp(&b.success_rate()))
            .map(|p| p.provider.clone());

        OverallStats {
            total_requests,
            successful_requests,
            failed_requests,
            success_rate: if total_requests == 0 {
                0.0
            } else {
                successful_requests as f64 / total_requests as f64
            },
            fastest_provider,
            most_reliable_provider,
            providers,
        }
    }

    fn update(&self, provider: &str, f: impl FnOnce(&mut ProviderStats)) {
        let existing = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut providers = self
                    .providers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                Arc::clone(
                    providers
                        .entry(provider.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(ProviderStats::new(provider)))),
                )
            }
        };
        let mut stats = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
