//! Routing, retry and failover across registered providers.
//!
//! A request walks its provider chain strictly in order. Each attempt runs
//! under a per-attempt timeout; a retryable failure is retried on the same
//! provider with exponential backoff until that provider's attempt budget is
//! spent, anything else advances the chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, OrchestratorError, RegistryError, TranscriptionError};
use crate::health::HealthChecker;
use crate::metrics::ProviderMetrics;
use crate::provider::{Provider, TranscriptionRequest, TranscriptionResult};
use crate::registry::Registry;
use crate::routing::{Router, RoutingHints};

/// Exponential backoff between attempts on the same provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay after the `attempt`-th failed attempt (1-based): `base * multiplier^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Per-provider execution limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptPolicy {
    pub timeout: Duration,
    /// Total attempts on one provider, at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Concurrent attempts allowed; 0 means unlimited.
    pub max_concurrency: usize,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_attempts: 3,
            backoff: Backoff::default(),
            max_concurrency: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

enum AttemptError {
    Failed(TranscriptionError),
    Cancelled,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    router: Router,
    health: Arc<HealthChecker>,
    metrics: Arc<ProviderMetrics>,
    default_policy: AttemptPolicy,
    policies: HashMap<String, AttemptPolicy>,
    limits: HashMap<String, Arc<Semaphore>>,
    counters: Counters,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        router: Router,
        health: Arc<HealthChecker>,
        metrics: Arc<ProviderMetrics>,
    ) -> Self {
        Self {
            registry,
            router,
            health,
            metrics,
            default_policy: AttemptPolicy::default(),
            policies: HashMap::new(),
            limits: HashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Policy for providers without their own.
    pub fn with_default_policy(mut self, policy: AttemptPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_policy(mut self, provider: &str, policy: AttemptPolicy) -> Self {
        if policy.max_concurrency > 0 {
            self.limits.insert(
                provider.to_string(),
                Arc::new(Semaphore::new(policy.max_concurrency)),
            );
        } else {
            self.limits.remove(provider);
        }
        self.policies.insert(provider.to_string(), policy);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            total_requests: self.counters.total.load(Ordering::Relaxed),
            successful_requests: self.counters.succeeded.load(Ordering::Relaxed),
            failed_requests: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// The chain that would be tried for a request, in order.
    pub async fn recommend(&self, hints: &RoutingHints) -> Vec<String> {
        self.router
            .chain(&self.registry, &self.health, hints, None)
            .await
    }

    /// Execute with hints derived from the request and the input file.
    pub async fn execute(
        &self,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, OrchestratorError> {
        let hints = RoutingHints::from_request(request).await;
        self.execute_with_hints(request, &hints, cancel).await
    }

    pub async fn execute_with_hints(
        &self,
        request: &TranscriptionRequest,
        hints: &RoutingHints,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, OrchestratorError> {
        let chain = self
            .router
            .chain(&self.registry, &self.health, hints, None)
            .await;
        self.run_chain(chain, request, cancel).await
    }

    /// Execute with `name` forced to the front of the chain.
    pub async fn execute_with_provider(
        &self,
        name: &str,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, OrchestratorError> {
        if !self.registry.contains(name) {
            return Err(RegistryError::NotFound(name.to_string()).into());
        }
        if !self.registry.is_enabled(name) {
            return Err(RegistryError::DisabledProvider(name.to_string()).into());
        }
        let hints = RoutingHints::from_request(request).await;
        let chain = self
            .router
            .chain(&self.registry, &self.health, &hints, Some(name))
            .await;
        self.run_chain(chain, request, cancel).await
    }

    async fn run_chain(
        &self,
        chain: Vec<String>,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, OrchestratorError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let outcome = self.walk_chain(chain, request, cancel).await;
        match &outcome {
            Ok(_) => self.counters.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.failed.fetch_add(1, Ordering::Relaxed),
        };
        outcome
    }

    async fn walk_chain(
        &self,
        chain: Vec<String>,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, OrchestratorError> {
        if chain.is_empty() {
            warn!(input = %request.input.display(), "No provider available");
            return Err(OrchestratorError::NoProviderAvailable);
        }

        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<TranscriptionError> = None;

        for name in chain {
            let provider = match self.registry.get(&name) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Skipping provider");
                    continue;
                }
            };
            let policy = self.policy(&name);
            tried.push(name.clone());

            let mut attempt = 0u32;
            loop {
                attempt += 1;
                debug!(provider = %name, attempt, "Attempting transcription");

                match self
                    .attempt(&name, provider.as_ref(), &policy, request, cancel)
                    .await
                {
                    Ok(mut result) => {
                        result.provider = name.clone();
                        info!(
                            provider = %name,
                            attempt,
                            input = %request.input.display(),
                            "Transcription succeeded"
                        );
                        return Ok(result);
                    }
                    Err(AttemptError::Cancelled) => {
                        info!(provider = %name, "Transcription cancelled");
                        return Err(OrchestratorError::Cancelled { tried });
                    }
                    Err(AttemptError::Failed(err)) => {
                        let retry = err.retryable && attempt < policy.max_attempts;
                        warn!(
                            provider = %name,
                            attempt,
                            code = %err.code,
                            retryable = err.retryable,
                            error = %err.message,
                            "Attempt failed"
                        );
                        last_error = Some(err);
                        if !retry {
                            break;
                        }

                        let delay = policy.backoff.delay(attempt);
                        debug!(provider = %name, delay_ms = delay.as_millis() as u64, "Backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(OrchestratorError::Cancelled { tried });
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        match last_error {
            Some(last) => Err(OrchestratorError::Exhausted { last, tried }),
            None => Err(OrchestratorError::NoProviderAvailable),
        }
    }

    async fn attempt(
        &self,
        name: &str,
        provider: &dyn Provider,
        policy: &AttemptPolicy,
        request: &TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, AttemptError> {
        let _permit = match self.limits.get(name) {
            Some(semaphore) => tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
            },
            None => None,
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.metrics
                    .record_failure(name, started.elapsed(), ErrorCode::Cancelled);
                return Err(AttemptError::Cancelled);
            }
            outcome = tokio::time::timeout(policy.timeout, provider.transcribe(request)) => outcome,
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(result)) => {
                self.metrics
                    .record_success(name, elapsed, result.audio_duration);
                Ok(result)
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(name, elapsed, err.code);
                Err(AttemptError::Failed(err))
            }
            Err(_) => {
                self.metrics
                    .record_failure(name, elapsed, ErrorCode::Timeout);
                Err(AttemptError::Failed(TranscriptionError::new(
                    name,
                    ErrorCode::Timeout,
                    format!("attempt timed out after {:?}", policy.timeout),
                )))
            }
        }
    }

    fn policy(&self, name: &str) -> AttemptPolicy {
        let mut policy = self
            .policies
            .get(name)
            .copied()
            .unwrap_or(self.default_policy);
        policy.max_attempts = policy.max_attempts.max(1);
        policy
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
