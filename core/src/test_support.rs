//! Scripted providers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ErrorCode, TranscriptionError};
use crate::provider::{
    AudioFormat, CapabilityDescriptor, Provider, ProviderKind, TranscriptionRequest,
    TranscriptionResult,
};

/// What the next call should do.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(&'static str),
    Retryable,
    Fatal,
    Hang,
    Panic,
}

pub struct ScriptedProvider {
    caps: CapabilityDescriptor,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    health_delay: Duration,
    healthy: bool,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    /// Provider that repeats `step` forever.
    pub fn new(name: &str, step: Step) -> Self {
        Self {
            caps: CapabilityDescriptor::new(name, name, ProviderKind::Local, AudioFormat::ALL),
            script: Mutex::new(VecDeque::new()),
            fallback: step,
            delay: Duration::ZERO,
            health_delay: Duration::ZERO,
            healthy: true,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Run `steps` in order, then fall back to the constructor's step.
    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        *self.script.lock().unwrap() = steps.into_iter().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn with_capabilities(mut self, f: impl FnOnce(&mut CapabilityDescriptor)) -> Self {
        f(&mut self.caps);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.caps
    }

    async fn transcribe(
        &self,
        _request: &TranscriptionRequest,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let name = &self.caps.name;
        let outcome = match step {
            Step::Succeed(text) => Ok(TranscriptionResult::new(name, text)),
            Step::Retryable => Err(TranscriptionError::new(
                name,
                ErrorCode::ProcessFailed,
                "transient",
            )),
            Step::Fatal => Err(TranscriptionError::new(
                name,
                ErrorCode::AuthenticationFailed,
                "fatal",
            )),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted provider panicked"),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn health_check(&self) -> Result<(), TranscriptionError> {
        if !self.health_delay.is_zero() {
            tokio::time::sleep(self.health_delay).await;
        }
        if self.healthy {
            Ok(())
        } else {
            Err(TranscriptionError::new(
                &self.caps.name,
                ErrorCode::RequestFailed,
                "probe failed",
            ))
        }
    }
}
