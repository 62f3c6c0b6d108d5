//! Transcription provider orchestration.
//!
//! Providers are registered in a [`registry::Registry`] together with a
//! capability descriptor. The [`orchestrator::Orchestrator`] picks a chain of
//! candidates through the [`routing::Router`], retries transient failures with
//! backoff and fails over down the chain. [`batch::BatchScheduler`] drives a
//! directory of recordings through it with bounded parallelism.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod repository;
pub mod routing;

#[cfg(test)]
mod test_support;
