//! Transcription providers.
//!
//! A provider turns one input file into text and is described by exactly one
//! [`CapabilityDescriptor`]. Backends are constructed once at startup and
//! shared through the [`Registry`](crate::registry::Registry).

use async_trait::async_trait;

mod capabilities;
mod remote_api;
mod types;
mod whisper_cli;

pub use capabilities::{AudioFormat, CapabilityDescriptor, Features, ProviderKind, Requirements};
pub use remote_api::{ApiFlavor, RemoteApiProvider, RemoteApiSettings};
pub use types::{ResponseFormat, Segment, TranscriptionRequest, TranscriptionResult, Word};
pub use whisper_cli::{WhisperCliProvider, WhisperCliSettings};

use crate::error::TranscriptionError;

/// Speech-to-text backend.
///
/// Dropping the future returned by [`transcribe`](Provider::transcribe)
/// must abort the underlying work; the orchestrator relies on this for
/// timeouts and cancellation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Static description of what this backend accepts.
    fn capabilities(&self) -> &CapabilityDescriptor;

    /// Transcribe the file referenced by `request`.
    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResult, TranscriptionError>;

    /// Lightweight probe. `Ok(())` means the backend looks usable.
    async fn health_check(&self) -> Result<(), TranscriptionError>;

    fn name(&self) -> &str {
        &self.capabilities().name
    }
}
