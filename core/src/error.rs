//! Error types shared across the registry, orchestrator and scheduler.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Symbolic classification of a failed transcription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    FileNotFound,
    UnsupportedFormat,
    FileTooLarge,
    BinaryNotFound,
    ProcessFailed,
    EmptyTranscription,
    RequestFailed,
    ApiError,
    AuthenticationFailed,
    RateLimited,
    ResponseParseFailed,
    Timeout,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::FileNotFound => "file_not_found",
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::FileTooLarge => "file_too_large",
            ErrorCode::BinaryNotFound => "binary_not_found",
            ErrorCode::ProcessFailed => "process_failed",
            ErrorCode::EmptyTranscription => "empty_transcription",
            ErrorCode::RequestFailed => "request_failed",
            ErrorCode::ApiError => "api_error",
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::ResponseParseFailed => "response_parse_failed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
        }
    }

    /// Whether an error with this code is transient unless the provider says otherwise.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProcessFailed
                | ErrorCode::RequestFailed
                | ErrorCode::ApiError
                | ErrorCode::RateLimited
                | ErrorCode::Timeout
                | ErrorCode::Cancelled
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed attempt against one provider.
///
/// `retryable` is the only field the orchestrator branches on: `true` allows
/// another attempt on the same provider, `false` moves straight to the next
/// provider in the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider}: {message} [{code}]")]
pub struct TranscriptionError {
    pub code: ErrorCode,
    pub message: String,
    pub provider: String,
    pub retryable: bool,
}

impl TranscriptionError {
    /// Create an error whose retryability follows the code's default.
    pub fn new(provider: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: provider.into(),
            retryable: code.is_transient(),
        }
    }

    /// Override the retryable flag.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Misuse of the provider registry. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{0}' is already registered")]
    DuplicateName(String),
    #[error("provider '{name}' is invalid: {reason}")]
    InvalidProvider { name: String, reason: String },
    #[error("provider '{0}' not found")]
    NotFound(String),
    #[error("provider '{0}' is disabled")]
    DisabledProvider(String),
}

/// Startup-time configuration problem. Aborts construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no provider is enabled")]
    NoProviderEnabled,
    #[error("provider '{name}' has unknown type '{kind}'")]
    UnknownProviderType { name: String, kind: String },
    #[error("default provider '{0}' is not configured")]
    UnknownDefault(String),
    #[error("default provider '{0}' is disabled")]
    DefaultDisabled(String),
    #[error("{context} references unknown provider '{name}'")]
    UnknownReference { context: String, name: String },
    #[error("provider '{name}': missing required setting '{setting}'")]
    MissingSetting { name: String, setting: String },
    #[error("provider '{name}': invalid setting: {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Terminal failure of one orchestrated request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no provider available")]
    NoProviderAvailable,
    #[error("all providers failed (tried: {}): {last}", tried.join(", "))]
    Exhausted {
        last: TranscriptionError,
        tried: Vec<String>,
    },
    #[error("transcription cancelled")]
    Cancelled { tried: Vec<String> },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl OrchestratorError {
    /// Providers that were attempted before the request ended.
    pub fn tried(&self) -> &[String] {
        match self {
            OrchestratorError::Exhausted { tried, .. } | OrchestratorError::Cancelled { tried } => {
                tried
            }
            _ => &[],
        }
    }
}

/// Batch setup failure. Raised before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to enumerate {}: {source}", dir.display())]
    Enumerate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parallelism must be at least 1")]
    InvalidParallelism,
}
