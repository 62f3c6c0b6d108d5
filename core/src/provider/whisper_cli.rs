//! whisper.cpp command-line backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    AudioFormat, CapabilityDescriptor, Features, Provider, ProviderKind, Requirements,
    TranscriptionRequest, TranscriptionResult,
};
use crate::error::{ErrorCode, TranscriptionError};

const LANGUAGES: [&str; 20] = [
    "zh", "en", "ja", "ko", "es", "fr", "de", "it", "pt", "ru", "ar", "hi", "th", "vi", "tr",
    "pl", "nl", "sv", "da", "no",
];

/// Settings for a `whisper_cpp` provider entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperCliSettings {
    /// Executable name (looked up on `PATH`) or path.
    pub binary_path: String,
    pub model_path: PathBuf,
    /// Language passed with `-l` when the request has none.
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub threads: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for WhisperCliSettings {
    fn default() -> Self {
        Self {
            binary_path: "whisper-cli".to_string(),
            model_path: PathBuf::from("models/ggml-large-v3.bin"),
            language: Some("auto".to_string()),
            prompt: None,
            threads: None,
            extra_args: Vec::new(),
        }
    }
}

/// Runs a whisper.cpp binary once per request and reads the transcript from stdout.
pub struct WhisperCliProvider {
    capabilities: CapabilityDescriptor,
    settings: WhisperCliSettings,
}

impl WhisperCliProvider {
    pub fn new(name: impl Into<String>, settings: WhisperCliSettings) -> Self {
        let mut capabilities = CapabilityDescriptor::new(
            name,
            "Whisper.cpp (local)",
            ProviderKind::Local,
            [
                AudioFormat::Wav,
                AudioFormat::Mp3,
                AudioFormat::M4a,
                AudioFormat::Flac,
            ],
        );
        capabilities.languages = LANGUAGES.iter().map(|l| l.to_string()).collect();
        capabilities.features = Features {
            timestamps: true,
            language_detection: true,
            ..Features::default()
        };
        capabilities.requirements = Requirements {
            local_binary: true,
            ..Requirements::default()
        };
        capabilities.default_model = model_label(&settings.model_path);
        capabilities.typical_latency_ms = 5000;

        Self {
            capabilities,
            settings,
        }
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> TranscriptionError {
        TranscriptionError::new(&self.capabilities.name, code, message)
    }

    fn command(&self, request: &TranscriptionRequest, model: &Path) -> Command {
        let mut cmd = Command::new(&self.settings.binary_path);
        cmd.arg("-m")
            .arg(model)
            .arg("-f")
            .arg(&request.input)
            .arg("-nt")
            .arg("-np");

        let language = request
            .language_hint()
            .or(self.settings.language.as_deref());
        if let Some(language) = language {
            cmd.arg("-l").arg(language);
        }
        if let Some(prompt) = request.prompt.as_ref().or(self.settings.prompt.as_ref()) {
            cmd.arg("--prompt").arg(prompt);
        }
        if let Some(threads) = self.settings.threads {
            cmd.arg("-t").arg(threads.to_string());
        }
        cmd.args(&self.settings.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Provider for WhisperCliProvider {
    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let started = Instant::now();

        if !tokio::fs::try_exists(&request.input).await.unwrap_or(false) {
            return Err(self.error(
                ErrorCode::FileNotFound,
                format!("input not found: {}", request.input.display()),
            ));
        }
        match AudioFormat::from_path(&request.input) {
            Some(format) if self.capabilities.supports_format(format) => {}
            _ => {
                return Err(self.error(
                    ErrorCode::UnsupportedFormat,
                    format!("unsupported input: {}", request.input.display()),
                ));
            }
        }

        let model = request
            .model
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.settings.model_path.clone());

        debug!(
            binary = %self.settings.binary_path,
            model = %model.display(),
            input = %request.input.display(),
            "Running whisper.cpp"
        );

        let output = self
            .command(request, &model)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => self.error(
                    ErrorCode::BinaryNotFound,
                    format!("{} not found", self.settings.binary_path),
                ),
                _ => self.error(ErrorCode::ProcessFailed, format!("failed to spawn: {e}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.trim().lines().last().unwrap_or_default().to_string();
            return Err(self.error(
                ErrorCode::ProcessFailed,
                format!("exited with {}: {}", output.status, tail),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return Err(self.error(ErrorCode::EmptyTranscription, "no speech recognized"));
        }

        let processing_time = started.elapsed();
        info!(
            provider = %self.capabilities.name,
            chars = text.len(),
            elapsed_ms = processing_time.as_millis() as u64,
            "whisper.cpp transcription completed"
        );

        let mut result = TranscriptionResult::new(&self.capabilities.name, text);
        result.language = request.language_hint().map(str::to_string);
        result.processing_time = processing_time;
        result.model = model_label(&model);
        Ok(result)
    }

    async fn health_check(&self) -> Result<(), TranscriptionError> {
        if resolve_binary(&self.settings.binary_path).is_none() {
            return Err(self.error(
                ErrorCode::BinaryNotFound,
                format!("{} not found", self.settings.binary_path),
            ));
        }
        if !tokio::fs::try_exists(&self.settings.model_path)
            .await
            .unwrap_or(false)
        {
            return Err(self.error(
                ErrorCode::FileNotFound,
                format!("model not found: {}", self.settings.model_path.display()),
            ));
        }
        Ok(())
    }
}

fn model_label(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Locate an executable either by explicit path or on `PATH`.
fn resolve_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|p| p.is_file())
}

#[cfg(test)]
#[path = "whisper_cli_test.rs"]
mod tests;
