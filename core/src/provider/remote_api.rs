//! OpenAI-compatible multipart transcription backend.
//!
//! Serves both the hosted OpenAI endpoint and a self-hosted whisper.cpp
//! server. The two only differ in defaults and in whether a bearer token
//! is mandatory.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    AudioFormat, CapabilityDescriptor, Features, Provider, ProviderKind, Requirements,
    ResponseFormat, Segment, TranscriptionRequest, TranscriptionResult, Word,
};
use crate::error::{ConfigError, ErrorCode, TranscriptionError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 200;

/// Which service the endpoint speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    OpenAi,
    WhisperServer,
}

/// Settings for `openai` and `whisper_server` provider entries.
///
/// Unset fields fall back to per-flavor defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteApiSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub transcription_path: Option<String>,
    pub health_path: Option<String>,
    pub response_format: Option<ResponseFormat>,
    pub max_file_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

pub struct RemoteApiProvider {
    capabilities: CapabilityDescriptor,
    client: reqwest::Client,
    endpoint: String,
    health_url: String,
    api_key: Option<String>,
    model: Option<String>,
    response_format: ResponseFormat,
}

impl RemoteApiProvider {
    pub fn new(
        name: impl Into<String>,
        flavor: ApiFlavor,
        settings: RemoteApiSettings,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let api_key = settings.api_key.filter(|k| !k.trim().is_empty());
        if flavor == ApiFlavor::OpenAi && api_key.is_none() {
            return Err(ConfigError::MissingSetting {
                name,
                setting: "api_key".to_string(),
            });
        }

        let (default_url, default_path, default_health) = match flavor {
            ApiFlavor::OpenAi => ("https://api.openai.com/v1", "/audio/transcriptions", "/models"),
            ApiFlavor::WhisperServer => ("http://127.0.0.1:8080", "/inference", "/"),
        };
        let base_url = settings
            .base_url
            .unwrap_or_else(|| default_url.to_string());
        reqwest::Url::parse(&base_url).map_err(|e| ConfigError::InvalidSetting {
            name: name.clone(),
            reason: format!("base_url '{base_url}': {e}"),
        })?;
        let base_url = base_url.trim_end_matches('/');
        let endpoint = join_url(
            base_url,
            settings.transcription_path.as_deref().unwrap_or(default_path),
        );
        let health_url = join_url(
            base_url,
            settings.health_path.as_deref().unwrap_or(default_health),
        );

        let mut headers = HeaderMap::new();
        for (key, value) in &settings.headers {
            let header_name =
                HeaderName::from_bytes(key.as_bytes()).map_err(|e| ConfigError::InvalidSetting {
                    name: name.clone(),
                    reason: format!("header '{key}': {e}"),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidSetting {
                    name: name.clone(),
                    reason: format!("header '{key}': {e}"),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: name.clone(),
                reason: format!("http client: {e}"),
            })?;

        let capabilities = match flavor {
            ApiFlavor::OpenAi => openai_descriptor(&name, settings.max_file_size_mb),
            ApiFlavor::WhisperServer => {
                whisper_server_descriptor(&name, settings.max_file_size_mb, api_key.is_some())
            }
        };
        let model = settings.model.or_else(|| capabilities.default_model.clone());

        Ok(Self {
            capabilities,
            client,
            endpoint,
            health_url,
            api_key,
            model,
            response_format: settings
                .response_format
                .unwrap_or(ResponseFormat::VerboseJson),
        })
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> TranscriptionError {
        TranscriptionError::new(&self.capabilities.name, code, message)
    }

    fn status_error(&self, status: StatusCode, body: &str) -> TranscriptionError {
        let body: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
        let message = format!("HTTP {status}: {body}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.error(ErrorCode::AuthenticationFailed, message)
            }
            StatusCode::TOO_MANY_REQUESTS => self.error(ErrorCode::RateLimited, message),
            StatusCode::PAYLOAD_TOO_LARGE => self.error(ErrorCode::FileTooLarge, message),
            s => self
                .error(ErrorCode::ApiError, message)
                .with_retryable(s.is_server_error()),
        }
    }

    async fn build_form(&self, request: &TranscriptionRequest) -> Result<Form, TranscriptionError> {
        let metadata = tokio::fs::metadata(&request.input).await.map_err(|e| {
            self.error(
                ErrorCode::FileNotFound,
                format!("{}: {e}", request.input.display()),
            )
        })?;
        let format = AudioFormat::from_path(&request.input)
            .filter(|f| self.capabilities.supports_format(*f))
            .ok_or_else(|| {
                self.error(
                    ErrorCode::UnsupportedFormat,
                    format!("unsupported input: {}", request.input.display()),
                )
            })?;
        if !self.capabilities.accepts_size(metadata.len()) {
            return Err(self.error(
                ErrorCode::FileTooLarge,
                format!(
                    "{} bytes exceeds {} MB limit",
                    metadata.len(),
                    self.capabilities.max_file_size_mb
                ),
            ));
        }

        let bytes = tokio::fs::read(&request.input)
            .await
            .map_err(|e| self.error(ErrorCode::InvalidInput, format!("read failed: {e}")))?;
        let file_name = request
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("audio.{format}"));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(format.mime_type())
            .map_err(|e| self.error(ErrorCode::InvalidInput, format!("mime: {e}")))?;

        let response_format = request.response_format.unwrap_or(self.response_format);
        let mut form = Form::new()
            .part("file", part)
            .text("response_format", response_format.as_str());
        if let Some(model) = request.model.clone().or_else(|| self.model.clone()) {
            form = form.text("model", model);
        }
        if let Some(language) = request.language_hint() {
            form = form.text("language", language.to_string());
        }
        if let Some(prompt) = request.prompt.clone() {
            form = form.text("prompt", prompt);
        }
        if let Some(temperature) = request.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        for (key, value) in &request.options {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form = form.text(key.clone(), value);
        }
        Ok(form)
    }
}

#[async_trait]
impl Provider for RemoteApiProvider {
    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let started = Instant::now();
        let form = self.build_form(request).await?;

        debug!(
            provider = %self.capabilities.name,
            endpoint = %self.endpoint,
            input = %request.input.display(),
            "Uploading audio"
        );

        let mut builder = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| self.error(ErrorCode::RequestFailed, format!("request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.error(ErrorCode::RequestFailed, format!("body: {e}")))?;
        if !status.is_success() {
            return Err(self.status_error(status, &body));
        }

        let format = request.response_format.unwrap_or(self.response_format);
        let mut result = match format {
            ResponseFormat::Json | ResponseFormat::VerboseJson => {
                let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| {
                    self.error(ErrorCode::ResponseParseFailed, format!("invalid JSON: {e}"))
                })?;
                parsed.into_result(&self.capabilities.name)
            }
            ResponseFormat::Text | ResponseFormat::Srt | ResponseFormat::Vtt => {
                TranscriptionResult::new(&self.capabilities.name, body.trim())
            }
        };
        if result.text.trim().is_empty() {
            return Err(self.error(ErrorCode::EmptyTranscription, "empty transcript"));
        }

        result.processing_time = started.elapsed();
        result.model = request.model.clone().or_else(|| self.model.clone());
        if result.language.is_none() {
            result.language = request.language_hint().map(str::to_string);
        }
        info!(
            provider = %self.capabilities.name,
            chars = result.text.len(),
            elapsed_ms = result.processing_time.as_millis() as u64,
            "Remote transcription completed"
        );
        Ok(result)
    }

    async fn health_check(&self) -> Result<(), TranscriptionError> {
        let mut builder = self.client.get(&self.health_url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| self.error(ErrorCode::RequestFailed, format!("probe: {e}")))?;
        let status = response.status();
        if status.is_server_error()
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, &body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<ApiSegment>,
    #[serde(default)]
    words: Vec<ApiWord>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}

impl ApiResponse {
    fn into_result(self, provider: &str) -> TranscriptionResult {
        let mut words: Vec<Word> = self
            .words
            .into_iter()
            .map(|w| Word {
                word: w.word,
                start: w.start,
                end: w.end,
                confidence: None,
            })
            .collect();

        let segments = self
            .segments
            .into_iter()
            .map(|s| {
                let (inside, rest): (Vec<Word>, Vec<Word>) = std::mem::take(&mut words)
                    .into_iter()
                    .partition(|w| w.start >= s.start && w.end <= s.end);
                words = rest;
                Segment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                    confidence: s.avg_logprob.map(|l| l.exp() as f32),
                    words: inside,
                }
            })
            .collect();

        let mut result = TranscriptionResult::new(provider, self.text.trim());
        result.segments = segments;
        result.language = self.language;
        result.audio_duration = self
            .duration
            .and_then(|d| Duration::try_from_secs_f64(d).ok());
        result
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn openai_descriptor(name: &str, max_file_size_mb: Option<u64>) -> CapabilityDescriptor {
    let mut d = CapabilityDescriptor::new(
        name,
        "OpenAI Whisper API",
        ProviderKind::Remote,
        [
            AudioFormat::Mp3,
            AudioFormat::Mp4,
            AudioFormat::M4a,
            AudioFormat::Wav,
            AudioFormat::Webm,
            AudioFormat::Ogg,
            AudioFormat::Flac,
        ],
    );
    d.max_file_size_mb = max_file_size_mb.unwrap_or(25);
    d.features = Features {
        timestamps: true,
        word_level: true,
        language_detection: true,
        ..Features::default()
    };
    d.requirements = Requirements {
        network: true,
        credential: true,
        ..Requirements::default()
    };
    d.default_model = Some("whisper-1".to_string());
    d.models = vec![
        "whisper-1".to_string(),
        "gpt-4o-transcribe".to_string(),
        "gpt-4o-mini-transcribe".to_string(),
    ];
    d.typical_latency_ms = 3000;
    d
}

fn whisper_server_descriptor(
    name: &str,
    max_file_size_mb: Option<u64>,
    credential: bool,
) -> CapabilityDescriptor {
    let mut d = CapabilityDescriptor::new(
        name,
        "Whisper.cpp server",
        ProviderKind::Remote,
        [
            AudioFormat::Wav,
            AudioFormat::Mp3,
            AudioFormat::Flac,
            AudioFormat::Ogg,
        ],
    );
    d.max_file_size_mb = max_file_size_mb.unwrap_or(0);
    d.features = Features {
        timestamps: true,
        language_detection: true,
        ..Features::default()
    };
    d.requirements = Requirements {
        network: true,
        credential,
        ..Requirements::default()
    };
    d.typical_latency_ms = 4000;
    d
}

#[cfg(test)]
#[path = "remote_api_test.rs"]
mod tests;
