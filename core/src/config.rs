//! Configuration management for v2t.
//!
//! Handles loading, saving, validating and providing defaults for the
//! provider configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::orchestrator::{AttemptPolicy, Backoff};
use crate::provider::{ApiFlavor, RemoteApiSettings, WhisperCliSettings};
use crate::routing::RoutingRule;

/// Main configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider used when no routing rule matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    /// Explicit failover order. Empty means every enabled provider by priority.
    pub fallback_chain: Vec<String>,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub batch: BatchConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
    /// Evaluated in order; the first match picks the primary provider.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routing: Vec<RoutingRule>,
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// One `[providers.<name>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend type tag: `whisper_cpp`, `openai` or `whisper_server`.
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    /// Lower is tried earlier.
    pub priority: u32,
    pub timeout_secs: u64,
    /// Concurrent attempts against this provider. 0 means unlimited.
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_secs: f64,
    pub auth: AuthConfig,
    /// Type-specific settings, checked against the type tag at validation.
    pub settings: toml::Table,
}

/// Credentials for remote providers. Values may reference `${ENV}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Backoff shape shared by all providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_multiplier: f64,
    pub max_backoff_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_timeout_secs: u64,
    /// How long a probe result is trusted.
    pub cache_ttl_secs: u64,
    /// Background re-probe interval during batch runs. 0 disables the monitor.
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub parallelism: usize,
    pub max_count: usize,
    pub extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// JSON-lines outcome log. Defaults to the XDG data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Convert inputs to 16 kHz mono WAV before transcription.
    pub normalize: bool,
    pub ffmpeg: String,
    pub ffprobe: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: LogLevel,
    /// Also write logs to the state directory.
    pub file: bool,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive covering the workspace crates.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "v2t_core=error,v2t_cli=error",
            LogLevel::Warn => "v2t_core=warn,v2t_cli=warn",
            LogLevel::Info => "v2t_core=info,v2t_cli=info",
            LogLevel::Debug => "v2t_core=debug,v2t_cli=debug",
            LogLevel::Trace => "v2t_core=trace,v2t_cli=trace",
        }
    }
}

/// Typed settings, one variant per provider type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    WhisperCpp(WhisperCliSettings),
    OpenAi(RemoteApiSettings),
    WhisperServer(RemoteApiSettings),
}

impl ProviderSettings {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ProviderSettings::WhisperCpp(_) => "whisper_cpp",
            ProviderSettings::OpenAi(_) => "openai",
            ProviderSettings::WhisperServer(_) => "whisper_server",
        }
    }

    /// Resolve the free-form settings table against the type tag.
    ///
    /// `${VAR}` references are expanded in every string value.
    pub fn resolve(name: &str, config: &ProviderConfig) -> Result<Self, ConfigError> {
        let mut table = toml::Value::Table(config.settings.clone());
        expand_value(&mut table);

        match config.kind.as_str() {
            "whisper_cpp" => Ok(ProviderSettings::WhisperCpp(typed(name, table)?)),
            "openai" | "whisper_server" => {
                let mut settings: RemoteApiSettings = typed(name, table)?;
                if let Some(key) = &config.auth.api_key {
                    settings.api_key = Some(expand_env(key));
                }
                if let Some(url) = &config.auth.base_url {
                    settings.base_url = Some(expand_env(url));
                }
                Ok(if config.kind == "openai" {
                    ProviderSettings::OpenAi(settings)
                } else {
                    ProviderSettings::WhisperServer(settings)
                })
            }
            other => Err(ConfigError::UnknownProviderType {
                name: name.to_string(),
                kind: other.to_string(),
            }),
        }
    }

    pub fn api_flavor(&self) -> Option<ApiFlavor> {
        match self {
            ProviderSettings::WhisperCpp(_) => None,
            ProviderSettings::OpenAi(_) => Some(ApiFlavor::OpenAi),
            ProviderSettings::WhisperServer(_) => Some(ApiFlavor::WhisperServer),
        }
    }
}

/// A validated provider entry, ready to be constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub policy: AttemptPolicy,
    pub settings: ProviderSettings,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();

        let mut whisper = toml::Table::new();
        whisper.insert(
            "binary_path".into(),
            "${WHISPER_CPP_BINARY:-whisper-cli}".into(),
        );
        whisper.insert(
            "model_path".into(),
            "${WHISPER_CPP_MODEL:-models/ggml-large-v3.bin}".into(),
        );
        whisper.insert("language".into(), "auto".into());
        providers.insert(
            "whisper_cpp".to_string(),
            ProviderConfig {
                kind: "whisper_cpp".to_string(),
                settings: whisper,
                ..ProviderConfig::default()
            },
        );

        let mut openai = toml::Table::new();
        openai.insert("model".into(), "whisper-1".into());
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                kind: "openai".to_string(),
                enabled: false,
                priority: 10,
                timeout_secs: 120,
                auth: AuthConfig {
                    api_key: Some("${OPENAI_API_KEY}".to_string()),
                    base_url: None,
                },
                settings: openai,
                ..ProviderConfig::default()
            },
        );

        Self {
            default_provider: Some("whisper_cpp".to_string()),
            fallback_chain: vec!["whisper_cpp".to_string(), "openai".to_string()],
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            batch: BatchConfig::default(),
            media: MediaConfig::default(),
            logging: LoggingConfig::default(),
            routing: Vec::new(),
            providers,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            enabled: true,
            priority: 0,
            timeout_secs: 300,
            max_concurrency: 0,
            max_attempts: 3,
            retry_backoff_secs: 1.0,
            auth: AuthConfig::default(),
            settings: toml::Table::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_multiplier: 2.0,
            max_backoff_secs: 30.0,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 5,
            cache_ttl_secs: 60,
            check_interval_secs: 300,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: 2,
            max_count: 100,
            extension: "mp3".to_string(),
            output_dir: None,
            records_path: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            work_dir: None,
        }
    }
}

impl ProviderConfig {
    fn policy(&self, retry: &RetryConfig) -> AttemptPolicy {
        AttemptPolicy {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_attempts: self.max_attempts,
            backoff: Backoff {
                base: secs_f64(self.retry_backoff_secs),
                multiplier: retry.backoff_multiplier,
                max: secs_f64(retry.max_backoff_secs),
            },
            max_concurrency: self.max_concurrency,
        }
    }
}

impl Config {
    /// Returns the default config file path.
    /// `~/.config/v2t/providers.toml`
    pub fn config_path() -> Result<PathBuf> {
        v2t_common::dirs::config_path()
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file as TOML")
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Check the document and resolve every provider's typed settings.
    ///
    /// Returned specs are ordered by priority, then name.
    pub fn validate(&self) -> Result<Vec<ProviderSpec>, ConfigError> {
        let mut specs = Vec::with_capacity(self.providers.len());
        for (name, provider) in &self.providers {
            if provider.max_attempts == 0 {
                return Err(ConfigError::InvalidSetting {
                    name: name.clone(),
                    reason: "max_attempts must be at least 1".to_string(),
                });
            }
            if !(provider.retry_backoff_secs.is_finite() && provider.retry_backoff_secs >= 0.0) {
                return Err(ConfigError::InvalidSetting {
                    name: name.clone(),
                    reason: "retry_backoff_secs must be a non-negative number".to_string(),
                });
            }
            specs.push(ProviderSpec {
                name: name.clone(),
                enabled: provider.enabled,
                priority: provider.priority,
                policy: provider.policy(&self.retry),
                settings: ProviderSettings::resolve(name, provider)?,
            });
        }

        if !specs.iter().any(|s| s.enabled) {
            return Err(ConfigError::NoProviderEnabled);
        }

        if let Some(default) = &self.default_provider {
            match self.providers.get(default) {
                None => return Err(ConfigError::UnknownDefault(default.clone())),
                Some(p) if !p.enabled => {
                    return Err(ConfigError::DefaultDisabled(default.clone()));
                }
                Some(_) => {}
            }
        }

        for name in &self.fallback_chain {
            self.ensure_known("fallback_chain", name)?;
        }
        for rule in &self.routing {
            self.ensure_known("routing rule", rule.provider())?;
        }

        specs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(specs)
    }

    fn ensure_known(&self, context: &str, name: &str) -> Result<(), ConfigError> {
        if self.providers.contains_key(name) {
            Ok(())
        } else {
            Err(ConfigError::UnknownReference {
                context: context.to_string(),
                name: name.to_string(),
            })
        }
    }
}

fn typed<T: DeserializeOwned>(name: &str, value: toml::Value) -> Result<T, ConfigError> {
    value.try_into().map_err(|e: toml::de::Error| ConfigError::InvalidSetting {
        name: name.to_string(),
        reason: e.message().to_string(),
    })
}

fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn expand_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_env(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_value(v)),
        _ => {}
    }
}

/// Expand `${VAR}` and `${VAR:-default}` from the process environment.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// [`expand_env`] with a custom variable lookup.
pub fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let expr = &after[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };
        let value = lookup(name).filter(|v| !v.is_empty());
        out.push_str(&value.unwrap_or_else(|| default.unwrap_or_default().to_string()));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
