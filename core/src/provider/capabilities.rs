use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Where a backend does its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
    Hybrid,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Local => "local",
            ProviderKind::Remote => "remote",
            ProviderKind::Hybrid => "hybrid",
        })
    }
}

/// Input container formats a provider may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    M4a,
    Flac,
    Ogg,
    Webm,
    Mp4,
    Amr,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 8] = [
        AudioFormat::Wav,
        AudioFormat::Mp3,
        AudioFormat::M4a,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::Webm,
        AudioFormat::Mp4,
        AudioFormat::Amr,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Webm => "webm",
            AudioFormat::Mp4 => "mp4",
            AudioFormat::Amr => "amr",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Mp4 => "video/mp4",
            AudioFormat::Amr => "audio/amr",
        }
    }

    /// Parse an extension, ignoring case and a leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Optional output features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub timestamps: bool,
    pub word_level: bool,
    pub confidence: bool,
    pub language_detection: bool,
    pub streaming: bool,
}

/// What a provider needs from its environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub network: bool,
    pub credential: bool,
    pub local_binary: bool,
}

/// Declarative description of a provider. Never changes after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub display_name: String,
    pub kind: ProviderKind,
    pub formats: BTreeSet<AudioFormat>,
    /// Empty means every language.
    pub languages: BTreeSet<String>,
    /// 0 means unlimited.
    pub max_file_size_mb: u64,
    /// 0 means unlimited.
    pub max_duration_secs: u64,
    pub features: Features,
    pub requirements: Requirements,
    pub default_model: Option<String>,
    pub models: Vec<String>,
    pub typical_latency_ms: u64,
}

impl CapabilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        kind: ProviderKind,
        formats: impl IntoIterator<Item = AudioFormat>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind,
            formats: formats.into_iter().collect(),
            languages: BTreeSet::new(),
            max_file_size_mb: 0,
            max_duration_secs: 0,
            features: Features::default(),
            requirements: Requirements::default(),
            default_model: None,
            models: Vec::new(),
            typical_latency_ms: 0,
        }
    }

    pub fn supports_format(&self, format: AudioFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.is_empty()
            || language.eq_ignore_ascii_case("auto")
            || self
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(language))
    }

    pub fn accepts_size(&self, bytes: u64) -> bool {
        self.max_file_size_mb == 0 || bytes <= self.max_file_size_mb * 1024 * 1024
    }

    /// Names the first missing required field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("name")
        } else if self.display_name.trim().is_empty() {
            Some("display_name")
        } else if self.formats.is_empty() {
            Some("formats")
        } else {
            None
        }
    }
}

#[cfg(test)]
#[path = "capabilities_test.rs"]
mod tests;
