//! Media normalization ahead of transcription.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Output of a normalization step.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    pub path: PathBuf,
    pub duration: Option<Duration>,
    /// Set when `path` is a scratch file the caller should remove.
    pub temporary: bool,
}

impl NormalizedAudio {
    /// Remove the scratch file, if this is one.
    pub async fn cleanup(&self) {
        if !self.temporary {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}

#[async_trait]
pub trait MediaNormalizer: Send + Sync {
    async fn normalize(&self, input: &Path) -> Result<NormalizedAudio>;
}

/// Hands the input through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl MediaNormalizer for Passthrough {
    async fn normalize(&self, input: &Path) -> Result<NormalizedAudio> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            bail!("input not found: {}", input.display());
        }
        Ok(NormalizedAudio {
            path: input.to_path_buf(),
            duration: None,
            temporary: false,
        })
    }
}

/// Converts inputs to 16 kHz mono 16-bit WAV with ffmpeg and measures them with ffprobe.
pub struct FfmpegNormalizer {
    ffmpeg: String,
    ffprobe: String,
    work_dir: PathBuf,
    counter: AtomicU64,
}

impl FfmpegNormalizer {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, work_dir: PathBuf) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            work_dir,
            counter: AtomicU64::new(0),
        }
    }

    fn scratch_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.work_dir
            .join(format!("{stem}-{}-{n}.wav", std::process::id()))
    }

    /// Duration in seconds as reported by ffprobe.
    pub async fn probe_duration(&self, path: &Path) -> Result<Duration> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration", "-of"])
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffprobe))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.ffprobe,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl MediaNormalizer for FfmpegNormalizer {
    async fn normalize(&self, input: &Path) -> Result<NormalizedAudio> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            bail!("input not found: {}", input.display());
        }
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.work_dir.display()))?;

        let output_path = self.scratch_path(input);
        debug!(input = %input.display(), output = %output_path.display(), "Normalizing audio");

        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg))?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&output_path).await;
            bail!(
                "{} exited with {}: {}",
                self.ffmpeg,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let duration = match self.probe_duration(&output_path).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                debug!(error = %e, "Could not determine duration");
                None
            }
        };

        Ok(NormalizedAudio {
            path: output_path,
            duration,
            temporary: true,
        })
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Unexpected duration: {:?}", raw.trim()))?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid duration: {secs}"))
}

#[cfg(test)]
#[path = "media_test.rs"]
mod tests;
