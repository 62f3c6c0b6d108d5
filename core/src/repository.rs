//! Transcription outcome persistence.
//!
//! The scheduler only needs two questions answered: has this file already
//! been transcribed successfully, and where to put a new outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// One processed work item, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub file_name: String,
    pub duration_secs: u64,
    pub text: String,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn success(file_name: impl Into<String>, duration_secs: u64, text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            duration_secs,
            text: text.into(),
            has_error: false,
            error_message: String::new(),
            provider: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(
        file_name: impl Into<String>,
        duration_secs: u64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            duration_secs,
            text: String::new(),
            has_error: true,
            error_message: error_message.into(),
            provider: None,
            recorded_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TranscriptionRepository: Send + Sync {
    /// Record id of a successful outcome for `file_name`, if any.
    async fn check_processed(&self, file_name: &str) -> Result<Option<u64>>;

    async fn record_outcome(&self, record: OutcomeRecord) -> Result<()>;
}

#[derive(Default)]
struct Ledger {
    records: Vec<OutcomeRecord>,
    /// file name -> id of its latest successful record
    processed: HashMap<String, u64>,
}

impl Ledger {
    fn push(&mut self, record: OutcomeRecord) -> u64 {
        let id = self.records.len() as u64 + 1;
        if !record.has_error {
            self.processed.insert(record.file_name.clone(), id);
        }
        self.records.push(record);
        id
    }
}

/// Process-local repository, mainly for tests and dry runs.
#[derive(Default)]
pub struct InMemoryRepository {
    ledger: Mutex<Ledger>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a successful record for `file_name`.
    pub fn mark_processed(&self, file_name: &str) {
        self.lock()
            .push(OutcomeRecord::success(file_name, 0, "seeded"));
    }

    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TranscriptionRepository for InMemoryRepository {
    async fn check_processed(&self, file_name: &str) -> Result<Option<u64>> {
        Ok(self.lock().processed.get(file_name).copied())
    }

    async fn record_outcome(&self, record: OutcomeRecord) -> Result<()> {
        self.lock().push(record);
        Ok(())
    }
}

/// Append-only JSON-lines file, one [`OutcomeRecord`] per line.
pub struct JsonlRepository {
    path: PathBuf,
    ledger: tokio::sync::Mutex<Ledger>,
}

impl JsonlRepository {
    /// Open `path`, replaying any existing records. Creates parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut ledger = Ledger::default();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (lineno, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<OutcomeRecord>(line) {
                        Ok(record) => {
                            ledger.push(record);
                        }
                        Err(e) => warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "Skipping malformed record"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        }
        debug!(
            path = %path.display(),
            records = ledger.records.len(),
            "Opened outcome log"
        );

        Ok(Self {
            path,
            ledger: tokio::sync::Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn records(&self) -> Vec<OutcomeRecord> {
        self.ledger.lock().await.records.clone()
    }
}

#[async_trait]
impl TranscriptionRepository for JsonlRepository {
    async fn check_processed(&self, file_name: &str) -> Result<Option<u64>> {
        Ok(self.ledger.lock().await.processed.get(file_name).copied())
    }

    async fn record_outcome(&self, record: OutcomeRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record).context("Failed to encode record")?;
        line.push('\n');

        // Held across the write so appends never interleave.
        let mut ledger = self.ledger.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;
        ledger.push(record);
        Ok(())
    }
}

#[cfg(test)]
#[path = "repository_test.rs"]
mod tests;
