//! Bounded-concurrency batch transcription.
//!
//! A run enumerates inputs, drops the ones already transcribed, then drives
//! the rest through the orchestrator with at most N workers in flight. A
//! failing file is recorded and logged; it never ends the run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BatchError, OrchestratorError};
use crate::media::MediaNormalizer;
use crate::orchestrator::Orchestrator;
use crate::provider::TranscriptionRequest;
use crate::repository::{OutcomeRecord, TranscriptionRepository};

const EVENT_CAPACITY: usize = 256;

/// One input file selected for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    /// File name, also the persistence key.
    pub name: String,
    pub modified: SystemTime,
}

impl WorkItem {
    pub async fn from_path(path: PathBuf) -> Self {
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            modified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Candidates found before filtering.
    pub discovered: usize,
    /// Already processed without error.
    pub skipped: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Selected but interrupted or never started.
    pub cancelled: usize,
    pub elapsed: Duration,
}

/// Progress notifications for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { total: usize, skipped: usize },
    ItemStarted { name: String },
    ItemFinished {
        name: String,
        success: bool,
        error: Option<String>,
    },
    Finished(BatchReport),
}

enum ItemOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

pub struct BatchScheduler {
    orchestrator: Arc<Orchestrator>,
    repository: Arc<dyn TranscriptionRepository>,
    normalizer: Arc<dyn MediaNormalizer>,
    events: broadcast::Sender<BatchEvent>,
    output_dir: Option<PathBuf>,
    language: Option<String>,
}

impl BatchScheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        repository: Arc<dyn TranscriptionRepository>,
        normalizer: Arc<dyn MediaNormalizer>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            orchestrator,
            repository,
            normalizer,
            events,
            output_dir: None,
            language: None,
        }
    }

    /// Also write each transcript to `<dir>/<stem>.txt`.
    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Transcribe files in `dir` with the given extension.
    ///
    /// `max_count` caps the number of unprocessed files taken (0 = no cap).
    pub async fn run_batch(
        &self,
        dir: &Path,
        extension: &str,
        max_count: usize,
        parallelism: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        if parallelism == 0 {
            return Err(BatchError::InvalidParallelism);
        }
        let items = enumerate(dir, extension).await?;
        info!(
            dir = %dir.display(),
            extension,
            found = items.len(),
            "Enumerated batch inputs"
        );
        Ok(self.run_items(items, max_count, parallelism, cancel).await)
    }

    /// Transcribe an explicit list of files, in the given order.
    pub async fn run_files(
        &self,
        paths: Vec<PathBuf>,
        max_count: usize,
        parallelism: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        if parallelism == 0 {
            return Err(BatchError::InvalidParallelism);
        }
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            items.push(WorkItem::from_path(path).await);
        }
        Ok(self.run_items(items, max_count, parallelism, cancel).await)
    }

    async fn run_items(
        &self,
        items: Vec<WorkItem>,
        max_count: usize,
        parallelism: usize,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport {
            discovered: items.len(),
            ..BatchReport::default()
        };

        let (selected, skipped) = self.select_unprocessed(items, max_count).await;
        report.skipped = skipped;
        let total = selected.len();
        let _ = self.events.send(BatchEvent::Started { total, skipped });
        info!(total, skipped, parallelism, "Batch started");

        let worker = Arc::new(Worker {
            orchestrator: Arc::clone(&self.orchestrator),
            repository: Arc::clone(&self.repository),
            normalizer: Arc::clone(&self.normalizer),
            events: self.events.clone(),
            output_dir: self.output_dir.clone(),
            language: self.language.clone(),
        });
        let slots = Arc::new(Semaphore::new(parallelism));
        let mut workers = JoinSet::new();
        let mut names = HashMap::new();

        for item in selected {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            report.dispatched += 1;
            let name = item.name.clone();
            let task_worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            let handle = workers.spawn(async move {
                let _permit = permit;
                task_worker.process(item, &cancel).await
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(ItemOutcome::Succeeded) => report.succeeded += 1,
                Ok(ItemOutcome::Failed) => report.failed += 1,
                Ok(ItemOutcome::Cancelled) => report.cancelled += 1,
                Err(e) => {
                    let name = names.remove(&e.id()).unwrap_or_default();
                    error!(file = %name, error = %e, "Batch worker panicked");
                    let message = format!("worker panicked: {e}");
                    worker
                        .record(OutcomeRecord::failure(&name, 0, &message))
                        .await;
                    let _ = self.events.send(BatchEvent::ItemFinished {
                        name,
                        success: false,
                        error: Some(message),
                    });
                    report.failed += 1;
                }
            }
        }
        report.cancelled += total - report.dispatched;
        report.elapsed = started.elapsed();

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
        let _ = self.events.send(BatchEvent::Finished(report.clone()));
        report
    }

    /// Keep items without a successful record, up to `max_count` of them.
    async fn select_unprocessed(
        &self,
        items: Vec<WorkItem>,
        max_count: usize,
    ) -> (Vec<WorkItem>, usize) {
        let mut selected = Vec::new();
        let mut skipped = 0;
        for item in items {
            if max_count > 0 && selected.len() >= max_count {
                break;
            }
            match self.repository.check_processed(&item.name).await {
                Ok(Some(id)) => {
                    debug!(file = %item.name, record = id, "Already processed, skipping");
                    skipped += 1;
                }
                Ok(None) => selected.push(item),
                Err(e) => {
                    warn!(file = %item.name, error = %e, "Processed check failed, including file");
                    selected.push(item);
                }
            }
        }
        (selected, skipped)
    }
}

struct Worker {
    orchestrator: Arc<Orchestrator>,
    repository: Arc<dyn TranscriptionRepository>,
    normalizer: Arc<dyn MediaNormalizer>,
    events: broadcast::Sender<BatchEvent>,
    output_dir: Option<PathBuf>,
    language: Option<String>,
}

impl Worker {
    async fn process(&self, item: WorkItem, cancel: &CancellationToken) -> ItemOutcome {
        let _ = self.events.send(BatchEvent::ItemStarted {
            name: item.name.clone(),
        });
        debug!(file = %item.name, "Processing file");

        let normalized = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.finish(&item, ItemOutcome::Cancelled, None),
            normalized = self.normalizer.normalize(&item.path) => normalized,
        };
        let normalized = match normalized {
            Ok(normalized) => normalized,
            Err(e) => {
                let message = format!("normalization failed: {e:#}");
                warn!(file = %item.name, error = %message, "Normalization failed");
                self.record(OutcomeRecord::failure(&item.name, 0, &message))
                    .await;
                return self.finish(&item, ItemOutcome::Failed, Some(message));
            }
        };

        let request =
            TranscriptionRequest::new(&normalized.path).with_language(self.language.clone());
        let outcome = self.orchestrator.execute(&request, cancel).await;
        normalized.cleanup().await;

        match outcome {
            Ok(result) => {
                let duration_secs = result
                    .audio_duration
                    .or(normalized.duration)
                    .map_or(0, |d| d.as_secs());
                if let Some(dir) = &self.output_dir {
                    if let Err(e) = write_transcript(dir, &item.path, &result.text).await {
                        warn!(file = %item.name, error = %e, "Failed to write transcript file");
                    }
                }
                let mut record = OutcomeRecord::success(&item.name, duration_secs, &result.text);
                record.provider = Some(result.provider);
                self.record(record).await;
                self.finish(&item, ItemOutcome::Succeeded, None)
            }
            Err(OrchestratorError::Cancelled { .. }) => {
                self.finish(&item, ItemOutcome::Cancelled, None)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(file = %item.name, error = %message, "Transcription failed");
                let duration_secs = normalized.duration.map_or(0, |d| d.as_secs());
                self.record(OutcomeRecord::failure(&item.name, duration_secs, &message))
                    .await;
                self.finish(&item, ItemOutcome::Failed, Some(message))
            }
        }
    }

    async fn record(&self, record: OutcomeRecord) {
        let file = record.file_name.clone();
        if let Err(e) = self.repository.record_outcome(record).await {
            error!(file = %file, error = %e, "Failed to record outcome");
        }
    }

    fn finish(&self, item: &WorkItem, outcome: ItemOutcome, error: Option<String>) -> ItemOutcome {
        let success = matches!(outcome, ItemOutcome::Succeeded);
        if matches!(outcome, ItemOutcome::Cancelled) {
            debug!(file = %item.name, "Cancelled");
        }
        let _ = self.events.send(BatchEvent::ItemFinished {
            name: item.name.clone(),
            success,
            error,
        });
        outcome
    }
}

/// Non-recursive listing of files whose extension matches, oldest first.
///
/// Extension matching ignores case and a leading dot; an empty extension
/// matches every file.
pub async fn enumerate(dir: &Path, extension: &str) -> Result<Vec<WorkItem>, BatchError> {
    let wrap = |source| BatchError::Enumerate {
        dir: dir.to_path_buf(),
        source,
    };
    let extension = extension.trim_start_matches('.');
    let mut entries = tokio::fs::read_dir(dir).await.map_err(wrap)?;

    let mut items = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(wrap)? {
        let path = entry.path();
        let matches = extension.is_empty()
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        items.push(WorkItem {
            name: entry.file_name().to_string_lossy().into_owned(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path,
        });
    }

    items.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(items)
}

async fn write_transcript(dir: &Path, input: &Path, text: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    tokio::fs::write(dir.join(format!("{stem}.txt")), text).await
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;
