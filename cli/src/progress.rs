use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;
use v2t_core::batch::{BatchEvent, BatchReport};

const TEMPLATE: &str =
    "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec}, eta {eta}) {msg}";

/// Render batch events on stderr until the run finishes.
pub fn spawn(mut events: broadcast::Receiver<BatchEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::hidden();
        loop {
            match events.recv().await {
                Ok(BatchEvent::Started { total, skipped }) => {
                    bar.set_style(
                        ProgressStyle::with_template(TEMPLATE)
                            .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    bar.set_length(total as u64);
                    bar.set_draw_target(ProgressDrawTarget::stderr());
                    if skipped > 0 {
                        bar.println(format!("Skipping {skipped} already processed file(s)"));
                    }
                }
                Ok(BatchEvent::ItemStarted { name }) => bar.set_message(name),
                Ok(BatchEvent::ItemFinished {
                    name,
                    success,
                    error,
                }) => {
                    if !success {
                        bar.println(failure_line(&name, error.as_deref()));
                    }
                    bar.inc(1);
                }
                Ok(BatchEvent::Finished(_)) => {
                    bar.finish_and_clear();
                    break;
                }
                Err(RecvError::Lagged(missed)) => debug!(missed, "Progress display lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn failure_line(name: &str, error: Option<&str>) -> String {
    match error {
        Some(error) => format!("failed: {name}: {error}"),
        None => format!("failed: {name}"),
    }
}

/// One-line outcome of a batch run.
pub fn summary(report: &BatchReport) -> String {
    let mut line = format!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded, report.failed, report.skipped
    );
    if report.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", report.cancelled));
    }
    line.push_str(&format!(
        " ({} found, {:.1}s)",
        report.discovered,
        report.elapsed.as_secs_f64()
    ));
    line
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;
