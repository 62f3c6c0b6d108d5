use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Application-specific environment variable for log filtering (overrides config).
pub const LOG_ENV_VAR: &str = "V2T_LOG";

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays clean for transcripts. With
/// `logging.file` set they are also appended to the state directory; keep
/// the returned guard alive until exit or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // V2T_LOG env var overrides config file level
    let filter = match EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .try_from_env()
    {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.level.as_directive())
            .context("Invalid log level directive")?,
    };

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    if !config.file {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .try_init()
            .context("Failed to install log subscriber")?;
        return Ok(None);
    }

    let log_path = v2t_common::dirs::log_path().context("Failed to determine log path")?;
    let log_dir = log_path
        .parent()
        .context("Log path has no parent directory")?;
    let log_filename = log_path.file_name().context("Log path has no file name")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(Some(guard))
}
