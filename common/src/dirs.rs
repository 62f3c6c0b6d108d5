//! XDG directory utilities for v2t.

use std::path::PathBuf;

use anyhow::{Context, Result};
use xdg::BaseDirectories;

const APP_NAME: &str = "v2t";

fn base_dirs() -> BaseDirectories {
    BaseDirectories::with_prefix(APP_NAME)
}

/// Return the XDG state directory, creating it if needed.
/// `~/.local/state/v2t/`
pub fn state_dir() -> Result<PathBuf> {
    let dir = base_dirs()
        .get_state_home()
        .context("Failed to get XDG state directory (HOME not set?)")?;
    std::fs::create_dir_all(&dir).context("Failed to create state directory")?;
    Ok(dir)
}

/// Return the XDG config directory (no creation - config may not exist yet).
/// `~/.config/v2t/`
pub fn config_dir() -> Result<PathBuf> {
    base_dirs()
        .get_config_home()
        .context("Could not determine config directory (HOME not set?)")
}

/// Return the XDG data directory, creating it if needed.
/// `~/.local/share/v2t/`
pub fn data_dir() -> Result<PathBuf> {
    let dir = base_dirs()
        .get_data_home()
        .context("Could not determine data directory (HOME not set?)")?;
    std::fs::create_dir_all(&dir).context("Failed to create data directory")?;
    Ok(dir)
}

/// Provider configuration file.
/// `~/.config/v2t/providers.toml`
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("providers.toml"))
}

/// Transcription record store used by batch runs.
/// `~/.local/share/v2t/transcriptions.jsonl`
pub fn records_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("transcriptions.jsonl"))
}

/// Log file written when file logging is enabled.
/// `~/.local/state/v2t/v2t.log`
pub fn log_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("v2t.log"))
}
