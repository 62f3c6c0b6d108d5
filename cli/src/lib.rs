mod commands;
mod progress;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "v2t")]
#[command(about = "v2t - batch transcription across local and remote providers")]
#[command(version)]
pub struct Cli {
    /// Provider configuration file (default: ~/.config/v2t/providers.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe every matching recording in a directory
    Convert(ConvertArgs),
    /// Transcribe a single file and print the text
    Transcribe(TranscribeArgs),
    /// Inspect configured providers
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Directory containing the recordings
    #[arg(short, long)]
    pub dir: PathBuf,
    /// File extension to pick up [default: from config]
    #[arg(short, long)]
    pub ext: Option<String>,
    /// Maximum number of unprocessed files to take, 0 for all [default: from config]
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
    /// Files transcribed concurrently [default: from config]
    #[arg(short, long)]
    pub parallel: Option<usize>,
    /// Also write `<name>.txt` transcripts into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Language hint passed to providers
    #[arg(short, long)]
    pub language: Option<String>,
    /// JSON-lines record store [default: ~/.local/share/v2t/transcriptions.jsonl]
    #[arg(long)]
    pub records: Option<PathBuf>,
    /// Send files to providers as-is instead of converting to 16 kHz WAV
    #[arg(long)]
    pub no_normalize: bool,
    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Audio or video file
    pub file: PathBuf,
    /// Try this provider first
    #[arg(short, long)]
    pub provider: Option<String>,
    /// Language hint passed to providers
    #[arg(short, long)]
    pub language: Option<String>,
    /// Model override for the provider that serves the request
    #[arg(short, long)]
    pub model: Option<String>,
    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
    /// Send the file as-is instead of converting to 16 kHz WAV
    #[arg(long)]
    pub no_normalize: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ProvidersCommand {
    /// List providers with their capabilities
    List,
    /// Probe every provider and show its health
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Validate the configuration and list resolved providers
    Validate,
}

/// Entry point for the `v2t` binary.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::dispatch(cli).await
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
