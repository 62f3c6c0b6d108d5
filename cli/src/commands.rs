use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use v2t_core::batch::BatchScheduler;
use v2t_core::config::Config;
use v2t_core::engine::Engine;
use v2t_core::logging;
use v2t_core::media::{FfmpegNormalizer, MediaNormalizer, Passthrough};
use v2t_core::provider::TranscriptionRequest;
use v2t_core::repository::JsonlRepository;

use crate::progress;
use crate::{Cli, Commands, ConfigCommand, ConvertArgs, ProvidersCommand, TranscribeArgs};

pub async fn dispatch(cli: Cli) -> Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match cli.command {
        // Must work even when the existing file no longer parses.
        Commands::Config {
            command: ConfigCommand::Init { force },
        } => init_config(&path, force),
        command => {
            let config = Config::load_from(&path)?;
            let _guard = logging::init(&config.logging)?;
            match command {
                Commands::Convert(args) => convert(&config, args).await,
                Commands::Transcribe(args) => transcribe(&config, args).await,
                Commands::Providers { command } => providers(&config, command).await,
                Commands::Config { command } => show_config(&config, &path, command),
            }
        }
    }
}

async fn convert(config: &Config, args: ConvertArgs) -> Result<()> {
    let engine = Engine::from_config(config).context("Invalid provider configuration")?;

    let records_path = match args.records.or_else(|| config.batch.records_path.clone()) {
        Some(path) => path,
        None => v2t_common::dirs::records_path()?,
    };
    let repository = Arc::new(JsonlRepository::open(&records_path).await?);

    let scheduler = BatchScheduler::new(
        Arc::clone(engine.orchestrator()),
        repository,
        normalizer(config, args.no_normalize),
    )
    .with_output_dir(args.output.or_else(|| config.batch.output_dir.clone()))
    .with_language(args.language);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let interval = config.health.check_interval_secs;
    let monitor = (interval > 0).then(|| {
        engine.health().spawn_monitor(
            Arc::clone(engine.registry()),
            Duration::from_secs(interval),
            cancel.child_token(),
        )
    });
    let progress = (!args.no_progress).then(|| progress::spawn(scheduler.subscribe()));

    let extension = args.ext.unwrap_or_else(|| config.batch.extension.clone());
    let count = args.count.unwrap_or(config.batch.max_count);
    let parallelism = args.parallel.unwrap_or(config.batch.parallelism);
    info!(
        dir = %args.dir.display(),
        extension = %extension,
        count,
        parallelism,
        records = %records_path.display(),
        "Starting batch"
    );

    let result = scheduler
        .run_batch(&args.dir, &extension, count, parallelism, &cancel)
        .await;

    // Stops the health monitor as well.
    let interrupted = cancel.is_cancelled();
    cancel.cancel();
    if let Some(handle) = monitor {
        let _ = handle.await;
    }
    drop(scheduler);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let report = result?;
    println!("{}", progress::summary(&report));
    for stats in engine.metrics().all() {
        println!(
            "  {}: {} requests, {:.0}% ok, avg {:.0} ms",
            stats.provider,
            stats.total_requests,
            stats.success_rate() * 100.0,
            stats.average_latency_ms
        );
    }
    if interrupted {
        warn!("Batch interrupted; rerun to pick up the remaining files");
    }
    Ok(())
}

async fn transcribe(config: &Config, args: TranscribeArgs) -> Result<()> {
    let engine = Engine::from_config(config).context("Invalid provider configuration")?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let audio = normalizer(config, args.no_normalize)
        .normalize(&args.file)
        .await
        .with_context(|| format!("Failed to prepare {}", args.file.display()))?;

    let request = TranscriptionRequest::new(&audio.path)
        .with_language(args.language)
        .with_model(args.model);
    let orchestrator = engine.orchestrator();
    let result = match &args.provider {
        Some(name) => {
            orchestrator
                .execute_with_provider(name, &request, &cancel)
                .await
        }
        None => orchestrator.execute(&request, &cancel).await,
    };
    audio.cleanup().await;

    let mut result = result.with_context(|| format!("Transcription of {} failed", args.file.display()))?;
    if result.audio_duration.is_none() {
        result.audio_duration = audio.duration;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text.trim());
    }
    info!(
        provider = %result.provider,
        elapsed_ms = result.processing_time.as_millis() as u64,
        "Transcribed"
    );
    Ok(())
}

async fn providers(config: &Config, command: ProvidersCommand) -> Result<()> {
    let engine = Engine::from_config(config).context("Invalid provider configuration")?;

    match command {
        ProvidersCommand::List => {
            for listing in engine.registry().descriptors() {
                let d = &listing.descriptor;
                let formats: Vec<&str> = d.formats.iter().map(|f| f.extension()).collect();
                println!(
                    "{marker} {name:<16} {kind:<7} priority={priority:<3} {state:<8} {display}",
                    marker = if listing.is_default { "*" } else { " " },
                    name = d.name,
                    kind = d.kind.to_string(),
                    priority = listing.priority,
                    state = if listing.enabled { "enabled" } else { "disabled" },
                    display = d.display_name,
                );
                println!("    formats: {}", formats.join(", "));
                if d.max_file_size_mb > 0 {
                    println!("    max size: {} MB", d.max_file_size_mb);
                }
                if let Some(model) = &d.default_model {
                    println!("    model: {model}");
                }
            }
        }
        ProvidersCommand::Status { json } => {
            let statuses = engine.health().check_all(engine.registry()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
                return Ok(());
            }
            for status in statuses {
                let state = if status.healthy { "healthy" } else { "UNHEALTHY" };
                print!(
                    "{:<16} {:<9} {:>6} ms",
                    status.provider,
                    state,
                    status.response_time.as_millis()
                );
                match status.last_error {
                    Some(error) => println!("  {error}"),
                    None => println!(),
                }
            }
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn show_config(config: &Config, path: &Path, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("# {}", path.display());
            print!(
                "{}",
                toml::to_string_pretty(config).context("Failed to serialize config")?
            );
        }
        ConfigCommand::Validate => {
            let specs = config
                .validate()
                .with_context(|| format!("{} is invalid", path.display()))?;
            for spec in specs {
                println!(
                    "{:<16} {:<15} priority={:<3} attempts={} timeout={}s{}",
                    spec.name,
                    spec.settings.type_tag(),
                    spec.priority,
                    spec.policy.max_attempts,
                    spec.policy.timeout.as_secs(),
                    if spec.enabled { "" } else { " (disabled)" }
                );
            }
            println!("OK");
        }
        ConfigCommand::Init { force } => init_config(path, force)?,
    }
    Ok(())
}

fn normalizer(config: &Config, disabled: bool) -> Arc<dyn MediaNormalizer> {
    if disabled || !config.media.normalize {
        return Arc::new(Passthrough);
    }
    let work_dir: PathBuf = config
        .media
        .work_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    Arc::new(FfmpegNormalizer::new(
        config.media.ffmpeg.clone(),
        config.media.ffprobe.clone(),
        work_dir,
    ))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight work to stop");
            cancel.cancel();
        }
    });
}
