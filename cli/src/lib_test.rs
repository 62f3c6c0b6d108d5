use std::path::PathBuf;

use super::*;

#[test]
fn test_parse_convert_with_overrides() {
    let cli = Cli::try_parse_from([
        "v2t", "convert", "--dir", "/rec", "-e", "m4a", "-n", "0", "-p", "4", "--no-normalize",
    ])
    .unwrap();

    let Commands::Convert(args) = cli.command else {
        panic!("expected convert");
    };
    assert_eq!(args.dir, PathBuf::from("/rec"));
    assert_eq!(args.ext.as_deref(), Some("m4a"));
    assert_eq!(args.count, Some(0));
    assert_eq!(args.parallel, Some(4));
    assert!(args.no_normalize);
    assert!(args.output.is_none());
}

#[test]
fn test_convert_requires_dir() {
    assert!(Cli::try_parse_from(["v2t", "convert"]).is_err());
}

#[test]
fn test_parse_transcribe_with_provider() {
    let cli = Cli::try_parse_from([
        "v2t",
        "--config",
        "/tmp/p.toml",
        "transcribe",
        "talk.wav",
        "--provider",
        "openai",
        "-m",
        "whisper-1",
        "--json",
    ])
    .unwrap();

    assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    let Commands::Transcribe(args) = cli.command else {
        panic!("expected transcribe");
    };
    assert_eq!(args.file, PathBuf::from("talk.wav"));
    assert_eq!(args.provider.as_deref(), Some("openai"));
    assert_eq!(args.model.as_deref(), Some("whisper-1"));
    assert!(args.json);
}

#[test]
fn test_parse_nested_subcommands() {
    let cli = Cli::try_parse_from(["v2t", "providers", "status", "--json"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Providers {
            command: ProvidersCommand::Status { json: true }
        }
    ));

    let cli = Cli::try_parse_from(["v2t", "config", "init", "--force"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommand::Init { force: true }
        }
    ));
}

#[test]
fn test_global_config_flag_after_subcommand() {
    let cli = Cli::try_parse_from(["v2t", "config", "show", "--config", "x.toml"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
}

#[test]
fn test_cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
