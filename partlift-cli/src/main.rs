//! partlift CLI - resumable multipart uploads and downloads
//!
//! Transfers run against a directory-backed object store whose root is set
//! by `store.root` in the configuration file.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use partlift::init_logging;

use commands::checkpoints::CheckpointCommands;
use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use commands::upload::UploadArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "partlift", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a local file in resumable parts
    Upload(UploadArgs),

    /// Download an object into a local file
    Download(DownloadArgs),

    /// Inspect or remove saved transfer progress
    #[command(subcommand)]
    Checkpoints(CheckpointCommands),

    /// View or edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Config(command) = cli.command {
        return commands::config::run(command, cli.config.as_deref());
    }

    let config = commands::common::load_config(cli.config.as_deref())?;
    let mut logging = config.to_logging_config();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _guard = init_logging(&logging)?;

    match cli.command {
        Commands::Upload(args) => commands::upload::run(args, &config),
        Commands::Download(args) => commands::download::run(args, &config),
        Commands::Checkpoints(command) => commands::checkpoints::run(command, &config),
        Commands::Config(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("{}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload_flags() {
        let cli = Cli::try_parse_from([
            "partlift",
            "upload",
            "/tmp/file.bin",
            "--part-size",
            "8MiB",
            "-j",
            "6",
        ])
        .unwrap();

        match cli.command {
            Commands::Upload(args) => {
                assert_eq!(args.part_size, Some(8 * 1024 * 1024));
                assert_eq!(args.concurrency, Some(6));
                assert!(!args.generate_key);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_key_and_generate_key_conflict() {
        let parsed = Cli::try_parse_from([
            "partlift",
            "upload",
            "f.bin",
            "--key",
            "k",
            "--generate-key",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_checkpoint_clear_requires_target() {
        assert!(Cli::try_parse_from(["partlift", "checkpoints", "clear"]).is_err());
        assert!(Cli::try_parse_from(["partlift", "checkpoints", "clear", "--all"]).is_ok());
    }
}
