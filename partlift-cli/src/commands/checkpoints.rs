//! `partlift checkpoints`: inspect and remove saved transfer progress.

use std::path::PathBuf;

use clap::Subcommand;
use partlift::config::{format_size, ConfigFile};
use partlift::plan::part_count;
use partlift::transfer::{CheckpointKey, CheckpointManager};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum CheckpointCommands {
    /// List interrupted transfers that can be resumed
    List,

    /// Remove saved progress
    Clear {
        /// Object key of the transfer
        #[arg(required_unless_present = "all")]
        key: Option<String>,

        /// Local path of the transfer
        #[arg(required_unless_present = "all")]
        path: Option<PathBuf>,

        /// Remove every checkpoint
        #[arg(long, conflicts_with_all = ["key", "path"])]
        all: bool,
    },
}

pub fn run(command: CheckpointCommands, config: &ConfigFile) -> Result<(), CliError> {
    let manager = CheckpointManager::new(config.to_transfer_config().checkpoint_dir);
    match command {
        CheckpointCommands::List => run_list(&manager),
        CheckpointCommands::Clear { key, path, all } => run_clear(&manager, key, path, all),
    }
}

fn run_list(manager: &CheckpointManager) -> Result<(), CliError> {
    let records = manager.list()?;
    if records.is_empty() {
        println!("No saved transfers in {}", manager.dir().display());
        return Ok(());
    }

    for record in records {
        let total_parts = part_count(record.total_size, record.part_size).unwrap_or(0);
        println!(
            "{:<8} {} <-> {}",
            format!("{:?}", record.direction).to_lowercase(),
            record.object_key,
            record.local_path.display()
        );
        println!(
            "         {}/{} parts, {} of {}, updated {}",
            record.parts.len(),
            total_parts,
            format_size(record.committed_bytes()),
            format_size(record.total_size),
            record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn run_clear(
    manager: &CheckpointManager,
    key: Option<String>,
    path: Option<PathBuf>,
    all: bool,
) -> Result<(), CliError> {
    if all {
        let records = manager.list()?;
        for record in &records {
            manager.clear(&record.key())?;
        }
        println!("Removed {} checkpoint(s)", records.len());
        return Ok(());
    }

    let (Some(key), Some(path)) = (key, path) else {
        return Err(CliError::Config(
            "Pass both the object key and the local path, or --all".to_string(),
        ));
    };
    // Transfers started from the CLI record absolute paths.
    let path = std::path::absolute(&path).unwrap_or(path);
    let ckpt_key = CheckpointKey::new(key, path);
    let existed = manager.load(&ckpt_key)?.is_some();
    manager.clear(&ckpt_key)?;
    if existed {
        println!("Removed checkpoint for {}", ckpt_key.object_key);
    } else {
        println!("No checkpoint for {}", ckpt_key.object_key);
    }
    Ok(())
}
