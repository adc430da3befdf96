//! `partlift upload`: send a local file to the store.

use std::path::PathBuf;

use clap::Args;
use partlift::config::{format_size, ConfigFile};
use partlift::{generate_object_key, TransferReport, TransferSpec};
use tracing::info;

use super::common::{build_transfer, parse_size_arg, TransferOverrides};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Local file to upload
    pub path: PathBuf,

    /// Object key (defaults to the file name)
    #[arg(long, short, conflicts_with = "generate_key")]
    pub key: Option<String>,

    /// Use a unique generated key (<random id>_<file name>)
    #[arg(long)]
    pub generate_key: bool,

    /// Part size, e.g. 8MiB (overrides transfer.part_size)
    #[arg(long, value_parser = parse_size_arg)]
    pub part_size: Option<u64>,

    /// Parts in flight at once (overrides transfer.concurrency)
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Upload in a single request instead of parts
    #[arg(long)]
    pub single_shot: bool,
}

/// Object key for the upload.
fn resolve_key(args: &UploadArgs) -> Result<String, CliError> {
    if let Some(key) = &args.key {
        return Ok(key.clone());
    }
    if args.generate_key {
        return Ok(generate_object_key(&args.path)?);
    }
    args.path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::Config(format!(
                "Cannot derive an object key from '{}'; pass --key",
                args.path.display()
            ))
        })
}

pub fn run(args: UploadArgs, config: &ConfigFile) -> Result<(), CliError> {
    let overrides = TransferOverrides {
        part_size: args.part_size,
        concurrency: args.concurrency,
    };
    let (transfer, bar) = build_transfer(config, &overrides)?;
    let key = resolve_key(&args)?;
    let path = std::path::absolute(&args.path).unwrap_or_else(|_| args.path.clone());
    let spec = TransferSpec::upload(key, path, transfer.config().part_size)?;

    info!(
        key = %spec.object_key,
        size = spec.total_size,
        part_size = spec.part_size,
        "Starting upload"
    );
    let result = if args.single_shot {
        transfer.put(&spec)
    } else {
        transfer.upload(&spec)
    };
    bar.finish_and_clear();

    print_report("Uploaded", &result?);
    Ok(())
}

pub(crate) fn print_report(verb: &str, report: &TransferReport) {
    println!("{} {} ({})", verb, report.key, format_size(report.total_bytes));
    if report.single_shot {
        println!("  single request");
    } else {
        println!(
            "  {} parts, {} transferred, {} resumed",
            report.parts, report.transferred_parts, report.resumed_parts
        );
    }
    if let Some(id) = &report.upload_id {
        println!("  upload id {}", id);
    }
    if report.checkpoint_failures > 0 {
        eprintln!(
            "Warning: {} checkpoint write(s) failed; an interruption would have lost that progress",
            report.checkpoint_failures
        );
    }
}
