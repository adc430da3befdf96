//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use partlift::config::{config_file_path, parse_size, ConfigFile};
use partlift::{FsObjectStore, Transfer, TransferConfig};
use tracing::warn;

use crate::error::CliError;

/// Settings given on the command line that override the config file.
#[derive(Debug, Default, Clone)]
pub struct TransferOverrides {
    pub part_size: Option<u64>,
    pub concurrency: Option<usize>,
}

/// clap value parser for byte sizes such as `8MiB`.
pub fn parse_size_arg(s: &str) -> Result<u64, String> {
    match parse_size(s) {
        Some(0) => Err("size must be greater than zero".to_string()),
        Some(n) => Ok(n),
        None => Err(format!("invalid size '{}' (examples: 1048576, 512K, 8MiB)", s)),
    }
}

/// Load the config file at `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    Ok(ConfigFile::load_from(&path)?)
}

/// Store root from config, or `<data dir>/partlift/store`.
pub fn store_root(config: &ConfigFile) -> PathBuf {
    config.store.root.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("partlift")
            .join("store")
    })
}

/// Resolve the effective transfer settings.
pub fn transfer_config(config: &ConfigFile, overrides: &TransferOverrides) -> TransferConfig {
    let mut transfer = config.to_transfer_config();
    if let Some(part_size) = overrides.part_size {
        transfer.part_size = part_size;
    }
    if let Some(concurrency) = overrides.concurrency {
        transfer.concurrency = concurrency;
    }
    transfer
}

/// Build a transfer client over the configured store, with a progress bar
/// and Ctrl-C wired to cancellation.
pub fn build_transfer(
    config: &ConfigFile,
    overrides: &TransferOverrides,
) -> Result<(Transfer, ProgressBar), CliError> {
    let store = Arc::new(FsObjectStore::open(store_root(config))?);
    let bar = progress_bar();
    let sink = bar.clone();

    let transfer = Transfer::new(store, transfer_config(config, overrides))?.with_progress(
        Box::new(move |done, total, parts, total_parts| {
            sink.set_length(total);
            sink.set_position(done);
            sink.set_message(format!("part {}/{}", parts, total_parts));
        }),
    );

    let cancel = transfer.cancel_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        if !cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted: finishing in-flight parts, then stopping...");
        }
    }) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    Ok((transfer, bar))
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}
