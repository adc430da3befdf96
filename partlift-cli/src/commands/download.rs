//! `partlift download`: fetch an object into a local file.

use std::path::PathBuf;

use clap::Args;
use partlift::config::ConfigFile;
use partlift::TransferSpec;
use tracing::info;

use super::common::{build_transfer, parse_size_arg, TransferOverrides};
use super::upload::print_report;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Object key to download
    pub key: String,

    /// Destination file (defaults to the last key segment in the current directory)
    pub dest: Option<PathBuf>,

    /// Range size, e.g. 8MiB (overrides transfer.part_size)
    #[arg(long, value_parser = parse_size_arg)]
    pub part_size: Option<u64>,

    /// Ranges in flight at once (overrides transfer.concurrency)
    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,
}

fn resolve_dest(args: &DownloadArgs) -> PathBuf {
    args.dest.clone().unwrap_or_else(|| {
        let name = args
            .key
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("download");
        PathBuf::from(name)
    })
}

pub fn run(args: DownloadArgs, config: &ConfigFile) -> Result<(), CliError> {
    let overrides = TransferOverrides {
        part_size: args.part_size,
        concurrency: args.concurrency,
    };
    let (transfer, bar) = build_transfer(config, &overrides)?;
    let dest = resolve_dest(&args);
    let dest = std::path::absolute(&dest).unwrap_or(dest);
    let spec = TransferSpec::download(args.key, &dest, transfer.config().part_size);

    info!(key = %spec.object_key, dest = %dest.display(), "Starting download");
    let result = transfer.download(&spec);
    bar.finish_and_clear();

    let report = result?;
    print_report("Downloaded", &report);
    println!("  saved to {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(key: &str, dest: Option<&str>) -> DownloadArgs {
        DownloadArgs {
            key: key.to_string(),
            dest: dest.map(PathBuf::from),
            part_size: None,
            concurrency: None,
        }
    }

    #[test]
    fn test_dest_from_key() {
        assert_eq!(resolve_dest(&args("a/b/c.txt", None)), PathBuf::from("c.txt"));
        assert_eq!(resolve_dest(&args("dir/", None)), PathBuf::from("dir"));
        assert_eq!(
            resolve_dest(&args("k", Some("/tmp/out"))),
            PathBuf::from("/tmp/out")
        );
    }
}
