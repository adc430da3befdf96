//! Ranged download session.
//!
//! ```text
//! SizeResolved -> RangesInFlight -> Done
//!                       |
//!                       +--> Failed
//! ```
//!
//! The destination is pre-sized to the object length and every range is
//! written at its own offset, so ranges may finish in any order.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::{IncompleteTransfer, TransferError, TransferResult};
use crate::plan::PartDescriptor;
use crate::store::ObjectStore;

use super::checkpoint::{Checkpoint, CheckpointKey, CheckpointManager};
use super::io::write_all_at;
use super::pool::{Flow, TransferWorkerPool};
use super::progress::{ProgressCallback, ProgressTracker};
use super::types::{Direction, PartResult, PartStatus, SessionState, TransferSpec};
use super::TransferReport;

/// Lifecycle of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    SizeResolved,
    RangesInFlight,
    Done,
    Failed,
}

/// Downloads one object into a local file with concurrent ranged reads.
pub struct DownloadSession<'a> {
    store: &'a dyn ObjectStore,
    checkpoints: &'a CheckpointManager,
    config: &'a TransferConfig,
    session: SessionState,
    state: DownloadState,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Option<Arc<AtomicBool>>,
    resumed_parts: usize,
    checkpoint_failures: usize,
}

impl<'a> DownloadSession<'a> {
    /// Resolve the object size and plan the ranges.
    ///
    /// Fails with [`TransferError::NotFound`] when the object does not exist.
    pub fn new(
        store: &'a dyn ObjectStore,
        checkpoints: &'a CheckpointManager,
        config: &'a TransferConfig,
        mut spec: TransferSpec,
    ) -> TransferResult<Self> {
        config.validate()?;
        spec.validate()?;
        spec.expect_direction(Direction::Download)?;

        let key = spec.object_key.clone();
        let info = config.retry.run("head_object", |_| {
            store
                .head_object(&key)
                .map_err(|e| TransferError::from_store("head_object", &key, e))
        })?;
        if !info.exists {
            return Err(TransferError::NotFound { key });
        }
        spec.total_size = info.size;
        debug!(key = %key, size = info.size, "Resolved object size");

        Ok(Self {
            store,
            checkpoints,
            config,
            session: SessionState::new(spec)?,
            state: DownloadState::SizeResolved,
            progress: None,
            cancel: None,
            resumed_parts: 0,
            checkpoint_failures: 0,
        })
    }

    pub fn with_progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Object size as reported by the store.
    pub fn total_size(&self) -> u64 {
        self.session.spec.total_size
    }

    fn key(&self) -> &str {
        &self.session.spec.object_key
    }

    /// Drive the download to `Done` or `Failed`.
    pub fn run(&mut self) -> TransferResult<TransferReport> {
        self.state = DownloadState::RangesInFlight;

        let file = match self.prepare_destination() {
            Ok(file) => file,
            Err(e) => {
                self.state = DownloadState::Failed;
                return Err(e);
            }
        };

        let results = match self.transfer_ranges(&file) {
            Ok(results) => results,
            Err(e) => return Err(self.fail(Vec::new(), Some(e))),
        };
        if !self.session.is_complete() {
            return Err(self.fail(results, None));
        }

        if let Err(e) = self.finish(&file) {
            return Err(self.fail(Vec::new(), Some(e)));
        }
        if let Err(e) = self
            .checkpoints
            .clear(&CheckpointKey::for_spec(&self.session.spec))
        {
            warn!(key = %self.key(), error = %e, "Failed to clear checkpoint");
        }
        self.state = DownloadState::Done;

        let report = TransferReport {
            key: self.key().to_string(),
            total_bytes: self.session.spec.total_size,
            parts: self.session.parts.len(),
            transferred_parts: self.session.parts.len() - self.resumed_parts,
            resumed_parts: self.resumed_parts,
            single_shot: false,
            upload_id: None,
            checkpoint_failures: self.checkpoint_failures,
        };
        info!(
            key = %report.key,
            path = %self.session.spec.local_path.display(),
            bytes = report.total_bytes,
            parts = report.parts,
            resumed = report.resumed_parts,
            "Download complete"
        );
        Ok(report)
    }

    /// Restore usable progress, then open and pre-size the destination.
    fn prepare_destination(&mut self) -> TransferResult<File> {
        let path = self.session.spec.local_path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TransferError::local_io(parent, e))?;
        }

        self.restore_checkpoint()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TransferError::local_io(&path, e))?;
        file.set_len(self.session.spec.total_size)
            .map_err(|e| TransferError::local_io(&path, e))?;
        Ok(file)
    }

    /// Skip committed ranges if the checkpoint and the partial file both
    /// still match this object; otherwise drop the checkpoint.
    fn restore_checkpoint(&mut self) -> TransferResult<()> {
        let ckpt_key = CheckpointKey::for_spec(&self.session.spec);
        let Some(checkpoint) = self.checkpoints.load(&ckpt_key)? else {
            return Ok(());
        };

        let partial_len = fs::metadata(&self.session.spec.local_path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len());
        if checkpoint.matches(&self.session.spec)
            && partial_len == Some(self.session.spec.total_size)
        {
            self.resumed_parts = self.session.restore(&checkpoint.parts);
            info!(
                key = %self.key(),
                resumed = self.resumed_parts,
                parts = self.session.parts.len(),
                "Resuming download from checkpoint"
            );
        } else {
            info!(key = %self.key(), "Checkpoint does not match this download, discarding");
            self.checkpoints.clear(&ckpt_key)?;
        }
        Ok(())
    }

    fn transfer_ranges(&mut self, file: &File) -> TransferResult<Vec<PartResult>> {
        let pending = self.session.pending_parts();
        let mut tracker = ProgressTracker::new(
            self.progress.clone(),
            self.session.spec.total_size,
            self.session.parts.len(),
        );
        tracker.start(self.session.committed_bytes(), self.resumed_parts);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let path = self.session.spec.local_path.clone();
        let key = self.session.spec.object_key.clone();
        let ckpt_key = CheckpointKey::for_spec(&self.session.spec);

        let store = self.store;
        let checkpoints = self.checkpoints;
        let retry = &self.config.retry;
        let session = &mut self.session;

        let mut pool = TransferWorkerPool::new(self.config.concurrency);
        if let Some(flag) = &self.cancel {
            pool = pool.with_cancel(Arc::clone(flag));
        }

        let worker = |part: &PartDescriptor| -> TransferResult<String> {
            if part.length == 0 {
                return Ok(String::new());
            }
            let data = retry.run("get_range", |attempt| {
                debug!(part = part.index, attempt, offset = part.offset, "Fetching range");
                let data = store
                    .get_range(&key, part.offset, part.length)
                    .map_err(|e| TransferError::from_store("get_range", &key, e))?;
                if data.len() as u64 != part.length {
                    return Err(TransferError::Transient {
                        operation: "get_range".to_string(),
                        reason: format!(
                            "short read for part {}: expected {} bytes, got {}",
                            part.index,
                            part.length,
                            data.len()
                        ),
                    });
                }
                Ok(data)
            })?;
            // The range must be on disk before its commit is checkpointed.
            write_all_at(file, &data, part.offset)
                .and_then(|()| file.sync_data())
                .map_err(|e| TransferError::local_io(&path, e))?;
            Ok(String::new())
        };

        let mut save_failures = 0;
        let on_result = |result: &PartResult| -> Flow {
            match &result.status {
                PartStatus::Success => {
                    session.record(PartResult::success(result.index, String::new()));
                    let checkpoint = Checkpoint::from_state(session);
                    if let Err(e) = checkpoints.save(&ckpt_key, &checkpoint) {
                        save_failures += 1;
                        warn!(part = result.index, error = %e, "Failed to save checkpoint");
                    }
                    let length = session
                        .parts
                        .get(result.index as usize - 1)
                        .map_or(0, |p| p.length);
                    tracker.part_done(length);
                    Flow::Continue
                }
                PartStatus::Failed(e) => {
                    warn!(part = result.index, error = %e, "Range failed, stopping download");
                    Flow::Stop
                }
                PartStatus::Cancelled => Flow::Continue,
            }
        };

        let results = pool.run(&pending, worker, on_result);
        self.checkpoint_failures += save_failures;
        Ok(results)
    }

    /// Flush the file and confirm its length.
    fn finish(&self, file: &File) -> TransferResult<()> {
        let path = &self.session.spec.local_path;
        file.sync_all()
            .map_err(|e| TransferError::local_io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| TransferError::local_io(path, e))?
            .len();
        if len != self.session.spec.total_size {
            return Err(TransferError::local_io(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected {} bytes on disk, found {}",
                        self.session.spec.total_size, len
                    ),
                ),
            ));
        }
        Ok(())
    }

    /// Move to `Failed`. The partial file and checkpoint stay for a resume.
    fn fail(&mut self, results: Vec<PartResult>, cause: Option<TransferError>) -> TransferError {
        self.state = DownloadState::Failed;

        let mut failed = Vec::new();
        let mut cancelled = Vec::new();
        for result in results {
            match result.status {
                PartStatus::Failed(e) => failed.push((result.index, e)),
                PartStatus::Cancelled => cancelled.push(result.index),
                PartStatus::Success => {}
            }
        }
        info!(
            key = %self.key(),
            committed = self.session.committed_indices().len(),
            "Download stopped, partial file kept for resume"
        );

        TransferError::Incomplete(Box::new(IncompleteTransfer {
            key: self.key().to_string(),
            total_parts: self.session.parts.len(),
            committed: self.session.committed_indices(),
            failed,
            cancelled,
            cause,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryObjectStore;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &Path) -> TransferConfig {
        TransferConfig::new(dir.join("ckpt"))
            .with_part_size(8)
            .with_concurrency(3)
            .with_retry(RetryPolicy::fixed(3, Duration::ZERO))
    }

    #[test]
    fn test_download_reaches_done() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        let store = MemoryObjectStore::new();
        let data: Vec<u8> = (0..50u8).collect();
        store.insert("obj", data.clone());

        let dest = temp.path().join("nested").join("out.bin");
        let spec = TransferSpec::download("obj", &dest, 8);
        let mut session = DownloadSession::new(&store, &checkpoints, &config, spec).unwrap();
        assert_eq!(session.state(), DownloadState::SizeResolved);
        assert_eq!(session.total_size(), 50);

        let report = session.run().unwrap();
        assert_eq!(session.state(), DownloadState::Done);
        assert_eq!(report.parts, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert!(checkpoints.list().unwrap().is_empty());
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        let store = MemoryObjectStore::new();

        let spec = TransferSpec::download("missing", temp.path().join("out"), 8);
        let err = DownloadSession::new(&store, &checkpoints, &config, spec)
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::NotFound { ref key } if key == "missing"));
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_empty_object_downloads_as_empty_file() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        let store = MemoryObjectStore::new();
        store.insert("empty", Vec::new());

        let dest = temp.path().join("empty.bin");
        let spec = TransferSpec::download("empty", &dest, 8);
        let report = DownloadSession::new(&store, &checkpoints, &config, spec)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.parts, 1);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[test]
    fn test_existing_destination_is_overwritten() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path());
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        let store = MemoryObjectStore::new();
        store.insert("obj", b"fresh".to_vec());

        let dest = temp.path().join("out.bin");
        std::fs::write(&dest, b"stale contents that are longer").unwrap();

        let spec = TransferSpec::download("obj", &dest, 8);
        DownloadSession::new(&store, &checkpoints, &config, spec)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }
}
