//! Multipart upload session.
//!
//! ```text
//! Initiated -> PartsInFlight -> Completing -> Done
//!                   |               |
//!                   +---------------+--> Aborted
//! ```
//!
//! A session resumes from its checkpoint when one exists, the source file has
//! not been modified since, and the store still knows the recorded upload
//! id. Every committed part is written to the checkpoint before the next
//! result is processed.

use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{AbortPolicy, TransferConfig};
use crate::error::{IncompleteTransfer, TransferError, TransferResult};
use crate::plan::PartDescriptor;
use crate::store::ObjectStore;

use super::checkpoint::{Checkpoint, CheckpointKey, CheckpointManager};
use super::io::read_exact_at;
use super::pool::{Flow, TransferWorkerPool};
use super::progress::{ProgressCallback, ProgressTracker};
use super::types::{Direction, PartResult, PartStatus, SessionState, TransferSpec};
use super::TransferReport;

/// Lifecycle of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    PartsInFlight,
    Completing,
    Done,
    Aborted,
}

/// Uploads one local file as a multipart object.
pub struct UploadSession<'a> {
    store: &'a dyn ObjectStore,
    checkpoints: &'a CheckpointManager,
    config: &'a TransferConfig,
    session: SessionState,
    state: UploadState,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Option<Arc<AtomicBool>>,
    resumed_parts: usize,
    source_modified: Option<DateTime<Utc>>,
    checkpoint_failures: usize,
}

impl<'a> UploadSession<'a> {
    /// Plan an upload of `spec`.
    pub fn new(
        store: &'a dyn ObjectStore,
        checkpoints: &'a CheckpointManager,
        config: &'a TransferConfig,
        spec: TransferSpec,
    ) -> TransferResult<Self> {
        config.validate()?;
        spec.validate()?;
        spec.expect_direction(Direction::Upload)?;

        Ok(Self {
            store,
            checkpoints,
            config,
            session: SessionState::new(spec)?,
            state: UploadState::Initiated,
            progress: None,
            cancel: None,
            resumed_parts: 0,
            source_modified: None,
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

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    fn key(&self) -> &str {
        &self.session.spec.object_key
    }

    fn checkpoint_key(&self) -> CheckpointKey {
        CheckpointKey::for_spec(&self.session.spec)
    }

    /// Drive the upload to `Done` or `Aborted`.
    pub fn run(&mut self) -> TransferResult<TransferReport> {
        if let Err(e) = self.initiate() {
            return Err(self.abort(Vec::new(), Some(e)));
        }

        self.state = UploadState::PartsInFlight;
        let results = match self.transfer_parts() {
            Ok(results) => results,
            Err(e) => return Err(self.abort(Vec::new(), Some(e))),
        };
        if !self.session.is_complete() {
            return Err(self.abort(results, None));
        }

        self.state = UploadState::Completing;
        if let Err(e) = self.complete() {
            return Err(self.abort(Vec::new(), Some(e)));
        }

        if let Err(e) = self.checkpoints.clear(&self.checkpoint_key()) {
            warn!(key = %self.key(), error = %e, "Failed to clear checkpoint");
        }
        self.state = UploadState::Done;

        let report = TransferReport {
            key: self.key().to_string(),
            total_bytes: self.session.spec.total_size,
            parts: self.session.parts.len(),
            transferred_parts: self.session.parts.len() - self.resumed_parts,
            resumed_parts: self.resumed_parts,
            single_shot: false,
            upload_id: self.session.upload_id.clone(),
            checkpoint_failures: self.checkpoint_failures,
        };
        info!(
            key = %report.key,
            bytes = report.total_bytes,
            parts = report.parts,
            resumed = report.resumed_parts,
            "Upload complete"
        );
        Ok(report)
    }

    /// Resume from a checkpoint or start a new multipart upload.
    fn initiate(&mut self) -> TransferResult<()> {
        self.source_modified = source_modified(&self.session.spec.local_path)?;

        match self.restore_checkpoint() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(TransferError::StaleSession { upload_id, .. }) => {
                warn!(
                    key = %self.key(),
                    upload_id = %upload_id,
                    "Checkpointed upload no longer exists, starting over"
                );
                self.checkpoints.clear(&self.checkpoint_key())?;
            }
            Err(e) => return Err(e),
        }

        let key = self.session.spec.object_key.clone();
        let upload_id = self.config.retry.run("initiate_upload", |_| {
            self.store
                .initiate_upload(&key)
                .map_err(|e| TransferError::from_store("initiate_upload", &key, e))
        })?;
        info!(
            key = %key,
            upload_id = %upload_id,
            parts = self.session.parts.len(),
            "Initiated multipart upload"
        );
        self.session.upload_id = Some(upload_id);
        Ok(())
    }

    /// Returns true if committed parts were restored.
    fn restore_checkpoint(&mut self) -> TransferResult<bool> {
        let ckpt_key = self.checkpoint_key();
        let Some(checkpoint) = self.checkpoints.load(&ckpt_key)? else {
            return Ok(false);
        };

        let upload_id = match checkpoint.upload_id.clone() {
            Some(id) if checkpoint.matches(&self.session.spec) => id,
            _ => {
                info!(key = %self.key(), "Checkpoint does not match this upload, discarding");
                self.discard_checkpoint(&ckpt_key, checkpoint.upload_id.as_deref())?;
                return Ok(false);
            }
        };
        if checkpoint.source_modified != self.source_modified {
            info!(
                key = %self.key(),
                path = %self.session.spec.local_path.display(),
                "Source file changed since the checkpoint, starting over"
            );
            self.discard_checkpoint(&ckpt_key, Some(upload_id.as_str()))?;
            return Ok(false);
        }

        let key = self.session.spec.object_key.clone();
        let exists = self.config.retry.run("upload_exists", |_| {
            self.store
                .upload_exists(&key, &upload_id)
                .map_err(|e| TransferError::from_store("upload_exists", &key, e))
        })?;
        if !exists {
            return Err(TransferError::StaleSession { key, upload_id });
        }

        self.resumed_parts = self.session.restore(&checkpoint.parts);
        self.session.upload_id = Some(upload_id);
        info!(
            key = %key,
            resumed = self.resumed_parts,
            parts = self.session.parts.len(),
            "Resuming upload from checkpoint"
        );
        Ok(true)
    }

    /// Drop a checkpoint that cannot be resumed and release the upload it
    /// points at.
    fn discard_checkpoint(
        &self,
        ckpt_key: &CheckpointKey,
        upload_id: Option<&str>,
    ) -> TransferResult<()> {
        if let Some(upload_id) = upload_id {
            if let Err(e) = self.store.abort_upload(self.key(), upload_id) {
                debug!(
                    key = %self.key(),
                    upload_id,
                    error = %e,
                    "Could not abort superseded upload"
                );
            }
        }
        self.checkpoints.clear(ckpt_key)
    }

    fn transfer_parts(&mut self) -> TransferResult<Vec<PartResult>> {
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
        let file = File::open(&path).map_err(|e| TransferError::local_io(&path, e))?;
        let key = self.session.spec.object_key.clone();
        let upload_id = self.session.upload_id.clone().unwrap_or_default();
        let ckpt_key = self.checkpoint_key();
        let source_modified = self.source_modified;

        let store = self.store;
        let checkpoints = self.checkpoints;
        let retry = &self.config.retry;
        let session = &mut self.session;

        let mut pool = TransferWorkerPool::new(self.config.concurrency);
        if let Some(flag) = &self.cancel {
            pool = pool.with_cancel(Arc::clone(flag));
        }

        let worker = |part: &PartDescriptor| -> TransferResult<String> {
            let mut buf = vec![0u8; part.length as usize];
            read_exact_at(&file, &mut buf, part.offset)
                .map_err(|e| TransferError::local_io(&path, e))?;
            retry.run("upload_part", |attempt| {
                debug!(part = part.index, attempt, bytes = part.length, "Uploading part");
                store
                    .upload_part(&key, &upload_id, part, &buf)
                    .map_err(|e| TransferError::from_store("upload_part", &key, e))
            })
        };

        let mut save_failures = 0;
        let on_result = |result: &PartResult| -> Flow {
            match &result.status {
                PartStatus::Success => {
                    session.record(PartResult::success(result.index, result.tag.clone()));
                    let checkpoint =
                        Checkpoint::from_state(session).with_source_modified(source_modified);
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
                    warn!(part = result.index, error = %e, "Part failed, stopping upload");
                    Flow::Stop
                }
                PartStatus::Cancelled => Flow::Continue,
            }
        };

        let results = pool.run(&pending, worker, on_result);
        self.checkpoint_failures += save_failures;
        Ok(results)
    }

    fn complete(&mut self) -> TransferResult<()> {
        let key = self.session.spec.object_key.clone();
        let upload_id = self.session.upload_id.clone().unwrap_or_default();
        let tags = self.session.ordered_tags();
        debug!(key = %key, parts = tags.len(), "Completing upload");

        self.config.retry.run("complete_upload", |_| {
            self.store
                .complete_upload(&key, &upload_id, &tags)
                .map_err(|e| TransferError::from_store("complete_upload", &key, e))
        })
    }

    /// Move to `Aborted`, apply the abort policy, and build the error.
    fn abort(&mut self, results: Vec<PartResult>, cause: Option<TransferError>) -> TransferError {
        self.state = UploadState::Aborted;

        let mut failed = Vec::new();
        let mut cancelled = Vec::new();
        for result in results {
            match result.status {
                PartStatus::Failed(e) => failed.push((result.index, e)),
                PartStatus::Cancelled => cancelled.push(result.index),
                PartStatus::Success => {}
            }
        }

        let stale = cause
            .iter()
            .chain(failed.iter().map(|(_, e)| e))
            .any(|e| matches!(e, TransferError::StaleSession { .. }));
        let ckpt_key = self.checkpoint_key();

        if stale || self.config.abort_policy == AbortPolicy::Discard {
            if !stale {
                if let Some(upload_id) = &self.session.upload_id {
                    match self.store.abort_upload(self.key(), upload_id) {
                        Ok(()) => {
                            info!(key = %self.key(), upload_id = %upload_id, "Aborted upload")
                        }
                        Err(e) => warn!(key = %self.key(), error = %e, "Failed to abort upload"),
                    }
                }
            }
            if let Err(e) = self.checkpoints.clear(&ckpt_key) {
                warn!(key = %self.key(), error = %e, "Failed to clear checkpoint");
            }
        } else {
            info!(
                key = %self.key(),
                committed = self.session.committed_indices().len(),
                "Upload stopped, checkpoint retained for resume"
            );
        }

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

/// Modification time of the upload source, when the platform reports one.
fn source_modified(path: &Path) -> TransferResult<Option<DateTime<Utc>>> {
    let metadata = fs::metadata(path).map_err(|e| TransferError::local_io(path, e))?;
    Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
}
