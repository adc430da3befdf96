//! Resumable part transfers between local files and an object store.
//!
//! [`Transfer`] is the entry point. It picks between a single-shot put and a
//! multipart session, wires up checkpointing and progress, and shares one
//! cancellation flag across every session it starts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use partlift::{FsObjectStore, Transfer, TransferConfig, TransferSpec};
//!
//! let store = Arc::new(FsObjectStore::open("/srv/objects")?);
//! let transfer = Transfer::new(store, TransferConfig::default())?;
//!
//! let spec = TransferSpec::upload("backups/db.tar", "/var/backups/db.tar", 8 << 20)?;
//! let report = transfer.upload(&spec)?;
//! println!("uploaded {} parts", report.transferred_parts);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod checkpoint;
mod download;
mod io;
mod pool;
mod progress;
mod types;
mod upload;

pub use checkpoint::{Checkpoint, CheckpointKey, CheckpointManager};
pub use download::{DownloadSession, DownloadState};
pub use pool::{Flow, TransferWorkerPool};
pub use progress::ProgressCallback;
pub use types::{Direction, PartResult, PartStatus, SessionState, TransferSpec};
pub use upload::{UploadSession, UploadState};

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::store::ObjectStore;

/// Summary of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub key: String,
    pub total_bytes: u64,
    /// Parts in the plan (1 for a single-shot put).
    pub parts: usize,
    /// Parts moved by this run.
    pub transferred_parts: usize,
    /// Parts skipped because a checkpoint already had them.
    pub resumed_parts: usize,
    pub single_shot: bool,
    pub upload_id: Option<String>,
    /// Checkpoint writes that failed. Parts committed while the checkpoint
    /// could not be written would be uploaded again after a crash.
    pub checkpoint_failures: usize,
}

/// Blocking transfer client over an [`ObjectStore`].
pub struct Transfer {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    checkpoints: CheckpointManager,
    progress: Option<Arc<ProgressCallback>>,
    cancel: Arc<AtomicBool>,
}

impl Transfer {
    /// Create a client. Fails if `config` is invalid.
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> TransferResult<Self> {
        config.validate()?;
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        Ok(Self {
            store,
            config,
            checkpoints,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Report progress of every transfer through `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Flag that stops dispatching new parts once set. In-flight parts
    /// finish and the transfer returns [`TransferError::Incomplete`].
    ///
    /// The flag is cleared whenever [`upload`](Self::upload) or
    /// [`download`](Self::download) returns, so a cancellation stops the
    /// running (or next) transfer only and the client stays usable.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation of the running transfer.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Upload a local file. Files under the single-shot threshold go up in
    /// one put; everything else is a resumable multipart upload.
    pub fn upload(&self, spec: &TransferSpec) -> TransferResult<TransferReport> {
        let result = self.run_upload(spec);
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    /// Download an object into `spec.local_path`.
    pub fn download(&self, spec: &TransferSpec) -> TransferResult<TransferReport> {
        let result = self.run_download(spec);
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    fn run_upload(&self, spec: &TransferSpec) -> TransferResult<TransferReport> {
        spec.validate()?;
        spec.expect_direction(Direction::Upload)?;

        let threshold = self.config.single_shot_threshold;
        if threshold > 0 && spec.total_size < threshold {
            return self.put(spec);
        }

        let mut session = UploadSession::new(
            self.store.as_ref(),
            &self.checkpoints,
            &self.config,
            spec.clone(),
        )?
        .with_cancel(Arc::clone(&self.cancel));
        if let Some(cb) = &self.progress {
            session = session.with_progress(Arc::clone(cb));
        }
        session.run()
    }

    fn run_download(&self, spec: &TransferSpec) -> TransferResult<TransferReport> {
        let mut session = DownloadSession::new(
            self.store.as_ref(),
            &self.checkpoints,
            &self.config,
            spec.clone(),
        )?
        .with_cancel(Arc::clone(&self.cancel));
        if let Some(cb) = &self.progress {
            session = session.with_progress(Arc::clone(cb));
        }
        session.run()
    }

    /// Upload a local file in a single request, without checkpointing.
    pub fn put(&self, spec: &TransferSpec) -> TransferResult<TransferReport> {
        spec.validate()?;
        spec.expect_direction(Direction::Upload)?;

        let data = fs::read(&spec.local_path)
            .map_err(|e| TransferError::local_io(&spec.local_path, e))?;
        let key = spec.object_key.as_str();
        self.config.retry.run("put_object", |_| {
            self.store
                .put_object(key, &data)
                .map_err(|e| TransferError::from_store("put_object", key, e))
        })?;

        let total = data.len() as u64;
        if let Some(cb) = &self.progress {
            cb(total, total, 1, 1);
        }
        info!(key = %key, bytes = total, "Uploaded object in a single request");

        Ok(TransferReport {
            key: key.to_string(),
            total_bytes: total,
            parts: 1,
            transferred_parts: 1,
            resumed_parts: 0,
            single_shot: true,
            upload_id: None,
            checkpoint_failures: 0,
        })
    }
}

/// Unique object key for `path`: a random hex id, `_`, then the file name.
pub fn generate_object_key(path: &Path) -> TransferResult<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            TransferError::InvalidConfig(format!("{} has no usable file name", path.display()))
        })?;
    Ok(format!("{}_{}", Uuid::new_v4().simple(), name))
}
