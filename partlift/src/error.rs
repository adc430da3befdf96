//! Error types for transfer operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur while moving an object in parts.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Bad part size or malformed transfer spec. Never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Network or timeout failure on a single store operation.
    #[error("transient failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    /// A resumed upload identifier is no longer known to the store.
    #[error("upload {upload_id} for {key} is no longer valid")]
    StaleSession { key: String, upload_id: String },

    /// Authorization, quota or any other non-retryable store response.
    #[error("store rejected {operation}: {reason}")]
    FatalStore { operation: String, reason: String },

    /// Local filesystem failure reading a source or writing a range.
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The remote object does not exist.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// The session stopped before every part was committed.
    #[error("{0}")]
    Incomplete(Box<IncompleteTransfer>),
}

impl TransferError {
    /// Returns true if the operation may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Convert a store error raised by `operation` on `key`.
    pub(crate) fn from_store(operation: &str, key: &str, err: StoreError) -> Self {
        match err {
            StoreError::Transient(reason) => Self::Transient {
                operation: operation.to_string(),
                reason,
            },
            StoreError::Fatal(reason) => Self::FatalStore {
                operation: operation.to_string(),
                reason,
            },
            StoreError::NoSuchUpload(upload_id) => Self::StaleSession {
                key: key.to_string(),
                upload_id,
            },
            StoreError::NotFound(_) => Self::NotFound {
                key: key.to_string(),
            },
        }
    }
}

/// Which parts of an interrupted transfer committed and which did not.
///
/// Carries enough to resume: the committed indices are also in the
/// checkpoint unless the abort policy discarded it.
#[derive(Debug)]
pub struct IncompleteTransfer {
    /// Object key of the transfer.
    pub key: String,
    /// Total number of parts in the plan.
    pub total_parts: usize,
    /// Indices committed (including ones restored from a checkpoint).
    pub committed: Vec<u32>,
    /// Parts that failed, with the error that stopped them.
    pub failed: Vec<(u32, TransferError)>,
    /// Parts never dispatched because the session stopped submitting.
    pub cancelled: Vec<u32>,
    /// Session-level error that ended the transfer, if any
    /// (completion failure, stale session).
    pub cause: Option<TransferError>,
}

impl IncompleteTransfer {
    /// The first fatal error among failed parts or the session cause.
    pub fn first_error(&self) -> Option<&TransferError> {
        self.cause
            .as_ref()
            .or_else(|| self.failed.first().map(|(_, e)| e))
    }
}

impl fmt::Display for IncompleteTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transfer of {} incomplete: {} of {} parts committed",
            self.key,
            self.committed.len(),
            self.total_parts
        )?;
        if !self.failed.is_empty() {
            let indices: Vec<u32> = self.failed.iter().map(|(i, _)| *i).collect();
            write!(f, ", parts {:?} failed", indices)?;
        }
        if let Some(err) = self.first_error() {
            write!(f, " ({})", err)?;
        }
        Ok(())
    }
}
