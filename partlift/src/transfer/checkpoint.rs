//! Durable record of committed parts, used to resume a transfer.
//!
//! One JSON file per (object key, local path) pair. Records are replaced
//! atomically (write to a temp file, then rename) so a crash mid-save leaves
//! either the old or the new record, never a torn one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{TransferError, TransferResult};

use super::types::{Direction, SessionState, TransferSpec};

const RECORD_EXTENSION: &str = "json";

/// Persisted progress of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub object_key: String,
    pub local_path: PathBuf,
    pub direction: Direction,
    /// Multipart upload identifier; absent for downloads.
    pub upload_id: Option<String>,
    pub total_size: u64,
    pub part_size: u64,
    /// Committed parts: index to tag (empty tag for downloaded ranges).
    pub parts: BTreeMap<u32, String>,
    /// Modification time of the upload source when its parts were read.
    /// A resume requires the file to be unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot the committed parts of `state`.
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            object_key: state.spec.object_key.clone(),
            local_path: state.spec.local_path.clone(),
            direction: state.spec.direction,
            upload_id: state.upload_id.clone(),
            total_size: state.spec.total_size,
            part_size: state.spec.part_size,
            parts: state.committed_map(),
            source_modified: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_source_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.source_modified = modified;
        self
    }

    /// Whether this record describes the same transfer layout as `spec`.
    pub fn matches(&self, spec: &TransferSpec) -> bool {
        self.object_key == spec.object_key
            && self.local_path == spec.local_path
            && self.direction == spec.direction
            && self.total_size == spec.total_size
            && self.part_size == spec.part_size
    }

    pub fn key(&self) -> CheckpointKey {
        CheckpointKey::new(self.object_key.clone(), self.local_path.clone())
    }

    /// Bytes covered by the recorded parts.
    pub fn committed_bytes(&self) -> u64 {
        let last_index = self.total_size.div_ceil(self.part_size.max(1)).max(1);
        self.parts
            .keys()
            .map(|&index| {
                let offset = u64::from(index.saturating_sub(1)) * self.part_size;
                if u64::from(index) == last_index {
                    self.total_size.saturating_sub(offset)
                } else {
                    self.part_size
                }
            })
            .sum()
    }
}

/// Identity of a checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub object_key: String,
    pub local_path: PathBuf,
}

impl CheckpointKey {
    pub fn new(object_key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            object_key: object_key.into(),
            local_path: local_path.into(),
        }
    }

    pub fn for_spec(spec: &TransferSpec) -> Self {
        Self::new(spec.object_key.clone(), spec.local_path.clone())
    }

    /// Record file name: hex SHA-256 of `object_key \0 local_path`.
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.object_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.local_path.to_string_lossy().as_bytes());
        format!("{:x}.{}", hasher.finalize(), RECORD_EXTENSION)
    }
}

/// Loads, saves and clears checkpoint records in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Load the record for `key`.
    ///
    /// A missing record is `Ok(None)`. A record that cannot be parsed, or
    /// that belongs to a different key, is logged and also treated as
    /// absent.
    pub fn load(&self, key: &CheckpointKey) -> TransferResult<Option<Checkpoint>> {
        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransferError::local_io(path, e)),
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(checkpoint) if checkpoint.key() == *key => {
                debug!(
                    key = %key.object_key,
                    parts = checkpoint.parts.len(),
                    "Loaded checkpoint"
                );
                Ok(Some(checkpoint))
            }
            Ok(_) => {
                warn!(path = %path.display(), "Checkpoint belongs to another transfer, ignoring");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt checkpoint, ignoring");
                Ok(None)
            }
        }
    }

    /// Replace the record for `key`.
    pub fn save(&self, key: &CheckpointKey, checkpoint: &Checkpoint) -> TransferResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TransferError::local_io(&self.dir, e))?;

        let path = self.record_path(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| {
            TransferError::local_io(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            TransferError::local_io(&path, e)
        })?;

        debug!(key = %key.object_key, parts = checkpoint.parts.len(), "Saved checkpoint");
        Ok(())
    }

    /// Delete the record for `key`. Clearing a missing record is not an error.
    pub fn clear(&self, key: &CheckpointKey) -> TransferResult<()> {
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key.object_key, "Cleared checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::local_io(path, e)),
        }
    }

    /// All readable records, oldest first.
    pub fn list(&self) -> TransferResult<Vec<Checkpoint>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferError::local_io(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| TransferError::local_io(&self.dir, e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<Checkpoint>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(checkpoint) => records.push(checkpoint),
                Err(error) => {
                    warn!(path = %path.display(), %error, "Skipping unreadable checkpoint")
                }
            }
        }
        records.sort_by_key(|c| c.updated_at);
        Ok(records)
    }
}
