//! Transfer specs, part results and per-session state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};
use crate::plan::{plan, PartDescriptor};

/// Which way the bytes move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

/// What to transfer, where, and in which part size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub object_key: String,
    pub local_path: PathBuf,
    /// Object size. For downloads this is resolved from the store.
    pub total_size: u64,
    pub part_size: u64,
    pub direction: Direction,
}

impl TransferSpec {
    /// Spec for uploading `local_path`, sized from the file on disk.
    pub fn upload(
        object_key: impl Into<String>,
        local_path: impl Into<PathBuf>,
        part_size: u64,
    ) -> TransferResult<Self> {
        let local_path = local_path.into();
        let meta = fs::metadata(&local_path)
            .map_err(|e| TransferError::local_io(local_path.clone(), e))?;
        if !meta.is_file() {
            return Err(TransferError::InvalidConfig(format!(
                "{} is not a regular file",
                local_path.display()
            )));
        }
        let spec = Self {
            object_key: object_key.into(),
            local_path,
            total_size: meta.len(),
            part_size,
            direction: Direction::Upload,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Spec for downloading into `local_path`. The size is filled in once
    /// the session has queried the store.
    pub fn download(
        object_key: impl Into<String>,
        local_path: impl Into<PathBuf>,
        part_size: u64,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            local_path: local_path.into(),
            total_size: 0,
            part_size,
            direction: Direction::Download,
        }
    }

    /// Reject an empty key or path and a zero part size.
    pub fn validate(&self) -> TransferResult<()> {
        if self.object_key.trim().is_empty() {
            return Err(TransferError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(TransferError::InvalidConfig(
                "local path must not be empty".to_string(),
            ));
        }
        if self.part_size == 0 {
            return Err(TransferError::InvalidConfig(
                "part size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn expect_direction(&self, direction: Direction) -> TransferResult<()> {
        if self.direction != direction {
            return Err(TransferError::InvalidConfig(format!(
                "{:?} spec passed to a {:?} operation",
                self.direction, direction
            )));
        }
        Ok(())
    }
}

/// Outcome of a single part.
#[derive(Debug)]
pub enum PartStatus {
    Success,
    Failed(TransferError),
    /// Never dispatched: the session stopped submitting first.
    Cancelled,
}

/// Receipt for one part.
#[derive(Debug)]
pub struct PartResult {
    pub index: u32,
    /// Store tag for uploaded parts; empty for downloaded ranges.
    pub tag: String,
    pub status: PartStatus,
}

impl PartResult {
    pub fn success(index: u32, tag: impl Into<String>) -> Self {
        Self {
            index,
            tag: tag.into(),
            status: PartStatus::Success,
        }
    }

    pub fn failed(index: u32, error: TransferError) -> Self {
        Self {
            index,
            tag: String::new(),
            status: PartStatus::Failed(error),
        }
    }

    pub fn cancelled(index: u32) -> Self {
        Self {
            index,
            tag: String::new(),
            status: PartStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, PartStatus::Success)
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.status {
            PartStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Progress of one session: the part table and what has committed.
///
/// Owned by the session that created it and mutated only from its
/// aggregation step.
#[derive(Debug)]
pub struct SessionState {
    /// Store-issued upload identifier (uploads only).
    pub upload_id: Option<String>,
    pub spec: TransferSpec,
    pub parts: Vec<PartDescriptor>,
    pub completed: BTreeMap<u32, PartResult>,
}

impl SessionState {
    /// Plan parts for `spec`.
    pub fn new(spec: TransferSpec) -> TransferResult<Self> {
        let parts = plan(spec.total_size, spec.part_size)?;
        Ok(Self {
            upload_id: None,
            spec,
            parts,
            completed: BTreeMap::new(),
        })
    }

    /// Merge a part outcome. A success is never replaced by a later failure.
    pub fn record(&mut self, result: PartResult) {
        if matches!(result.status, PartStatus::Cancelled) {
            return;
        }
        if self.is_committed(result.index) {
            return;
        }
        self.completed.insert(result.index, result);
    }

    pub fn is_committed(&self, index: u32) -> bool {
        self.completed.get(&index).is_some_and(PartResult::is_success)
    }

    /// Parts not yet committed, in index order.
    pub fn pending_parts(&self) -> Vec<PartDescriptor> {
        self.parts
            .iter()
            .filter(|p| !self.is_committed(p.index))
            .copied()
            .collect()
    }

    /// Committed part indices, ascending.
    pub fn committed_indices(&self) -> Vec<u32> {
        self.completed
            .values()
            .filter(|r| r.is_success())
            .map(|r| r.index)
            .collect()
    }

    /// Bytes covered by committed parts.
    pub fn committed_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| self.is_committed(p.index))
            .map(|p| p.length)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|p| self.is_committed(p.index))
    }

    /// `(index, tag)` of committed parts in ascending index order.
    pub fn ordered_tags(&self) -> Vec<(u32, String)> {
        self.completed
            .values()
            .filter(|r| r.is_success())
            .map(|r| (r.index, r.tag.clone()))
            .collect()
    }

    /// Committed tags as stored in a checkpoint.
    pub fn committed_map(&self) -> BTreeMap<u32, String> {
        self.ordered_tags().into_iter().collect()
    }

    /// Mark parts from a checkpoint as committed. Indices outside the
    /// plan are ignored. Returns how many were restored.
    pub fn restore(&mut self, committed: &BTreeMap<u32, String>) -> usize {
        let max = self.parts.len() as u32;
        let mut restored = 0;
        for (index, tag) in committed {
            if (1..=max).contains(index) {
                self.completed
                    .insert(*index, PartResult::success(*index, tag.clone()));
                restored += 1;
            }
        }
        restored
    }

    pub fn local_path(&self) -> &Path {
        &self.spec.local_path
    }
}
