//! Object store capability consumed by the transfer engine.
//!
//! The engine only needs a handful of operations from a blob store: the
//! multipart upload lifecycle, a size probe, ranged reads, and a single-shot
//! put for small objects. Everything store-specific (authentication,
//! signing, transport) lives behind [`ObjectStore`].
//!
//! Two implementations ship with the crate:
//!
//! - [`FsObjectStore`]: objects are files under a root directory; staged
//!   parts live in a per-upload directory until completion.
//! - [`MemoryObjectStore`]: objects are byte vectors in a map.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use thiserror::Error;

use crate::plan::PartDescriptor;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by an object store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network failure, timeout or throttling. Worth retrying.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Authorization, quota or a malformed request. Not worth retrying.
    #[error("store error: {0}")]
    Fatal(String),

    /// The upload identifier is unknown (aborted, completed or expired).
    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    /// The object does not exist.
    #[error("no such object: {0}")]
    NotFound(String),
}

/// Result of a metadata probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectInfo {
    /// Whether the object exists.
    pub exists: bool,
    /// Object size in bytes (0 when absent).
    pub size: u64,
}

impl ObjectInfo {
    /// Info for an existing object of `size` bytes.
    pub fn found(size: u64) -> Self {
        Self { exists: true, size }
    }

    /// Info for a missing object.
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Blob store operations used by upload and download sessions.
///
/// Implementations are shared by reference across worker threads, so every
/// method takes `&self`.
pub trait ObjectStore: Send + Sync {
    /// Start a multipart upload and return its opaque identifier.
    fn initiate_upload(&self, key: &str) -> StoreResult<String>;

    /// Stage one part. Returns the part's tag (content fingerprint).
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part: &PartDescriptor,
        data: &[u8],
    ) -> StoreResult<String>;

    /// Assemble the staged parts. `parts` is `(index, tag)` in ascending
    /// index order.
    fn complete_upload(&self, key: &str, upload_id: &str, parts: &[(u32, String)])
        -> StoreResult<()>;

    /// Discard a multipart upload and its staged parts.
    fn abort_upload(&self, key: &str, upload_id: &str) -> StoreResult<()>;

    /// Whether `upload_id` still refers to an open multipart upload.
    fn upload_exists(&self, key: &str, upload_id: &str) -> StoreResult<bool>;

    /// Probe object existence and size.
    fn head_object(&self, key: &str) -> StoreResult<ObjectInfo>;

    /// Read `length` bytes starting at `offset`.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> StoreResult<Vec<u8>>;

    /// Write a whole object in one request.
    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<()>;
}

/// Hex SHA-256 digest used as a part tag by the bundled stores.
pub(crate) fn content_tag(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(data))
}

/// Reject a completion list that is not strictly ascending and contiguous
/// from 1, or that names parts never staged.
pub(crate) fn check_completion_order(
    parts: &[(u32, String)],
    staged: impl Fn(u32) -> Option<String>,
) -> StoreResult<()> {
    if parts.is_empty() {
        return Err(StoreError::Fatal("completion requires at least one part".into()));
    }
    for (position, (index, tag)) in parts.iter().enumerate() {
        if *index as usize != position + 1 {
            return Err(StoreError::Fatal(format!(
                "part {} listed at position {}; parts must be in ascending order",
                index,
                position + 1
            )));
        }
        match staged(*index) {
            Some(ref staged_tag) if staged_tag == tag => {}
            Some(_) => {
                return Err(StoreError::Fatal(format!("tag mismatch for part {}", index)));
            }
            None => {
                return Err(StoreError::Fatal(format!("part {} was never uploaded", index)));
            }
        }
    }
    Ok(())
}
