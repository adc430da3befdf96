//! Directory-backed object store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/objects/<key>                  completed objects
//! <root>/uploads/<upload_id>/key        object key of an open upload
//! <root>/uploads/<upload_id>/00001.part staged part data
//! ```
//!
//! Keys may contain `/` and map to subdirectories. Parent traversal and
//! absolute keys are rejected.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use super::{
    check_completion_order, content_tag, ObjectInfo, ObjectStore, StoreError, StoreResult,
};
use crate::plan::PartDescriptor;

const OBJECTS_DIR: &str = "objects";
const UPLOADS_DIR: &str = "uploads";
const KEY_FILE: &str = "key";

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in [OBJECTS_DIR, UPLOADS_DIR] {
            fs::create_dir_all(root.join(dir)).map_err(io_error)?;
        }
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a completed object.
    pub fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(OBJECTS_DIR).join(key))
    }

    fn upload_dir(&self, upload_id: &str) -> StoreResult<PathBuf> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(self.root.join(UPLOADS_DIR).join(upload_id))
    }

    /// Directory of an open upload for `key`, or `NoSuchUpload`.
    fn open_upload(&self, key: &str, upload_id: &str) -> StoreResult<PathBuf> {
        let dir = self.upload_dir(upload_id)?;
        match fs::read_to_string(dir.join(KEY_FILE)) {
            Ok(stored) if stored == key => Ok(dir),
            Ok(_) => Err(StoreError::NoSuchUpload(upload_id.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NoSuchUpload(upload_id.to_string()))
            }
            Err(e) => Err(io_error(e)),
        }
    }
}

fn part_file(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{:05}.part", index))
}

/// Write `data` to a sibling temp file and rename it into place.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::Fatal("empty object key".to_string()));
    }
    let path = Path::new(key);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(StoreError::Fatal(format!("invalid object key: {}", key)));
            }
        }
    }
    Ok(())
}

fn io_error(e: io::Error) -> StoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => StoreError::Fatal(e.to_string()),
        _ => StoreError::Transient(e.to_string()),
    }
}

impl ObjectStore for FsObjectStore {
    fn initiate_upload(&self, key: &str) -> StoreResult<String> {
        validate_key(key)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.upload_dir(&upload_id)?;
        fs::create_dir_all(&dir).map_err(io_error)?;
        write_atomic(&dir.join(KEY_FILE), key.as_bytes()).map_err(io_error)?;
        debug!(key, upload_id = %upload_id, "Initiated upload");
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part: &PartDescriptor,
        data: &[u8],
    ) -> StoreResult<String> {
        if data.len() as u64 != part.length {
            return Err(StoreError::Fatal(format!(
                "part {} declared {} bytes but carried {}",
                part.index,
                part.length,
                data.len()
            )));
        }
        let dir = self.open_upload(key, upload_id)?;
        write_atomic(&part_file(&dir, part.index), data).map_err(io_error)?;
        Ok(content_tag(data))
    }

    fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> StoreResult<()> {
        let dir = self.open_upload(key, upload_id)?;
        check_completion_order(parts, |index| {
            fs::read(part_file(&dir, index)).ok().map(|d| content_tag(&d))
        })?;

        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let tmp = target.with_extension(format!("tmp-{}", upload_id));
        {
            let mut out = File::create(&tmp).map_err(io_error)?;
            for (index, _) in parts {
                let mut src = File::open(part_file(&dir, *index)).map_err(io_error)?;
                io::copy(&mut src, &mut out).map_err(io_error)?;
            }
            out.sync_all().map_err(io_error)?;
        }
        fs::rename(&tmp, &target).map_err(io_error)?;
        fs::remove_dir_all(&dir).map_err(io_error)?;
        debug!(key, upload_id, parts = parts.len(), "Completed upload");
        Ok(())
    }

    fn abort_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        let dir = self.open_upload(key, upload_id)?;
        fs::remove_dir_all(&dir).map_err(io_error)
    }

    fn upload_exists(&self, key: &str, upload_id: &str) -> StoreResult<bool> {
        match self.open_upload(key, upload_id) {
            Ok(_) => Ok(true),
            Err(StoreError::NoSuchUpload(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        let path = self.object_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(ObjectInfo::found(meta.len())),
            Ok(_) => Ok(ObjectInfo::missing()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ObjectInfo::missing()),
            Err(e) => Err(io_error(e)),
        }
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> StoreResult<Vec<u8>> {
        let path = self.object_path(key)?;
        let mut file = OpenOptions::new().read(true).open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                io_error(e)
            }
        })?;
        file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        let mut buf = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut buf).map_err(io_error)?;
        Ok(buf)
    }

    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.object_path(key)?;
        write_atomic(&path, data).map_err(io_error)
    }
}
