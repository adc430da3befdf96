//! In-memory object store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    check_completion_order, content_tag, ObjectInfo, ObjectStore, StoreError, StoreResult,
};
use crate::plan::PartDescriptor;

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    uploads: HashMap<String, PendingUpload>,
}

/// Object store keeping everything in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.inner.lock().objects.insert(key.into(), data);
    }

    /// Copy of an object's bytes, if present.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(key).cloned()
    }

    /// Number of multipart uploads still open.
    pub fn open_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }

    /// Indices staged so far for an open upload.
    pub fn staged_parts(&self, upload_id: &str) -> Vec<u32> {
        self.inner
            .lock()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn initiate_upload(&self, key: &str) -> StoreResult<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.inner.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
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
        let mut inner = self.inner.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        let tag = content_tag(data);
        upload.parts.insert(part.index, (tag.clone(), data.to_vec()));
        Ok(tag)
    }

    fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let upload = inner
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        check_completion_order(parts, |i| upload.parts.get(&i).map(|(t, _)| t.clone()))?;

        let mut object = Vec::new();
        for (index, _) in parts {
            if let Some((_, bytes)) = upload.parts.get(index) {
                object.extend_from_slice(bytes);
            }
        }
        inner.uploads.remove(upload_id);
        inner.objects.insert(key.to_string(), object);
        Ok(())
    }

    fn abort_upload(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }

    fn upload_exists(&self, key: &str, upload_id: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .uploads
            .get(upload_id)
            .is_some_and(|u| u.key == key))
    }

    fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        Ok(self
            .inner
            .lock()
            .objects
            .get(key)
            .map(|data| ObjectInfo::found(data.len() as u64))
            .unwrap_or_else(ObjectInfo::missing))
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> StoreResult<Vec<u8>> {
        let inner = self.inner.lock();
        let data = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let start = offset.min(data.len() as u64) as usize;
        let end = offset.saturating_add(length).min(data.len() as u64) as usize;
        Ok(data[start..end].to_vec())
    }

    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        self.insert(key, data.to_vec());
        Ok(())
    }
}
