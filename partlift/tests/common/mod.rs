//! Shared helpers for integration tests.
//!
//! [`FaultyStore`] wraps a [`MemoryObjectStore`] and injects scripted
//! failures, delays and short reads per part, while recording which store
//! calls were made.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use partlift::plan::PartDescriptor;
use partlift::store::{MemoryObjectStore, ObjectInfo, ObjectStore, StoreError, StoreResult};
use partlift::{RetryPolicy, TransferConfig};

/// A scripted misbehaviour for one store call.
#[derive(Debug, Clone)]
pub enum Fault {
    Error(StoreError),
    /// Return one byte less than requested (ranged reads only).
    Short,
}

pub fn transient(reason: &str) -> Fault {
    Fault::Error(StoreError::Transient(reason.to_string()))
}

pub fn fatal(reason: &str) -> Fault {
    Fault::Error(StoreError::Fatal(reason.to_string()))
}

#[derive(Default)]
struct Script {
    part_faults: HashMap<u32, VecDeque<Fault>>,
    range_faults: HashMap<u64, VecDeque<Fault>>,
    range_delays: HashMap<u64, Duration>,
}

#[derive(Default)]
struct Calls {
    initiated: Vec<String>,
    part_attempts: HashMap<u32, usize>,
    uploaded: Vec<u32>,
    completions: Vec<Vec<(u32, String)>>,
    aborted: Vec<String>,
    ranges: Vec<u64>,
}

/// Memory store with fault injection and call recording.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryObjectStore,
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &MemoryObjectStore {
        &self.inner
    }

    /// Queue faults for `upload_part` on part `index`, consumed in order.
    pub fn fail_part(&self, index: u32, faults: impl IntoIterator<Item = Fault>) {
        self.script
            .lock()
            .part_faults
            .entry(index)
            .or_default()
            .extend(faults);
    }

    /// Queue faults for `get_range` starting at `offset`.
    pub fn fail_range(&self, offset: u64, faults: impl IntoIterator<Item = Fault>) {
        self.script
            .lock()
            .range_faults
            .entry(offset)
            .or_default()
            .extend(faults);
    }

    /// Delay every `get_range` starting at `offset`.
    pub fn delay_range(&self, offset: u64, delay: Duration) {
        self.script.lock().range_delays.insert(offset, delay);
    }

    pub fn clear_faults(&self) {
        let mut script = self.script.lock();
        script.part_faults.clear();
        script.range_faults.clear();
    }

    pub fn initiated(&self) -> Vec<String> {
        self.calls.lock().initiated.clone()
    }

    /// Successful `upload_part` calls, in completion order.
    pub fn uploaded(&self) -> Vec<u32> {
        self.calls.lock().uploaded.clone()
    }

    pub fn attempts(&self, index: u32) -> usize {
        self.calls
            .lock()
            .part_attempts
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    pub fn completions(&self) -> Vec<Vec<(u32, String)>> {
        self.calls.lock().completions.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.calls.lock().aborted.clone()
    }

    /// Offsets of successful `get_range` calls.
    pub fn ranges(&self) -> Vec<u64> {
        self.calls.lock().ranges.clone()
    }

    pub fn reset_calls(&self) {
        *self.calls.lock() = Calls::default();
    }

    fn next_part_fault(&self, index: u32) -> Option<Fault> {
        self.script
            .lock()
            .part_faults
            .get_mut(&index)
            .and_then(VecDeque::pop_front)
    }

    fn next_range_fault(&self, offset: u64) -> Option<Fault> {
        self.script
            .lock()
            .range_faults
            .get_mut(&offset)
            .and_then(VecDeque::pop_front)
    }
}

impl ObjectStore for FaultyStore {
    fn initiate_upload(&self, key: &str) -> StoreResult<String> {
        let id = self.inner.initiate_upload(key)?;
        self.calls.lock().initiated.push(id.clone());
        Ok(id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part: &PartDescriptor,
        data: &[u8],
    ) -> StoreResult<String> {
        *self
            .calls
            .lock()
            .part_attempts
            .entry(part.index)
            .or_default() += 1;

        match self.next_part_fault(part.index) {
            Some(Fault::Error(e)) => return Err(e),
            Some(Fault::Short) | None => {}
        }

        let tag = self.inner.upload_part(key, upload_id, part, data)?;
        self.calls.lock().uploaded.push(part.index);
        Ok(tag)
    }

    fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> StoreResult<()> {
        self.calls.lock().completions.push(parts.to_vec());
        self.inner.complete_upload(key, upload_id, parts)
    }

    fn abort_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.calls.lock().aborted.push(upload_id.to_string());
        self.inner.abort_upload(key, upload_id)
    }

    fn upload_exists(&self, key: &str, upload_id: &str) -> StoreResult<bool> {
        self.inner.upload_exists(key, upload_id)
    }

    fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        self.inner.head_object(key)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> StoreResult<Vec<u8>> {
        let delay = self.script.lock().range_delays.get(&offset).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let fault = self.next_range_fault(offset);
        if let Some(Fault::Error(e)) = fault {
            return Err(e);
        }

        let mut data = self.inner.get_range(key, offset, length)?;
        if matches!(fault, Some(Fault::Short)) {
            data.pop();
            return Ok(data);
        }
        self.calls.lock().ranges.push(offset);
        Ok(data)
    }

    fn put_object(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        self.inner.put_object(key, data)
    }
}

/// Config with small parts and zero-delay retries.
pub fn test_config(dir: &Path, part_size: u64, concurrency: usize) -> TransferConfig {
    TransferConfig::new(dir.join("checkpoints"))
        .with_part_size(part_size)
        .with_concurrency(concurrency)
        .with_retry(RetryPolicy::fixed(3, Duration::ZERO))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

/// Write `data` to `name` under `dir` and return the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write test file");
    path
}
