//! Integration tests for ranged downloads: out-of-order completion, short
//! reads, failure and resume.
//!
//! Run with: `cargo test --test download`

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tempfile::TempDir;

use common::{fatal, random_bytes, test_config, transient, Fault, FaultyStore};
use partlift::transfer::{CheckpointKey, CheckpointManager};
use partlift::{Transfer, TransferError, TransferSpec};

const PART: u64 = 100;

#[test]
fn out_of_order_completion_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(12 * PART as usize + 37);
    store.inner().insert("obj", data.clone());

    // Random per-range delays scramble the completion order.
    let mut delays: Vec<u64> = (0..13).collect();
    delays.shuffle(&mut rand::rng());
    for (part, delay) in delays.into_iter().enumerate() {
        store.delay_range(part as u64 * PART, Duration::from_millis(delay * 2));
    }

    let dest = temp.path().join("out.bin");
    let transfer = Transfer::new(store.clone(), test_config(temp.path(), PART, 6)).unwrap();
    let report = transfer
        .download(&TransferSpec::download("obj", &dest, PART))
        .unwrap();

    assert_eq!(report.parts, 13);
    assert_eq!(report.total_bytes, data.len() as u64);
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn concurrency_does_not_change_the_result() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(9 * PART as usize);
    store.inner().insert("obj", data.clone());

    for concurrency in [1, 8] {
        let dest = temp.path().join(format!("out-{concurrency}.bin"));
        let transfer =
            Transfer::new(store.clone(), test_config(temp.path(), PART, concurrency)).unwrap();
        transfer
            .download(&TransferSpec::download("obj", &dest, PART))
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), data);
    }
}

#[test]
fn short_read_is_retried() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(3 * PART as usize);
    store.inner().insert("obj", data.clone());
    store.fail_range(PART, [Fault::Short, transient("reset")]);

    let dest = temp.path().join("out.bin");
    let transfer = Transfer::new(store.clone(), test_config(temp.path(), PART, 2)).unwrap();
    transfer
        .download(&TransferSpec::download("obj", &dest, PART))
        .unwrap();

    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn missing_object_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let dest = temp.path().join("out.bin");

    let transfer = Transfer::new(store, test_config(temp.path(), PART, 2)).unwrap();
    let err = transfer
        .download(&TransferSpec::download("nope", &dest, PART))
        .unwrap_err();

    assert!(matches!(err, TransferError::NotFound { ref key } if key == "nope"));
    assert!(!dest.exists());
}

#[test]
fn failed_download_keeps_partial_file_and_resumes() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(6 * PART as usize + 10);
    store.inner().insert("obj", data.clone());
    store.fail_range(3 * PART, [fatal("access denied")]);

    let dest = temp.path().join("out.bin");
    let spec = TransferSpec::download("obj", &dest, PART);
    let transfer = Transfer::new(store.clone(), test_config(temp.path(), PART, 1)).unwrap();

    let info = match transfer.download(&spec).unwrap_err() {
        TransferError::Incomplete(info) => info,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(info.committed, vec![1, 2, 3]);
    assert_eq!(info.failed[0].0, 4);
    assert_eq!(info.cancelled, vec![5, 6, 7]);

    // Pre-sized, with the committed prefix already in place.
    let partial = fs::read(&dest).unwrap();
    assert_eq!(partial.len(), data.len());
    assert_eq!(&partial[..3 * PART as usize], &data[..3 * PART as usize]);

    let checkpoint = transfer
        .checkpoints()
        .load(&CheckpointKey::new("obj", &dest))
        .unwrap()
        .expect("checkpoint kept");
    assert_eq!(checkpoint.parts.len(), 3);
    assert_eq!(checkpoint.upload_id, None);

    store.reset_calls();
    let report = transfer.download(&spec).unwrap();

    let mut fetched = store.ranges();
    fetched.sort_unstable();
    assert_eq!(fetched, vec![300, 400, 500, 600]);
    assert_eq!(report.resumed_parts, 3);
    assert_eq!(fs::read(&dest).unwrap(), data);
    assert!(transfer.checkpoints().list().unwrap().is_empty());
}

#[test]
fn checkpoint_ignored_when_partial_file_is_gone() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(4 * PART as usize);
    store.inner().insert("obj", data.clone());
    store.fail_range(2 * PART, [fatal("denied")]);

    let dest = temp.path().join("out.bin");
    let spec = TransferSpec::download("obj", &dest, PART);
    let transfer = Transfer::new(store.clone(), test_config(temp.path(), PART, 1)).unwrap();
    transfer.download(&spec).unwrap_err();

    fs::remove_file(&dest).unwrap();
    store.reset_calls();
    let report = transfer.download(&spec).unwrap();

    assert_eq!(report.resumed_parts, 0);
    assert_eq!(store.ranges().len(), 4);
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn checkpointed_ranges_are_already_on_disk() {
    let temp = TempDir::new().unwrap();
    let store = FaultyStore::new();
    let data = random_bytes(8 * PART as usize + 3);
    store.inner().insert("obj", data.clone());

    let dest = temp.path().join("out.bin");
    let config = test_config(temp.path(), PART, 4);
    let checkpoints = CheckpointManager::new(config.checkpoint_dir.clone());
    let ckpt_key = CheckpointKey::new("obj", &dest);

    // Each progress report follows a checkpoint save: every range the record
    // lists must already hold the object's bytes.
    let checked = Arc::new(AtomicUsize::new(0));
    let missing = Arc::new(Mutex::new(Vec::new()));
    let (checked_in, missing_in, dest_in, expected) =
        (Arc::clone(&checked), Arc::clone(&missing), dest.clone(), data.clone());
    let transfer = Transfer::new(store.clone(), config)
        .unwrap()
        .with_progress(Box::new(move |_, _, _, _| {
            let Ok(Some(checkpoint)) = checkpoints.load(&ckpt_key) else {
                return;
            };
            let on_disk = fs::read(&dest_in).unwrap_or_default();
            for &index in checkpoint.parts.keys() {
                let start = (index as usize - 1) * PART as usize;
                let end = (start + PART as usize).min(expected.len());
                if on_disk.get(start..end) != Some(&expected[start..end]) {
                    missing_in.lock().push(index);
                }
                checked_in.fetch_add(1, Ordering::SeqCst);
            }
        }));

    transfer
        .download(&TransferSpec::download("obj", &dest, PART))
        .unwrap();

    assert!(checked.load(Ordering::SeqCst) >= 9);
    let missing = missing.lock();
    assert!(missing.is_empty(), "ranges checkpointed before written: {missing:?}");
    assert_eq!(fs::read(&dest).unwrap(), data);
}
