//! Progress reporting for part transfers.

use std::sync::Arc;

/// Progress callback for part transfers.
///
/// # Arguments
///
/// * `bytes_done` - Bytes committed so far, including resumed parts
/// * `total_bytes` - Size of the object
/// * `parts_done` - Number of parts committed
/// * `total_parts` - Total number of parts
pub type ProgressCallback = Box<dyn Fn(u64, u64, usize, usize) + Send + Sync>;

/// Counts committed parts for one session and forwards them to the callback.
///
/// Only the aggregating thread touches the tracker, so plain counters do.
pub(crate) struct ProgressTracker {
    callback: Option<Arc<ProgressCallback>>,
    total_bytes: u64,
    total_parts: usize,
    bytes_done: u64,
    parts_done: usize,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Option<Arc<ProgressCallback>>,
        total_bytes: u64,
        total_parts: usize,
    ) -> Self {
        Self {
            callback,
            total_bytes,
            total_parts,
            bytes_done: 0,
            parts_done: 0,
        }
    }

    /// Account for parts restored from a checkpoint and report the start.
    pub(crate) fn start(&mut self, resumed_bytes: u64, resumed_parts: usize) {
        self.bytes_done = resumed_bytes;
        self.parts_done = resumed_parts;
        self.report();
    }

    pub(crate) fn part_done(&mut self, length: u64) {
        self.bytes_done = (self.bytes_done + length).min(self.total_bytes);
        self.parts_done = (self.parts_done + 1).min(self.total_parts);
        self.report();
    }

    fn report(&self) {
        if let Some(cb) = &self.callback {
            cb(
                self.bytes_done,
                self.total_bytes,
                self.parts_done,
                self.total_parts,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording() -> (Arc<ProgressCallback>, Arc<Mutex<Vec<(u64, u64, usize, usize)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let cb: ProgressCallback = Box::new(move |a, b, c, d| sink.lock().push((a, b, c, d)));
        (Arc::new(cb), calls)
    }

    #[test]
    fn test_reports_resumed_then_parts() {
        let (cb, calls) = recording();
        let mut tracker = ProgressTracker::new(Some(cb), 25, 3);

        tracker.start(10, 1);
        tracker.part_done(10);
        tracker.part_done(5);

        assert_eq!(
            *calls.lock(),
            vec![(10, 25, 1, 3), (20, 25, 2, 3), (25, 25, 3, 3)]
        );
    }

    #[test]
    fn test_without_callback() {
        let mut tracker = ProgressTracker::new(None, 10, 1);
        tracker.start(0, 0);
        tracker.part_done(10);
        assert_eq!(tracker.bytes_done, 10);
        assert_eq!(tracker.parts_done, 1);
    }
}
