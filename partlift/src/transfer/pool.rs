//! Bounded worker pool for part transfers.
//!
//! The calling thread dispatches descriptors to a fixed set of scoped worker
//! threads and aggregates their results as they finish. A new descriptor is
//! only handed out when a slot frees up, so after the aggregator asks to stop
//! nothing else is dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransferResult;
use crate::plan::PartDescriptor;

use super::types::PartResult;

/// Whether the pool should keep dispatching after a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Runs part transfers with at most `concurrency` in flight.
#[derive(Debug, Clone)]
pub struct TransferWorkerPool {
    concurrency: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl TransferWorkerPool {
    /// Create a pool. A concurrency of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: None,
        }
    }

    /// Stop dispatching once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Transfer every descriptor in `tasks` and return one result per
    /// descriptor, sorted by part index.
    ///
    /// `worker` runs on a pool thread. `on_result` runs on the calling
    /// thread once per finished part, in completion order; returning
    /// [`Flow::Stop`] stops further dispatch and the parts never handed out
    /// are reported as cancelled. Blocks until every dispatched part has
    /// finished.
    pub fn run<W, A>(
        &self,
        tasks: &[PartDescriptor],
        worker: W,
        mut on_result: A,
    ) -> Vec<PartResult>
    where
        W: Fn(&PartDescriptor) -> TransferResult<String> + Sync,
        A: FnMut(&PartResult) -> Flow,
    {
        if tasks.is_empty() {
            return Vec::new();
        }

        let workers = self.concurrency.min(tasks.len());
        let mut slots: Vec<Option<PartResult>> = tasks.iter().map(|_| None).collect();

        debug!(parts = tasks.len(), workers, "Starting part transfers");

        let (work_tx, work_rx) = mpsc::channel::<usize>();
        let (done_tx, done_rx) = mpsc::channel::<(usize, PartResult)>();
        let work_rx = Mutex::new(work_rx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = &work_rx;
                let done_tx = done_tx.clone();
                let worker = &worker;
                scope.spawn(move || loop {
                    let next = work_rx.lock().recv();
                    let Ok(slot) = next else {
                        break;
                    };
                    let part = &tasks[slot];
                    let result = match worker(part) {
                        Ok(tag) => PartResult::success(part.index, tag),
                        Err(e) => PartResult::failed(part.index, e),
                    };
                    if done_tx.send((slot, result)).is_err() {
                        break;
                    }
                });
            }
            drop(done_tx);

            let mut next = 0;
            let mut in_flight = 0;
            let mut stopped = false;

            while next < tasks.len() && in_flight < workers && !self.is_cancelled() {
                if work_tx.send(next).is_err() {
                    break;
                }
                next += 1;
                in_flight += 1;
            }

            while in_flight > 0 {
                let Ok((slot, result)) = done_rx.recv() else {
                    break;
                };
                in_flight -= 1;

                if on_result(&result) == Flow::Stop && !stopped {
                    debug!(part = result.index, "Stopping part dispatch");
                    stopped = true;
                }
                slots[slot] = Some(result);

                if !stopped
                    && !self.is_cancelled()
                    && next < tasks.len()
                    && work_tx.send(next).is_ok()
                {
                    next += 1;
                    in_flight += 1;
                }
            }

            drop(work_tx);
        });

        let mut results: Vec<PartResult> = slots
            .into_iter()
            .zip(tasks)
            .map(|(slot, part)| slot.unwrap_or_else(|| PartResult::cancelled(part.index)))
            .collect();
        results.sort_by_key(|r| r.index);
        results
    }
}
