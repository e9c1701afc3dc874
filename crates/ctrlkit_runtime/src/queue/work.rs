//! The deduplicating work queue.

use crate::queue::metrics::{MetricsState, QueueMetrics};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use tracing::debug;

struct QueueState<T> {
    /// Items awaiting a worker, in first-enqueue order.
    queue: VecDeque<T>,
    /// Items that must be (re)delivered. Always a superset of `queue`.
    dirty: HashSet<T>,
    /// Items currently held by a worker.
    processing: HashSet<T>,
    shutting_down: bool,
    draining: bool,
    metrics: MetricsState<T>,
}

/// A concurrency-safe queue delivering each item to at most one worker
/// at a time.
///
/// - An item added while already queued is coalesced.
/// - An item added while being processed is redelivered once after
///   [`done`](WorkQueue::done).
/// - After [`shut_down`](WorkQueue::shut_down), every `get` returns `None`
///   and adds are ignored.
///
/// # Example
///
/// ```
/// use ctrlkit_runtime::WorkQueue;
///
/// let queue = WorkQueue::new("example");
/// queue.add("ns/a");
/// queue.add("ns/a");
/// assert_eq!(queue.len(), 1);
///
/// let item = queue.get().unwrap();
/// queue.add("ns/a"); // arrives while processing
/// assert_eq!(queue.len(), 0);
/// queue.done(&item);
/// assert_eq!(queue.len(), 1);
/// ```
pub struct WorkQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T: Clone + Eq + Hash> WorkQueue<T> {
    /// Creates an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
                draining: false,
                metrics: MetricsState::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks `item` as needing processing.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        state.metrics.adds += 1;
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        drop(state);
        self.cond.notify_one();
    }

    /// Blocks until an item is available, then hands it to the caller.
    ///
    /// Returns `None` once the queue is shutting down. The caller must
    /// call [`done`](WorkQueue::done) with the item when finished.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.shutting_down {
                return None;
            }
            if let Some(item) = state.queue.pop_front() {
                state.dirty.remove(&item);
                state.processing.insert(item.clone());
                state.metrics.started(item.clone());
                return Some(item);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Marks `item` as no longer being processed.
    ///
    /// If it was added again meanwhile, it goes back on the queue.
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        if !state.processing.remove(item) {
            debug!(queue = %self.name, "done called for an item that was not in flight");
            return;
        }
        state.metrics.finished(item);

        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.cond.notify_one();
        } else if state.draining && state.processing.is_empty() {
            drop(state);
            self.cond.notify_all();
        }
    }

    /// Returns the number of items waiting for a worker.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `item` is currently held by a worker.
    pub fn is_processing(&self, item: &T) -> bool {
        self.state.lock().processing.contains(item)
    }

    /// Closes the queue. Blocked and future `get` calls return `None`.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.cond.notify_all();
        debug!(queue = %self.name, "queue shut down");
    }

    /// Closes the queue and waits until every in-flight item is done.
    pub fn shut_down_with_drain(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        state.draining = true;
        self.cond.notify_all();
        while !state.processing.is_empty() {
            self.cond.wait(&mut state);
        }
        debug!(queue = %self.name, "queue drained");
    }

    /// Returns true once the queue has been shut down.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Returns a snapshot of the queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock();
        state
            .metrics
            .snapshot(state.queue.len(), state.processing.len())
    }

    pub(crate) fn record_retry(&self) {
        self.state.lock().metrics.retries += 1;
    }
}
