//! A work queue that can add items after a delay.

use crate::error::{RuntimeError, RuntimeResult};
use crate::queue::metrics::QueueMetrics;
use crate::queue::work::WorkQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

/// Deadline used for delays too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct WaitingState<T> {
    /// Pending items ordered by ready time, ties broken by insertion.
    by_deadline: BTreeMap<(Instant, u64), T>,
    /// Current deadline of each pending item.
    deadlines: HashMap<T, (Instant, u64)>,
    next_seq: u64,
    stopped: bool,
}

struct Waiting<T> {
    state: Mutex<WaitingState<T>>,
    cond: Condvar,
}

/// A [`WorkQueue`] plus a background thread releasing delayed items.
///
/// An item scheduled several times keeps its earliest deadline, so a key
/// is never waiting twice.
pub struct DelayingQueue<T> {
    queue: Arc<WorkQueue<T>>,
    waiting: Arc<Waiting<T>>,
    releaser: Mutex<Option<JoinHandle<()>>>,
}

impl<T> DelayingQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    /// Creates the queue and starts its release thread.
    pub fn new(name: impl Into<String>) -> RuntimeResult<Self> {
        let queue = Arc::new(WorkQueue::new(name));
        let waiting = Arc::new(Waiting {
            state: Mutex::new(WaitingState {
                by_deadline: BTreeMap::new(),
                deadlines: HashMap::new(),
                next_seq: 0,
                stopped: false,
            }),
            cond: Condvar::new(),
        });

        let thread_name = format!("{}-delay", queue.name());
        let releaser = {
            let queue = Arc::clone(&queue);
            let waiting = Arc::clone(&waiting);
            thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || release_loop(&queue, &waiting))
                .map_err(|source| RuntimeError::Spawn {
                    name: thread_name,
                    source,
                })?
        };

        Ok(Self {
            queue,
            waiting,
            releaser: Mutex::new(Some(releaser)),
        })
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Adds `item` after `delay`. A zero delay adds immediately.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let now = Instant::now();
        let ready_at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        let mut state = self.waiting.state.lock();
        if state.stopped {
            return;
        }
        if let Some(&existing) = state.deadlines.get(&item) {
            if existing.0 <= ready_at {
                return;
            }
            state.by_deadline.remove(&existing);
        }

        let slot = (ready_at, state.next_seq);
        state.next_seq += 1;
        state.deadlines.insert(item.clone(), slot);
        state.by_deadline.insert(slot, item);
        drop(state);
        self.waiting.cond.notify_one();
    }

    /// Returns the number of items waiting for their delay to pass.
    pub fn waiting_len(&self) -> usize {
        self.waiting.state.lock().by_deadline.len()
    }

    /// See [`WorkQueue::add`].
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// See [`WorkQueue::get`].
    pub fn get(&self) -> Option<T> {
        self.queue.get()
    }

    /// See [`WorkQueue::done`].
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// See [`WorkQueue::len`].
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`WorkQueue::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`WorkQueue::is_processing`].
    pub fn is_processing(&self, item: &T) -> bool {
        self.queue.is_processing(item)
    }

    /// Shuts the queue down and stops the release thread.
    pub fn shut_down(&self) {
        self.queue.shut_down();
        self.stop_releaser();
    }

    /// Shuts down, waiting for in-flight items to finish.
    pub fn shut_down_with_drain(&self) {
        self.stop_releaser();
        self.queue.shut_down_with_drain();
    }

    /// See [`WorkQueue::is_shutting_down`].
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// See [`WorkQueue::metrics`].
    pub fn metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    pub(crate) fn record_retry(&self) {
        self.queue.record_retry();
    }

    fn stop_releaser(&self) {
        {
            let mut state = self.waiting.state.lock();
            state.stopped = true;
            state.by_deadline.clear();
            state.deadlines.clear();
        }
        self.waiting.cond.notify_all();
        if let Some(handle) = self.releaser.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<T> Drop for DelayingQueue<T> {
    fn drop(&mut self) {
        self.waiting.state.lock().stopped = true;
        self.waiting.cond.notify_all();
        if let Some(handle) = self.releaser.get_mut().take() {
            let _ = handle.join();
        }
    }
}

fn release_loop<T: Clone + Eq + Hash>(queue: &WorkQueue<T>, waiting: &Waiting<T>) {
    let mut state = waiting.state.lock();
    loop {
        if state.stopped {
            return;
        }

        let now = Instant::now();
        let mut ready = Vec::new();
        while let Some((&slot, _)) = state.by_deadline.first_key_value() {
            if slot.0 > now {
                break;
            }
            if let Some(item) = state.by_deadline.remove(&slot) {
                state.deadlines.remove(&item);
                ready.push(item);
            }
        }

        if !ready.is_empty() {
            trace!(queue = %queue.name(), released = ready.len(), "releasing delayed items");
            drop(state);
            for item in ready {
                queue.add(item);
            }
            state = waiting.state.lock();
            continue;
        }

        match state.by_deadline.first_key_value().map(|(slot, _)| slot.0) {
            Some(next) => {
                waiting.cond.wait_until(&mut state, next);
            }
            None => waiting.cond.wait(&mut state),
        }
    }
}
