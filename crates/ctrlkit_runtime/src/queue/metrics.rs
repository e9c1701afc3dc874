//! Queue metrics.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Point-in-time view of a queue's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetrics {
    /// Items waiting for a worker.
    pub depth: usize,
    /// Items currently held by workers.
    pub in_flight: usize,
    /// Accepted adds (coalesced adds are not counted).
    pub adds: u64,
    /// Rate-limited re-adds.
    pub retries: u64,
    /// Items marked done.
    pub completed: u64,
    /// Total time items spent between `get` and `done`.
    pub work_duration: Duration,
    /// Age of the oldest in-flight item.
    pub longest_running: Option<Duration>,
}

/// Counters kept under the queue lock.
pub(crate) struct MetricsState<T> {
    pub(crate) adds: u64,
    pub(crate) retries: u64,
    pub(crate) completed: u64,
    pub(crate) work_duration: Duration,
    started: HashMap<T, Instant>,
}

impl<T: Eq + Hash> MetricsState<T> {
    pub(crate) fn new() -> Self {
        Self {
            adds: 0,
            retries: 0,
            completed: 0,
            work_duration: Duration::ZERO,
            started: HashMap::new(),
        }
    }

    pub(crate) fn started(&mut self, item: T) {
        self.started.insert(item, Instant::now());
    }

    pub(crate) fn finished(&mut self, item: &T) {
        if let Some(start) = self.started.remove(item) {
            self.completed += 1;
            self.work_duration += start.elapsed();
        }
    }

    pub(crate) fn snapshot(&self, depth: usize, in_flight: usize) -> QueueMetrics {
        QueueMetrics {
            depth,
            in_flight,
            adds: self.adds,
            retries: self.retries,
            completed: self.completed,
            work_duration: self.work_duration,
            longest_running: self.started.values().map(|start| start.elapsed()).max(),
        }
    }
}
