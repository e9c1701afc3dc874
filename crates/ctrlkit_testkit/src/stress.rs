//! Stress tests for the work queue.
//!
//! These verify exclusivity and coalescing under heavy concurrent use.

use ctrlkit_runtime::WorkQueue;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Adds issued by producers.
    pub adds: usize,
    /// Items handed to workers.
    pub processed: usize,
    /// Times a worker received a key another worker was holding.
    pub overlaps: usize,
    /// Total duration.
    pub duration: Duration,
    /// Processed items per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(adds: usize, processed: usize, overlaps: usize, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            processed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            adds,
            processed,
            overlaps,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Adds: {}", self.adds);
        println!("Processed: {}", self.processed);
        println!("Overlaps: {}", self.overlaps);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} items/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Adds issued by each producer.
    pub adds_per_producer: usize,
    /// Producer threads.
    pub producers: usize,
    /// Worker threads.
    pub workers: usize,
    /// Distinct keys.
    pub keys: usize,
    /// Time a worker holds each item.
    pub work: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            adds_per_producer: 5_000,
            producers: 4,
            workers: 4,
            keys: 64,
            work: Duration::ZERO,
        }
    }
}

/// Hammers a [`WorkQueue`] with concurrent producers and workers.
///
/// Workers track the keys they hold in a shared set; receiving a key that
/// is already in the set counts as an overlap. Once producers finish, the
/// queue is drained and shut down.
pub fn stress_work_queue(config: &StressConfig) -> StressTestResult {
    let queue = Arc::new(WorkQueue::new("stress"));
    let held = Arc::new(Mutex::new(HashSet::new()));
    let processed = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let keys = config.keys.max(1);

    let start = Instant::now();

    let workers: Vec<_> = (0..config.workers.max(1))
        .map(|_| {
            let queue = Arc::clone(&queue);
            let held = Arc::clone(&held);
            let processed = Arc::clone(&processed);
            let overlaps = Arc::clone(&overlaps);
            let work = config.work;
            thread::spawn(move || {
                while let Some(key) = queue.get() {
                    if !held.lock().insert(key) {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    if !work.is_zero() {
                        thread::sleep(work);
                    }
                    held.lock().remove(&key);
                    processed.fetch_add(1, Ordering::Relaxed);
                    queue.done(&key);
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..config.producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let adds = config.adds_per_producer;
            thread::spawn(move || {
                for i in 0..adds {
                    queue.add((i * 31 + p * 7) % keys);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer panicked");
    }

    loop {
        let metrics = queue.metrics();
        if metrics.depth == 0 && metrics.in_flight == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    queue.shut_down();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    StressTestResult::new(
        config.adds_per_producer * config.producers,
        processed.load(Ordering::Relaxed),
        overlaps.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_stress_run_has_no_overlaps() {
        let result = stress_work_queue(&StressConfig {
            adds_per_producer: 500,
            producers: 3,
            workers: 4,
            keys: 16,
            work: Duration::ZERO,
        });
        assert_eq!(result.overlaps, 0);
        assert!(result.processed >= 16);
        assert!(result.processed <= result.adds);
    }
}
