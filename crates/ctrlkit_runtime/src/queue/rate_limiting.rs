//! The rate-limited queue used by controllers.

use crate::config::RateLimiterConfig;
use crate::error::RuntimeResult;
use crate::queue::delaying::DelayingQueue;
use crate::queue::metrics::QueueMetrics;
use crate::queue::rate_limit::{self, RateLimiter};
use std::hash::Hash;
use std::time::Duration;
use tracing::trace;

/// A [`DelayingQueue`] whose retry delays come from a [`RateLimiter`].
///
/// # Example
///
/// ```
/// use ctrlkit_runtime::{RateLimiterConfig, RateLimitingQueue};
/// use std::time::Duration;
///
/// let queue = RateLimitingQueue::with_config(
///     "example",
///     &RateLimiterConfig::exponential(Duration::from_millis(1), Duration::from_millis(10)),
/// )
/// .unwrap();
///
/// queue.add("ns/a".to_string());
/// let key = queue.get().unwrap();
/// queue.done(&key);
/// queue.add_rate_limited(key.clone()); // back in ~1ms
/// assert_eq!(queue.num_requeues(&key), 1);
/// queue.forget(&key);
/// assert_eq!(queue.num_requeues(&key), 0);
/// ```
pub struct RateLimitingQueue<T> {
    queue: DelayingQueue<T>,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    /// Creates a queue using `limiter`.
    pub fn new(name: impl Into<String>, limiter: Box<dyn RateLimiter<T>>) -> RuntimeResult<Self> {
        Ok(Self {
            queue: DelayingQueue::new(name)?,
            limiter,
        })
    }

    /// Creates a queue with the limiter described by `config`.
    ///
    /// Fails with [`RuntimeError::InvalidConfig`](crate::RuntimeError::InvalidConfig)
    /// if `config` does not validate.
    pub fn with_config(name: impl Into<String>, config: &RateLimiterConfig) -> RuntimeResult<Self> {
        config.validate()?;
        Self::new(name, rate_limit::from_config(config))
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Adds `item` once the limiter allows it.
    pub fn add_rate_limited(&self, item: T) {
        if self.queue.is_shutting_down() {
            return;
        }
        let delay = self.limiter.when(&item);
        self.queue.record_retry();
        trace!(queue = %self.name(), ?delay, "rate limited add");
        self.queue.add_after(item, delay);
    }

    /// Clears the failure history of `item`. Queue membership is untouched.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    /// Returns the number of rate-limited adds of `item` since it was
    /// last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`DelayingQueue::add_after`].
    pub fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay);
    }

    /// See [`WorkQueue::add`](crate::WorkQueue::add).
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// See [`WorkQueue::get`](crate::WorkQueue::get).
    pub fn get(&self) -> Option<T> {
        self.queue.get()
    }

    /// See [`WorkQueue::done`](crate::WorkQueue::done).
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// Number of items ready for a worker.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no item is ready for a worker.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of items waiting out a delay.
    pub fn waiting_len(&self) -> usize {
        self.queue.waiting_len()
    }

    /// Returns true if `item` is held by a worker.
    pub fn is_processing(&self, item: &T) -> bool {
        self.queue.is_processing(item)
    }

    /// See [`DelayingQueue::shut_down`].
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// See [`DelayingQueue::shut_down_with_drain`].
    pub fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain();
    }

    /// Returns true once the queue has been shut down.
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// Returns a snapshot of the queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketConfig;
    use std::time::Instant;

    fn queue(base_ms: u64, max_ms: u64) -> RateLimitingQueue<String> {
        RateLimitingQueue::with_config(
            "test",
            &RateLimiterConfig::exponential(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RateLimiterConfig::default().with_bucket(BucketConfig {
            qps: f64::NAN,
            burst: 10,
        });
        assert!(matches!(
            RateLimitingQueue::<String>::with_config("test", &config),
            Err(crate::RuntimeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rate_limited_item_is_delayed() {
        let queue = queue(40, 1000);
        let start = Instant::now();
        queue.add_rate_limited("ns/a".into());
        assert!(queue.is_empty());
        assert_eq!(queue.get().as_deref(), Some("ns/a"));
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(queue.metrics().retries, 1);
    }

    #[test]
    fn forget_does_not_touch_membership() {
        let queue = queue(5, 100);
        queue.add("ns/a".into());
        queue.forget(&"ns/a".to_string());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn forget_resets_backoff() {
        let queue = queue(30, 10_000);
        let key = "ns/a".to_string();
        for _ in 0..4 {
            queue.add_rate_limited(key.clone());
            let got = queue.get().unwrap();
            queue.done(&got);
        }
        assert_eq!(queue.num_requeues(&key), 4);

        queue.forget(&key);
        let start = Instant::now();
        queue.add_rate_limited(key.clone());
        queue.get().unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(200), "{elapsed:?}");
    }

    #[test]
    fn rate_limited_add_after_shutdown_is_ignored() {
        let queue = queue(5, 100);
        queue.shut_down();
        queue.add_rate_limited("ns/a".into());
        assert_eq!(queue.num_requeues(&"ns/a".to_string()), 0);
        assert_eq!(queue.waiting_len(), 0);
    }
}
