//! Retry delay policies.

use crate::config::{BucketConfig, RateLimiterConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Decides how long an item waits before it is retried.
pub trait RateLimiter<T>: Send + Sync {
    /// Records a failure of `item` and returns the delay before its retry.
    fn when(&self, item: &T) -> Duration;

    /// Clears the failure history of `item`.
    fn forget(&self, item: &T);

    /// Returns how many times `item` has been retried since it was last
    /// forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
///
/// The exponent is the failure count before the current failure, so the
/// first retry waits exactly `base`.
pub struct ExponentialBackoffLimiter<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T> ExponentialBackoffLimiter<T> {
    /// Creates a limiter.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn delay_for(&self, exponent: u32) -> Duration {
        let factor = 1u128.checked_shl(exponent).unwrap_or(u128::MAX);
        let nanos = self.base.as_nanos().saturating_mul(factor);
        if nanos >= self.max.as_nanos() {
            return self.max;
        }
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .unwrap_or(self.max)
    }
}

impl<T: Clone + Eq + Hash + Send> RateLimiter<T> for ExponentialBackoffLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(item.clone()).or_insert(0);
            let exponent = *count;
            *count = count.saturating_add(1);
            exponent
        };
        self.delay_for(exponent)
    }

    fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Overall token bucket shared by every item.
///
/// Each retry takes one token; once the bucket is empty, retries are
/// spaced `1 / qps` apart.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Creates a full bucket.
    pub fn new(config: BucketConfig) -> Self {
        let burst = f64::from(config.burst);
        Self {
            qps: config.qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.refilled_at = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines limiters, waiting for the longest of their delays.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    /// Creates a combined limiter.
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// Builds the limiter described by `config`.
pub(crate) fn from_config<T>(config: &RateLimiterConfig) -> Box<dyn RateLimiter<T>>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    let per_item: Box<dyn RateLimiter<T>> = Box::new(ExponentialBackoffLimiter::new(
        config.base_delay,
        config.max_delay,
    ));
    match config.bucket {
        Some(bucket) => Box::new(MaxOfRateLimiter::new(vec![
            per_item,
            Box::new(BucketRateLimiter::new(bucket)),
        ])),
        None => per_item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_base() {
        let limiter =
            ExponentialBackoffLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        let delays: Vec<_> = (0..4).map(|_| limiter.when(&"ns/bar")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
            ]
        );
        assert_eq!(limiter.num_requeues(&"ns/bar"), 4);
    }

    #[test]
    fn exponential_caps_at_max() {
        let limiter =
            ExponentialBackoffLimiter::new(Duration::from_millis(100), Duration::from_millis(250));
        let delays: Vec<_> = (0..4).map(|_| limiter.when(&1)).collect();
        assert_eq!(delays[2], Duration::from_millis(250));
        assert_eq!(delays[3], Duration::from_millis(250));
    }

    #[test]
    fn exponential_survives_huge_exponents() {
        let limiter = ExponentialBackoffLimiter::new(Duration::from_secs(1), Duration::from_secs(60));
        limiter.failures.lock().insert("k", 500);
        assert_eq!(limiter.when(&"k"), Duration::from_secs(60));
    }

    #[test]
    fn forget_resets_to_base() {
        let limiter =
            ExponentialBackoffLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        limiter.when(&"a");
        limiter.when(&"a");
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
    }

    #[test]
    fn items_back_off_independently() {
        let limiter =
            ExponentialBackoffLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
        limiter.when(&"a");
        limiter.when(&"a");
        assert_eq!(limiter.when(&"b"), Duration::from_millis(5));
    }

    #[test]
    fn bucket_allows_burst_then_spaces_out() {
        let limiter = BucketRateLimiter::new(BucketConfig { qps: 10.0, burst: 3 });
        for _ in 0..3 {
            assert_eq!(RateLimiter::<u32>::when(&limiter, &0), Duration::ZERO);
        }
        let delay = RateLimiter::<u32>::when(&limiter, &0);
        assert!(delay > Duration::from_millis(50), "{delay:?}");
        assert!(delay <= Duration::from_millis(100), "{delay:?}");
    }

    #[test]
    fn empty_bucket_with_zero_qps_does_not_panic() {
        let limiter = BucketRateLimiter::new(BucketConfig { qps: 0.0, burst: 1 });
        assert_eq!(RateLimiter::<u32>::when(&limiter, &0), Duration::ZERO);
        assert_eq!(RateLimiter::<u32>::when(&limiter, &0), Duration::MAX);
    }

    #[test]
    fn max_of_takes_longest_delay() {
        let limiter: MaxOfRateLimiter<&str> = MaxOfRateLimiter::new(vec![
            Box::new(ExponentialBackoffLimiter::new(
                Duration::from_millis(5),
                Duration::from_secs(1),
            )),
            Box::new(ExponentialBackoffLimiter::new(
                Duration::from_millis(50),
                Duration::from_secs(1),
            )),
        ]);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(50));
        assert_eq!(limiter.num_requeues(&"a"), 1);
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
    }

    #[test]
    fn config_without_bucket_is_pure_exponential() {
        let limiter = from_config::<String>(&RateLimiterConfig::exponential(
            Duration::from_millis(7),
            Duration::from_secs(1),
        ));
        let key = "ns/a".to_string();
        assert_eq!(limiter.when(&key), Duration::from_millis(7));
        assert_eq!(limiter.when(&key), Duration::from_millis(14));
    }
}
