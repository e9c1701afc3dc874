//! Configuration for controllers, queues and informers.

use crate::error::{RuntimeError, RuntimeResult};
use std::time::Duration;

/// Configuration for a controller and its worker pool.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller name, used for the queue name and in logs.
    pub name: String,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Retry policy for failed keys.
    pub rate_limiter: RateLimiterConfig,
    /// How often `run` re-checks whether the cache has synced.
    pub sync_poll_interval: Duration,
}

impl ControllerConfig {
    /// Creates a configuration with one worker and default backoff.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 1,
            rate_limiter: RateLimiterConfig::default(),
            sync_poll_interval: Duration::from_millis(100),
        }
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the rate limiter configuration.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Sets the cache sync poll interval.
    pub fn with_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }

    /// Checks the configuration for values the runtime cannot honour.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.workers == 0 {
            return Err(RuntimeError::InvalidConfig(
                "worker count must be positive".into(),
            ));
        }
        self.rate_limiter.validate()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("controller")
    }
}

/// Retry policy for keys whose sync failed.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the per-key delay.
    pub max_delay: Duration,
    /// Overall token bucket shared by all keys, if any.
    pub bucket: Option<BucketConfig>,
    /// Failures after which a key is dropped. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl RateLimiterConfig {
    /// Creates a per-key exponential policy without an overall bucket.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            bucket: None,
            max_retries: None,
        }
    }

    /// Sets the overall token bucket.
    pub fn with_bucket(mut self, bucket: BucketConfig) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Drops keys after `max_retries` consecutive failures.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.base_delay > self.max_delay {
            return Err(RuntimeError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if let Some(bucket) = &self.bucket {
            if !(bucket.qps.is_finite() && bucket.qps > 0.0) || bucket.burst == 0 {
                return Err(RuntimeError::InvalidConfig(
                    "token bucket needs positive qps and burst".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    /// 5ms doubling up to 1000s per key, plus a 10 qps / 100 burst bucket.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(5), Duration::from_secs(1000))
            .with_bucket(BucketConfig::default())
    }
}

/// Overall token bucket limiting retries across all keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Tokens added per second.
    pub qps: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Configuration for an informer.
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Interval between full resyncs. `None` disables resync.
    pub resync_interval: Option<Duration>,
    /// Longest single wait on the watch stream.
    pub watch_poll_interval: Duration,
    /// Backoff between failed list or watch attempts.
    pub reconnect: BackoffConfig,
    /// Failed initial lists tolerated before `run` gives up. `None` keeps
    /// trying until stopped.
    pub initial_list_attempts: Option<u32>,
    /// How long deleted objects stay readable as tombstones.
    pub tombstone_ttl: Duration,
}

impl InformerConfig {
    /// Creates a configuration without resync.
    pub fn new() -> Self {
        Self {
            resync_interval: None,
            watch_poll_interval: Duration::from_millis(250),
            reconnect: BackoffConfig::default(),
            initial_list_attempts: None,
            tombstone_ttl: Duration::from_secs(30),
        }
    }

    /// Sets the resync interval.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    /// Sets the watch poll interval.
    pub fn with_watch_poll_interval(mut self, interval: Duration) -> Self {
        self.watch_poll_interval = interval;
        self
    }

    /// Sets the reconnect backoff.
    pub fn with_reconnect(mut self, reconnect: BackoffConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Limits the number of failed initial lists.
    pub fn with_initial_list_attempts(mut self, attempts: u32) -> Self {
        self.initial_list_attempts = Some(attempts.max(1));
        self
    }

    /// Sets the tombstone lifetime.
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.watch_poll_interval.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "watch poll interval must be positive".into(),
            ));
        }
        if self.resync_interval.is_some_and(|every| every.is_zero()) {
            return Err(RuntimeError::InvalidConfig(
                "resync interval must be positive".into(),
            ));
        }
        self.reconnect.validate()
    }
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Creates a backoff configuration.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.initial_delay > self.max_delay {
            return Err(RuntimeError::InvalidConfig(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(RuntimeError::InvalidConfig(format!(
                "backoff multiplier must be finite and at least 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Calculates the delay after `failures` consecutive failures (1-indexed).
    ///
    /// Delays that cannot be represented fall back to `max_delay`.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let delay = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(failures.saturating_sub(1).min(64) as i32);
        Duration::try_from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}
