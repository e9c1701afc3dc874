//! Deduplicating work queues.
//!
//! Three layers, each wrapping the previous one:
//!
//! - [`WorkQueue`]: dirty/processing/queued sets guaranteeing that a key is
//!   held by at most one worker and that adds during processing are
//!   coalesced into a single redelivery.
//! - [`DelayingQueue`]: adds an item after a delay, from a background
//!   thread.
//! - [`RateLimitingQueue`]: computes that delay from a [`RateLimiter`].

mod delaying;
mod metrics;
mod rate_limit;
mod rate_limiting;
mod work;

pub use delaying::DelayingQueue;
pub use metrics::QueueMetrics;
pub use rate_limit::{
    BucketRateLimiter, ExponentialBackoffLimiter, MaxOfRateLimiter, RateLimiter,
};
pub use rate_limiting::RateLimitingQueue;
pub use work::WorkQueue;
