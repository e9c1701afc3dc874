//! # ctrlkit runtime
//!
//! The reconciliation engine: a list-then-watch cache feeding a
//! deduplicating, rate-limited work queue that drives a pool of workers.
//!
//! This crate provides:
//! - Work queues: deduplicating, delaying and rate-limited
//! - Rate limiters: per-key exponential backoff, token bucket, max-of
//! - Informer: list-then-watch cache maintenance with relist and resync
//! - Lister: read-only cache access for handlers
//! - Controller: worker pool with retry, panic recovery and lifecycle
//! - Stop signal shared by every thread of a controller
//!
//! ## Architecture
//!
//! ```text
//! control plane ──list/watch──▶ Informer ──▶ cache
//!                                  │
//!                            Notification
//!                                  ▼
//!                   Controller: queue.add(key)
//!                                  │
//!                 workers: get ─▶ SyncHandler(key, Lister) ─▶ done
//!                                  │
//!                     forget on success, add_rate_limited on failure
//! ```
//!
//! ## Key Invariants
//!
//! - A key is held by at most one worker at a time
//! - A key added while it is being processed is handled once more after
//!   the current attempt
//! - Handlers see only the key and read the latest state from the cache
//! - `has_synced` never reverts once true
//! - Workers start only after the initial list has been applied

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod controller;
mod error;
mod handler;
mod informer;
mod notification;
mod queue;
mod stop;

pub use cache::Lister;
pub use config::{
    BackoffConfig, BucketConfig, ControllerConfig, InformerConfig, RateLimiterConfig,
};
pub use controller::{Controller, ControllerStats, LifecycleState};
pub use error::{RuntimeError, RuntimeResult};
pub use handler::{SyncError, SyncHandler, SyncResult};
pub use informer::Informer;
pub use notification::{DeletedObject, EventHandler, Notification};
pub use queue::{
    BucketRateLimiter, DelayingQueue, ExponentialBackoffLimiter, MaxOfRateLimiter, QueueMetrics,
    RateLimiter, RateLimitingQueue, WorkQueue,
};
pub use stop::StopSignal;
