//! # ctrlkit API
//!
//! Resource model and list/watch boundary for ctrlkit controllers.
//!
//! This crate provides:
//! - `ObjectMeta` and `ObjectKey` for identifying remote objects
//! - The `Resource` trait every watched kind implements
//! - `WatchEvent`, `ObjectList` and the `ListWatch` client boundary
//! - CBOR framing for watch events
//! - The example `CronTab` resource
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod crontab;
mod error;
mod meta;
mod watch;

pub use crontab::{CronTab, CronTabSpec};
pub use error::{ApiError, ApiResult};
pub use meta::{ObjectKey, ObjectMeta, Resource};
pub use watch::{ListWatch, ObjectList, WatchEvent, WatchPoll, WatchStream};
