//! # ctrlkit testkit
//!
//! Test utilities for ctrlkit.
//!
//! This crate provides:
//! - `CronTab` fixtures, seeded control planes and JSON seed files
//! - Recording and scripted sync handlers
//! - Property-based test generators using proptest
//! - A harness running an informer and controller on background threads
//! - Work queue stress testing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ctrlkit_testkit::prelude::*;
//!
//! #[test]
//! fn handles_every_object() {
//!     let handler = RecordingHandler::new();
//!     let running = RunningController::start(
//!         TestControlPlane::seeded(crontabs(10, 2)),
//!         handler.clone(),
//!         fast_informer_config(),
//!         fast_controller_config(Duration::from_millis(5)),
//!     );
//!     assert!(wait_for(Duration::from_secs(5), || handler.call_count() == 10));
//!     running.shutdown().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod handlers;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::handlers::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use handlers::*;
pub use integration::*;
pub use stress::*;
