//! # ctrlkit API server
//!
//! In-memory control plane with list/watch semantics.
//!
//! This crate provides:
//! - An object store that assigns monotonically increasing resource versions
//! - A bounded event history serving watches from any retained version
//! - Cursor expiry (`Expired`) once a version has been compacted away
//! - Server-side watch timeouts so every watch is finite
//! - Fault injection: list outages, dropped watch connections, malformed frames
//! - `LocalClient`, a `ListWatch` implementation that decodes CBOR frames
//!
//! # Architecture
//!
//! Every write appends one encoded frame to the history and wakes blocked
//! watchers. A watch is nothing more than a cursor into that history:
//!
//! ```
//! use ctrlkit_api::{CronTab, CronTabSpec, ListWatch, WatchPoll};
//! use ctrlkit_apiserver::{ApiServer, LocalClient, ServerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let server = Arc::new(ApiServer::<CronTab>::new(ServerConfig::default()));
//! let client = LocalClient::new(Arc::clone(&server));
//!
//! let list = client.list().unwrap();
//! let mut watch = client.watch(list.resource_version).unwrap();
//!
//! server.create(CronTab::new("ns", "a", CronTabSpec::default())).unwrap();
//! assert!(matches!(watch.poll_next(Duration::from_secs(1)), WatchPoll::Event(_)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod history;
mod server;

pub use client::LocalClient;
pub use config::ServerConfig;
pub use history::{FramePoll, FrameStream};
pub use server::ApiServer;
