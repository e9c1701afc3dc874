//! List/watch boundary between the controller runtime and a control plane.

use crate::error::{ApiError, ApiResult};
use crate::meta::Resource;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A change reported by a watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object")]
pub enum WatchEvent<K> {
    /// The object was created.
    Added(K),
    /// The object was changed.
    Modified(K),
    /// The object was removed. Carries the last state seen by the server.
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// Returns the object carried by the event.
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    /// Consumes the event, returning its object.
    pub fn into_object(self) -> K {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

/// Result of a full list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<K> {
    /// Every object at the time of the list.
    pub items: Vec<K>,
    /// Resource version to resume watching from.
    pub resource_version: u64,
}

impl<K> ObjectList<K> {
    /// Creates a list result.
    pub fn new(items: Vec<K>, resource_version: u64) -> Self {
        Self {
            items,
            resource_version,
        }
    }
}

/// Outcome of polling a watch stream once.
#[derive(Debug)]
pub enum WatchPoll<K> {
    /// The next event, in server order.
    Event(WatchEvent<K>),
    /// A frame arrived but could not be decoded. The stream remains usable.
    Malformed(ApiError),
    /// Nothing arrived before the timeout.
    Idle,
    /// The stream has ended. `Some` carries the reason when it was not a
    /// clean server-side timeout.
    Closed(Option<ApiError>),
}

/// A finite but resumable sequence of watch events.
pub trait WatchStream<K>: Send {
    /// Waits up to `timeout` for the next event.
    fn poll_next(&mut self, timeout: Duration) -> WatchPoll<K>;
}

/// Client side of the control plane.
///
/// Implementations must be safe to call from the informer thread while
/// other threads hold references to them.
pub trait ListWatch<K: Resource>: Send + Sync {
    /// Lists every object together with the version to watch from.
    fn list(&self) -> ApiResult<ObjectList<K>>;

    /// Opens a watch delivering events newer than `resource_version`.
    fn watch(&self, resource_version: u64) -> ApiResult<Box<dyn WatchStream<K>>>;
}
