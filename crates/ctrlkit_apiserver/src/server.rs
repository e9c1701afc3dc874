//! The in-memory control plane.

use crate::config::ServerConfig;
use crate::history::{FrameStream, History};
use ctrlkit_api::codec::encode_event;
use ctrlkit_api::{ApiError, ApiResult, ObjectKey, ObjectList, Resource, WatchEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Injected failures.
#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming lists that fail with `Unavailable`.
    failing_lists: u32,
    /// When set, every list and watch fails.
    unavailable: bool,
}

struct ServerState<K> {
    objects: BTreeMap<ObjectKey, K>,
    /// Last assigned resource version.
    revision: u64,
    faults: Faults,
}

/// In-memory control plane holding objects of one kind.
///
/// Writes assign the next resource version, update the object map and
/// append a watch frame while holding the state lock, so a list at
/// version `R` and a watch from `R` never overlap or leave a gap.
///
/// # Example
///
/// ```
/// use ctrlkit_api::{CronTab, CronTabSpec, Resource};
/// use ctrlkit_apiserver::{ApiServer, ServerConfig};
///
/// let server = ApiServer::<CronTab>::new(ServerConfig::default());
/// let created = server.create(CronTab::new("ns", "a", CronTabSpec::default())).unwrap();
/// assert_eq!(created.resource_version(), 1);
/// assert_eq!(server.list().unwrap().items.len(), 1);
/// ```
pub struct ApiServer<K: Resource> {
    config: ServerConfig,
    state: RwLock<ServerState<K>>,
    history: Arc<History>,
}

impl<K: Resource + Serialize> ApiServer<K> {
    /// Creates an empty control plane.
    pub fn new(config: ServerConfig) -> Self {
        let history = Arc::new(History::new(config.history_limit));
        Self {
            config,
            state: RwLock::new(ServerState {
                objects: BTreeMap::new(),
                revision: 0,
                faults: Faults::default(),
            }),
            history,
        }
    }

    /// Creates a control plane seeded with `objects`.
    pub fn with_objects(config: ServerConfig, objects: Vec<K>) -> ApiResult<Self> {
        let server = Self::new(config);
        for obj in objects {
            server.create(obj)?;
        }
        Ok(server)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the last assigned resource version.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Returns true if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a stored object.
    pub fn get(&self, key: &ObjectKey) -> ApiResult<K> {
        self.state
            .read()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(key.to_string()))
    }

    /// Creates an object. Its resource version is assigned by the server.
    pub fn create(&self, mut obj: K) -> ApiResult<K> {
        let key = obj.key();
        let mut state = self.state.write();
        if state.objects.contains_key(&key) {
            return Err(ApiError::AlreadyExists(key.to_string()));
        }

        let revision = state.revision + 1;
        obj.meta_mut().resource_version = revision;
        self.record(revision, &WatchEvent::Added(obj.clone()))?;
        state.revision = revision;
        state.objects.insert(key.clone(), obj.clone());

        debug!(kind = K::KIND, key = %key, revision, "object created");
        Ok(obj)
    }

    /// Replaces an object.
    ///
    /// A non-zero resource version on `obj` must match the stored one.
    pub fn update(&self, mut obj: K) -> ApiResult<K> {
        let key = obj.key();
        let mut state = self.state.write();
        let current = state
            .objects
            .get(&key)
            .map(|stored| stored.resource_version())
            .ok_or_else(|| ApiError::NotFound(key.to_string()))?;

        let supplied = obj.resource_version();
        if supplied != 0 && supplied != current {
            return Err(ApiError::Conflict {
                key: key.to_string(),
                expected: current,
                actual: supplied,
            });
        }

        let revision = state.revision + 1;
        obj.meta_mut().resource_version = revision;
        self.record(revision, &WatchEvent::Modified(obj.clone()))?;
        state.revision = revision;
        state.objects.insert(key.clone(), obj.clone());

        debug!(kind = K::KIND, key = %key, revision, "object updated");
        Ok(obj)
    }

    /// Deletes an object, returning its final state.
    pub fn delete(&self, key: &ObjectKey) -> ApiResult<K> {
        let mut state = self.state.write();
        let mut obj = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(key.to_string()))?;

        let revision = state.revision + 1;
        obj.meta_mut().resource_version = revision;
        self.record(revision, &WatchEvent::Deleted(obj.clone()))?;
        state.revision = revision;
        state.objects.remove(key);

        debug!(kind = K::KIND, key = %key, revision, "object deleted");
        Ok(obj)
    }

    /// Lists every object in key order.
    pub fn list(&self) -> ApiResult<ObjectList<K>> {
        let mut state = self.state.write();
        if state.faults.unavailable {
            return Err(ApiError::Unavailable("list refused".into()));
        }
        if state.faults.failing_lists > 0 {
            state.faults.failing_lists -= 1;
            return Err(ApiError::Unavailable("list interrupted".into()));
        }
        Ok(ObjectList::new(
            state.objects.values().cloned().collect(),
            state.revision,
        ))
    }

    /// Opens a raw frame stream after `resource_version`.
    pub fn watch_frames(&self, resource_version: u64) -> ApiResult<FrameStream> {
        if self.state.read().faults.unavailable {
            return Err(ApiError::Unavailable("watch refused".into()));
        }
        self.history.open(resource_version, self.config.watch_timeout)
    }

    /// Makes the next `count` lists fail with `Unavailable`.
    pub fn fail_next_lists(&self, count: u32) {
        self.state.write().faults.failing_lists = count;
    }

    /// Makes every list and watch fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().faults.unavailable = unavailable;
        if unavailable {
            self.history.reset_watches();
        }
    }

    /// Drops every open watch connection.
    pub fn disconnect_watches(&self) {
        self.history.reset_watches();
    }

    /// Emits a frame that does not decode, consuming one resource version.
    pub fn inject_malformed_frame(&self, frame: Vec<u8>) -> u64 {
        let mut state = self.state.write();
        state.revision += 1;
        self.history.append(state.revision, frame);
        state.revision
    }

    fn record(&self, revision: u64, event: &WatchEvent<K>) -> ApiResult<()> {
        let frame = encode_event(event)?;
        self.history.append(revision, frame);
        Ok(())
    }
}
