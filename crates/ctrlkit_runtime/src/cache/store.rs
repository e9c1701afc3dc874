//! The informer's local object store.

use ctrlkit_api::{ObjectKey, Resource};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of writing one object into the store.
#[derive(Debug)]
pub(crate) enum Upsert<K> {
    /// The key was not cached.
    Created(Arc<K>),
    /// The key was cached with a different resource version.
    Updated {
        /// Previously cached object.
        old: Arc<K>,
        /// Newly cached object.
        new: Arc<K>,
    },
    /// The key was cached with the same resource version; nothing changed.
    Unchanged,
}

/// Changes made by [`Store::replace`].
#[derive(Debug)]
pub(crate) struct ReplaceDiff<K> {
    pub(crate) added: Vec<Arc<K>>,
    pub(crate) updated: Vec<(Arc<K>, Arc<K>)>,
    pub(crate) removed: Vec<(ObjectKey, Arc<K>)>,
}

impl<K> ReplaceDiff<K> {
    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

struct Tombstone<K> {
    last: Arc<K>,
    deleted_at: Instant,
}

struct StoreState<K> {
    objects: HashMap<ObjectKey, Arc<K>>,
    tombstones: HashMap<ObjectKey, Tombstone<K>>,
}

/// Objects keyed by [`ObjectKey`].
///
/// Written only by the informer thread; read concurrently through
/// [`Lister`](crate::Lister).
pub(crate) struct Store<K> {
    state: RwLock<StoreState<K>>,
    tombstone_ttl: Duration,
}

impl<K: Resource> Store<K> {
    pub(crate) fn new(tombstone_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState {
                objects: HashMap::new(),
                tombstones: HashMap::new(),
            }),
            tombstone_ttl,
        }
    }

    /// Inserts or overwrites `obj`. An object whose resource version
    /// matches the cached one is ignored.
    pub(crate) fn upsert(&self, obj: K) -> Upsert<K> {
        let key = obj.key();
        let mut state = self.state.write();
        if let Some(old) = state.objects.get(&key) {
            if old.resource_version() == obj.resource_version() {
                return Upsert::Unchanged;
            }
        }

        let new = Arc::new(obj);
        state.tombstones.remove(&key);
        match state.objects.insert(key, Arc::clone(&new)) {
            Some(old) => Upsert::Updated { old, new },
            None => Upsert::Created(new),
        }
    }

    /// Removes `key`, keeping its last state as a tombstone.
    pub(crate) fn delete(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let mut state = self.state.write();
        let last = state.objects.remove(key)?;
        self.bury(&mut state, key.clone(), Arc::clone(&last));
        Some(last)
    }

    /// Replaces the whole content with `items`, returning what changed.
    pub(crate) fn replace(&self, items: Vec<K>) -> ReplaceDiff<K> {
        let mut diff = ReplaceDiff {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        };
        let mut seen = HashSet::with_capacity(items.len());
        let mut state = self.state.write();

        for obj in items {
            let key = obj.key();
            seen.insert(key.clone());
            match state.objects.get(&key) {
                Some(old) if old.resource_version() == obj.resource_version() => {}
                Some(old) => {
                    let old = Arc::clone(old);
                    let new = Arc::new(obj);
                    state.objects.insert(key, Arc::clone(&new));
                    diff.updated.push((old, new));
                }
                None => {
                    let new = Arc::new(obj);
                    state.tombstones.remove(&key);
                    state.objects.insert(key, Arc::clone(&new));
                    diff.added.push(new);
                }
            }
        }

        let gone: Vec<ObjectKey> = state
            .objects
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(last) = state.objects.remove(&key) {
                self.bury(&mut state, key.clone(), Arc::clone(&last));
                diff.removed.push((key, last));
            }
        }
        diff
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.state.read().objects.get(key).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Arc<K>> {
        self.state.read().objects.values().cloned().collect()
    }

    pub(crate) fn list_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        self.state
            .read()
            .objects
            .iter()
            .filter(|(key, _)| key.namespace() == Some(namespace))
            .map(|(_, obj)| Arc::clone(obj))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Returns the last known state of a deleted object, if its tombstone
    /// has not expired.
    pub(crate) fn tombstone(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let state = self.state.read();
        let tombstone = state.tombstones.get(key)?;
        (tombstone.deleted_at.elapsed() < self.tombstone_ttl).then(|| Arc::clone(&tombstone.last))
    }

    fn bury(&self, state: &mut StoreState<K>, key: ObjectKey, last: Arc<K>) {
        let ttl = self.tombstone_ttl;
        state
            .tombstones
            .retain(|_, tombstone| tombstone.deleted_at.elapsed() < ttl);
        if !ttl.is_zero() {
            state.tombstones.insert(
                key,
                Tombstone {
                    last,
                    deleted_at: Instant::now(),
                },
            );
        }
    }
}
