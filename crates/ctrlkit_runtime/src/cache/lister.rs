//! Read-only view of the cache.

use crate::cache::store::Store;
use ctrlkit_api::{ApiError, ApiResult, ObjectKey, Resource};
use std::sync::Arc;

/// Read access to an informer's cache.
///
/// Cheap to clone. Every read observes the cache at a single point in
/// time, but consecutive reads may see different states.
pub struct Lister<K> {
    store: Arc<Store<K>>,
}

impl<K: Resource> Lister<K> {
    pub(crate) fn new(store: Arc<Store<K>>) -> Self {
        Self { store }
    }

    /// Returns the cached object for `key`.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.store.get(key)
    }

    /// Returns the cached object `namespace/name`.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] if nothing is cached under that key.
    pub fn get_in(&self, namespace: &str, name: &str) -> ApiResult<Arc<K>> {
        let key = ObjectKey::new(namespace, name);
        self.store
            .get(&key)
            .ok_or_else(|| ApiError::NotFound(key.to_string()))
    }

    /// Returns every cached object, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.list()
    }

    /// Returns the cached objects of one namespace.
    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store.list_namespace(namespace)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last known state of a recently deleted object.
    pub fn tombstone(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.store.tombstone(key)
    }
}

impl<K> Clone for Lister<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlkit_api::{CronTab, CronTabSpec};
    use std::time::Duration;

    #[test]
    fn get_in_reports_not_found() {
        let store = Arc::new(Store::<CronTab>::new(Duration::from_secs(1)));
        let lister = Lister::new(Arc::clone(&store));
        assert_eq!(
            lister.get_in("ns", "missing").unwrap_err(),
            ApiError::NotFound("ns/missing".into())
        );

        store.upsert(CronTab::new("ns", "present", CronTabSpec::default()));
        assert_eq!(lister.get_in("ns", "present").unwrap().metadata.name, "present");
        assert_eq!(lister.clone().len(), 1);
    }
}
