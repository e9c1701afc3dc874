//! Cache change notifications.

use ctrlkit_api::{ObjectKey, Resource};
use std::sync::Arc;

/// A change applied to an informer's cache.
#[derive(Debug)]
pub enum Notification<K> {
    /// An object entered the cache.
    Added(Arc<K>),
    /// A cached object was replaced. `old` and `new` are the same object
    /// on a periodic resync.
    Updated {
        /// Previously cached state.
        old: Arc<K>,
        /// Current state.
        new: Arc<K>,
    },
    /// An object left the cache.
    Deleted(DeletedObject<K>),
}

impl<K: Resource> Notification<K> {
    /// Key of the affected object.
    pub fn key(&self) -> ObjectKey {
        match self {
            Notification::Added(obj) => obj.key(),
            Notification::Updated { new, .. } => new.key(),
            Notification::Deleted(deleted) => deleted.key(),
        }
    }
}

/// The object carried by a delete notification.
#[derive(Debug)]
pub enum DeletedObject<K> {
    /// The delete was observed on the watch stream.
    Known(Arc<K>),
    /// The delete was inferred by a relist. `last` is the state the cache
    /// held and may be stale.
    FinalStateUnknown {
        /// Key of the deleted object.
        key: ObjectKey,
        /// Last cached state.
        last: Arc<K>,
    },
}

impl<K: Resource> DeletedObject<K> {
    /// Key of the deleted object.
    pub fn key(&self) -> ObjectKey {
        match self {
            DeletedObject::Known(obj) => obj.key(),
            DeletedObject::FinalStateUnknown { key, .. } => key.clone(),
        }
    }

    /// Last known state of the deleted object.
    pub fn object(&self) -> &Arc<K> {
        match self {
            DeletedObject::Known(obj) => obj,
            DeletedObject::FinalStateUnknown { last, .. } => last,
        }
    }
}

/// Receives cache notifications, synchronously and in event order.
///
/// Implemented for every `Fn(&Notification<K>)` closure.
pub trait EventHandler<K>: Send + Sync {
    /// Handles one notification. Must not block for long: the informer
    /// does not consume the next event until every handler returned.
    fn on_notification(&self, notification: &Notification<K>);
}

impl<K, F> EventHandler<K> for F
where
    F: Fn(&Notification<K>) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification<K>) {
        self(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlkit_api::{CronTab, CronTabSpec};

    #[test]
    fn keys_derive_from_either_delete_variant() {
        let obj = Arc::new(CronTab::new("ns", "a", CronTabSpec::default()));
        let known = DeletedObject::Known(Arc::clone(&obj));
        let inferred = DeletedObject::FinalStateUnknown {
            key: ObjectKey::new("ns", "a"),
            last: Arc::clone(&obj),
        };
        assert_eq!(known.key(), inferred.key());
        assert_eq!(
            Notification::Deleted(inferred).key().to_string(),
            "ns/a"
        );
    }

    #[test]
    fn update_key_uses_new_object() {
        let old = Arc::new(CronTab::new("ns", "a", CronTabSpec::default()));
        let notification = Notification::Updated {
            old: Arc::clone(&old),
            new: old,
        };
        assert_eq!(notification.key(), ObjectKey::new("ns", "a"));
    }
}
