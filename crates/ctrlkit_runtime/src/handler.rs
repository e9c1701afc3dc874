//! The pluggable reconciliation function.

use crate::cache::Lister;
use ctrlkit_api::{ApiError, ObjectKey, Resource};
use thiserror::Error;

/// Result type for sync handlers.
pub type SyncResult<T = ()> = Result<T, SyncError>;

/// A failed reconciliation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The key is retried with backoff.
    #[error("{0}")]
    Retry(String),

    /// The key is dropped without retry.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SyncError {
    /// Creates a retryable error.
    pub fn retry(msg: impl Into<String>) -> Self {
        SyncError::Retry(msg.into())
    }

    /// Creates a permanent error.
    pub fn permanent(msg: impl Into<String>) -> Self {
        SyncError::Permanent(msg.into())
    }

    /// Returns true if the key should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Retry(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidKey(_) | ApiError::Decode(_) => SyncError::Permanent(err.to_string()),
            _ => SyncError::Retry(err.to_string()),
        }
    }
}

/// Converges the state of one object.
///
/// Handlers receive only the key and read the current object from the
/// cache, so every call sees the latest state no matter how many events
/// were coalesced into it. A key missing from the cache means the object
/// was deleted; handlers should treat that as success once any cleanup is
/// done.
///
/// Calls for different keys run concurrently; the same key is never
/// handled by two workers at once.
///
/// Implemented for every `Fn(&ObjectKey, &Lister<K>) -> SyncResult` closure.
pub trait SyncHandler<K: Resource>: Send + Sync {
    /// Reconciles `key`.
    fn sync(&self, key: &ObjectKey, cache: &Lister<K>) -> SyncResult;
}

impl<K, F> SyncHandler<K> for F
where
    K: Resource,
    F: Fn(&ObjectKey, &Lister<K>) -> SyncResult + Send + Sync,
{
    fn sync(&self, key: &ObjectKey, cache: &Lister<K>) -> SyncResult {
        self(key, cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_retry_or_permanent() {
        assert!(SyncError::from(ApiError::Unavailable("down".into())).is_retryable());
        assert!(!SyncError::from(ApiError::InvalidKey("a/b/c".into())).is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::retry("image pull").to_string(), "image pull");
        assert_eq!(
            SyncError::permanent("bad spec").to_string(),
            "permanent: bad spec"
        );
    }
}
