//! Error types for the API boundary.

use thiserror::Error;

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the control plane or the client talking to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist.
    #[error("object {0} not found")]
    NotFound(String),

    /// An object with the same key already exists.
    #[error("object {0} already exists")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed.
    #[error("conflict on {key}: expected resource version {expected}, got {actual}")]
    Conflict {
        /// Object key.
        key: String,
        /// Resource version currently stored.
        expected: u64,
        /// Resource version supplied by the caller.
        actual: u64,
    },

    /// The requested watch cursor has been compacted away.
    #[error("resource version {requested} is too old, oldest available is {oldest}")]
    Expired {
        /// Requested resource version.
        requested: u64,
        /// Oldest resource version still in history.
        oldest: u64,
    },

    /// The control plane is temporarily unreachable.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// A frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// A key string did not have the `namespace/name` or `name` shape.
    #[error("unexpected key format: {0:?}")]
    InvalidKey(String),
}

impl ApiError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Unavailable(_) | ApiError::Conflict { .. })
    }

    /// Returns true if the caller must relist before watching again.
    pub fn requires_relist(&self) -> bool {
        matches!(self, ApiError::Expired { .. })
    }
}
