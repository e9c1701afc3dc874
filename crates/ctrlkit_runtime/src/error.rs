//! Error types for the controller runtime.

use ctrlkit_api::ApiError;
use thiserror::Error;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by informers and controllers.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Control plane error that could not be retried away.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// The initial list never succeeded.
    #[error("initial list failed after {attempts} attempts: {source}")]
    InitialListFailed {
        /// Number of attempts made.
        attempts: u32,
        /// Last error returned by the client.
        source: ApiError,
    },

    /// The stop signal fired before the cache finished its initial sync.
    #[error("timed out waiting for caches to sync for {0}")]
    CacheSyncTimeout(String),

    /// A component was asked to make a lifecycle transition it cannot make.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Configuration rejected by `validate`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A thread could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::Api(err) => err.is_retryable(),
            RuntimeError::InitialListFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RuntimeError::Api(ApiError::Unavailable("down".into())).is_retryable());
        assert!(!RuntimeError::CacheSyncTimeout("c".into()).is_retryable());
        assert!(!RuntimeError::InvalidConfig("workers".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = RuntimeError::InitialListFailed {
            attempts: 3,
            source: ApiError::Unavailable("refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("refused"));

        let err = RuntimeError::CacheSyncTimeout("crontab-controller".into());
        assert_eq!(
            err.to_string(),
            "timed out waiting for caches to sync for crontab-controller"
        );
    }
}
