//! CLI error type.

use ctrlkit_api::ApiError;
use ctrlkit_runtime::RuntimeError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// The seed file could not be read.
    #[error("failed to read seed file {path}: {source}")]
    SeedRead {
        /// Seed file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The seed file is not a JSON array of crontabs.
    #[error("invalid seed file {path}: {source}")]
    SeedFormat {
        /// Seed file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The control plane rejected a seed object.
    #[error("control plane error: {0}")]
    Api(#[from] ApiError),

    /// The controller failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A flag value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Summary output could not be encoded.
    #[error("failed to encode summary: {0}")]
    Output(#[from] serde_json::Error),

    /// The controller thread could not be joined.
    #[error("controller task failed: {0}")]
    Join(String),
}
