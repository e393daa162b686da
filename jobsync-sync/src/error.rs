//! Error types for jobsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use jobsync_core::{OperationKind, OperationStatus};

use crate::store::StoreError;

/// Operation-level failures. Anything surfacing as a `SyncError` from a
/// pipeline body ends the operation as `failed`; per-job problems are
/// recorded on the item instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required setting is missing or unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The name-mapping record exists but cannot be parsed.
    #[error("malformed name mappings at {path}: {source}")]
    InvalidMappings {
        path: String,
        #[source]
        source: json5::Error,
    },

    /// The source folder holds no `.json` files.
    #[error("no .json files found in workspace folder: {folder}")]
    NoFiles { folder: String },

    /// Every download in the transfer phase failed.
    #[error("no files were successfully downloaded")]
    NoFilesTransferred,

    /// A workspace store call failed where it cannot be isolated to one item.
    #[error("workspace store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Rejections from the [`Orchestrator`](crate::Orchestrator) API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An operation of the same kind has not reached a terminal state.
    #[error("a {kind} operation is already running ({running_id})")]
    Conflict {
        kind: OperationKind,
        running_id: String,
    },

    #[error("operation not found: {id}")]
    NotFound { id: String },

    /// The validation run exists but has not finished yet.
    #[error("operation {id} is still {status}")]
    NotReady { id: String, status: OperationStatus },

    /// The referenced operation is not a validation run.
    #[error("operation {id} is a {kind} operation, not a validation run")]
    NotAValidation { id: String, kind: OperationKind },

    /// Only import and delete consume a validation batch.
    #[error("{kind} operations do not take a validation run as input")]
    NoBatchInput { kind: OperationKind },

    /// The validation run ended without producing a usable batch.
    #[error("validation {id} ended as {status} and has no job statuses")]
    NoBatch { id: String, status: OperationStatus },
}
