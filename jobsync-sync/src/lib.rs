//! # jobsync-sync
//!
//! Reconciliation engine for job definitions.
//!
//! - [`diff::compare`] compares two job documents.
//! - [`codec`] makes job definitions portable between workspaces.
//! - [`Orchestrator`] runs validate, export, import and delete operations
//!   against a [`WorkspaceStore`] and exposes their progress for polling.

pub mod codec;
pub mod delete;
pub mod diff;
pub mod directory_store;
pub mod error;
pub mod export;
pub mod import;
pub mod index;
pub mod mappings;
pub mod memory_store;
pub mod operation;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod snapshot;
pub mod store;
pub mod validate;

pub use directory_store::DirectoryStore;
pub use error::{OrchestratorError, SyncError};
pub use index::{NameResolver, ResourceIndex};
pub use memory_store::{Fault, MemoryStore};
pub use operation::{Operation, OperationSnapshot, Progress, ValidationReport};
pub use orchestrator::{Orchestrator, WorkspaceInfo};
pub use pipeline::{Batch, StartRequest};
pub use snapshot::SnapshotDir;
pub use store::{StoreError, WorkspaceStore};
