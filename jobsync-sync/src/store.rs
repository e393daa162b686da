//! Workspace Store: the remote job registry and file storage.
//!
//! The engine only talks to the workspace through [`WorkspaceStore`]. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`](crate::MemoryStore): in-process, used by tests and embedders
//! - [`DirectoryStore`](crate::DirectoryStore): a local fixture workspace on disk
//!
//! Job documents are untyped JSON shaped like a jobs API `get` response:
//! `{job_id, created_time, creator_user_name, run_as_user_name?, settings}`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use jobsync_core::JobId;

/// Failure of a single store call. Never retried by the engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failure reported by a remote backend.
    #[error("{0}")]
    Backend(String),
}

pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// One row of `list_jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of `list_folder`. `path` is the full workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl FolderEntry {
    /// Last path segment: `/Repos/jobs/etl.json` → `etl.json`.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_json_file(&self) -> bool {
        self.kind == EntryKind::File && self.path.ends_with(".json")
    }
}

/// Join a folder and a file name with exactly one `/`.
pub fn join_path(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

/// Access to a live workspace.
///
/// Every method is a single I/O boundary; callers decide whether a failure
/// is fatal (listing in an operation prologue) or isolated (one job, one file).
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<JobSummary>, StoreError>;

    /// Full job document.
    async fn get_job(&self, id: JobId) -> Result<Value, StoreError>;

    async fn create_job(&self, settings: Value) -> Result<JobId, StoreError>;

    /// Overwrite every setting of an existing job.
    async fn update_job(&self, id: JobId, settings: Value) -> Result<(), StoreError>;

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError>;

    async fn list_warehouses(&self) -> Result<Vec<WarehouseInfo>, StoreError>;

    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>, StoreError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    async fn upload(&self, path: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// `settings.name` of a job document, if present.
pub fn job_name(document: &Value) -> Option<&str> {
    document.get("settings")?.get("name")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn folder_entry_file_name() {
        let entry = FolderEntry {
            path: "/Repos/ops/jobs/nightly.json".into(),
            kind: EntryKind::File,
        };
        assert_eq!(entry.file_name(), "nightly.json");
        assert!(entry.is_json_file());
    }

    #[test]
    fn directories_are_not_json_files() {
        let entry = FolderEntry {
            path: "/Repos/ops/jobs/archive.json".into(),
            kind: EntryKind::Directory,
        };
        assert!(!entry.is_json_file());
    }

    #[test]
    fn join_path_single_separator() {
        assert_eq!(join_path("/Repos/jobs/", "a.json"), "/Repos/jobs/a.json");
        assert_eq!(join_path("/Repos/jobs", "a.json"), "/Repos/jobs/a.json");
    }

    #[test]
    fn job_name_reads_settings() {
        assert_eq!(job_name(&json!({"settings": {"name": "etl"}})), Some("etl"));
        assert_eq!(job_name(&json!({"settings": {}})), None);
        assert_eq!(job_name(&json!({"settings": {"name": 3}})), None);
    }
}
