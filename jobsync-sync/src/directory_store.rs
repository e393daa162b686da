//! Filesystem-backed [`WorkspaceStore`].
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   jobs/<job_id>.json     full job documents
//!   clusters.json          [{cluster_id, cluster_name}]   (optional)
//!   warehouses.json        [{id, name}]                   (optional)
//!   files/<path>           workspace files; `/Repos/a/b.json` → files/Repos/a/b.json
//! ```
//!
//! Writes go to a `.jobsync.tmp` sibling and are renamed into place.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use jobsync_core::JobId;

use crate::memory_store::{job_document, require_named_settings};
use crate::store::{
    join_path, job_name, store_io_err, ClusterInfo, EntryKind, FolderEntry, JobSummary,
    StoreError, WarehouseInfo, WorkspaceStore,
};

const FIRST_JOB_ID: u64 = 1001;

#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    /// Serializes job-id allocation and job document writes.
    jobs_lock: Mutex<()>,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            jobs_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.jobs_dir().join(format!("{id}.json"))
    }

    /// Map a workspace path onto `files/`. Rejects `..` and empty paths.
    fn file_path(&self, workspace_path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(workspace_path.trim_start_matches('/'));
        let mut out = self.root.join("files");
        let mut depth = 0;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    out.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(StoreError::InvalidRequest(format!(
                        "unsupported workspace path: {workspace_path}"
                    )))
                }
            }
        }
        if depth == 0 {
            return Err(StoreError::InvalidRequest(format!(
                "unsupported workspace path: {workspace_path}"
            )));
        }
        Ok(out)
    }

    async fn read_job_ids(&self) -> Result<Vec<JobId>, StoreError> {
        let dir = self.jobs_dir();
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_io_err(&dir, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| store_io_err(&dir, e))? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(JobId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn write_job(&self, id: JobId, doc: &Value) -> Result<(), StoreError> {
        let bytes = to_pretty_json(doc, &format!("job {id}"))?;
        write_atomic(&self.job_path(id), &bytes).await
    }
}

#[async_trait]
impl WorkspaceStore for DirectoryStore {
    async fn list_jobs(&self) -> Result<Vec<JobSummary>, StoreError> {
        let mut jobs = Vec::new();
        for id in self.read_job_ids().await? {
            let doc: Value = read_json(&self.job_path(id)).await?;
            if let Some(name) = job_name(&doc) {
                jobs.push(JobSummary {
                    job_id: id,
                    name: name.to_string(),
                });
            }
        }
        Ok(jobs)
    }

    async fn get_job(&self, id: JobId) -> Result<Value, StoreError> {
        match read_json(&self.job_path(id)).await {
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("job {id}")))
            }
            other => other,
        }
    }

    async fn create_job(&self, settings: Value) -> Result<JobId, StoreError> {
        require_named_settings(&settings)?;
        let _guard = self.jobs_lock.lock().await;
        let next = self
            .read_job_ids()
            .await?
            .last()
            .map_or(FIRST_JOB_ID, |last| last.0 + 1);
        let id = JobId(next);
        self.write_job(id, &job_document(id, settings)).await?;
        tracing::debug!(job_id = %id, "created job document");
        Ok(id)
    }

    async fn update_job(&self, id: JobId, settings: Value) -> Result<(), StoreError> {
        require_named_settings(&settings)?;
        let _guard = self.jobs_lock.lock().await;
        let existing = self.get_job(id).await?;
        let mut updated = job_document(id, settings);
        updated["created_time"] = existing["created_time"].clone();
        self.write_job(id, &updated).await
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let _guard = self.jobs_lock.lock().await;
        let path = self.job_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("job {id}")))
            }
            Err(e) => Err(store_io_err(&path, e)),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError> {
        read_json_or_default(&self.root.join("clusters.json")).await
    }

    async fn list_warehouses(&self) -> Result<Vec<WarehouseInfo>, StoreError> {
        read_json_or_default(&self.root.join("warehouses.json")).await
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>, StoreError> {
        let dir = self.file_path(path)?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("folder {path}")))
            }
            Err(e) => return Err(store_io_err(&dir, e)),
        };
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| store_io_err(&dir, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".jobsync.tmp") {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| store_io_err(entry.path(), e))?;
            entries.push(FolderEntry {
                path: join_path(path, &name),
                kind: if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let file = self.file_path(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(store_io_err(&file, e)),
        }
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), StoreError> {
        let file = self.file_path(path)?;
        if !overwrite && tokio::fs::try_exists(&file).await.unwrap_or(false) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        write_atomic(&file, &bytes).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let file = self.file_path(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(store_io_err(&file, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| store_io_err(parent, e))?;
    }
    let tmp = PathBuf::from(format!("{}.jobsync.tmp", path.display()));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| store_io_err(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(store_io_err(path, e));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| store_io_err(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        context: path.display().to_string(),
        source,
    })
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match read_json(path).await {
        Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            Ok(T::default())
        }
        other => other,
    }
}

fn to_pretty_json(value: &Value, context: &str) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        context: context.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn job_lifecycle_on_disk() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());

        let id = store
            .create_job(json!({"name": "etl", "tasks": [{"task_key": "a"}]}))
            .await
            .expect("create");
        assert_eq!(id, JobId(FIRST_JOB_ID));
        assert!(root.path().join("jobs/1001.json").exists());

        let jobs = store.list_jobs().await.expect("list");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "etl");

        store
            .update_job(id, json!({"name": "etl", "tasks": []}))
            .await
            .expect("update");
        assert_eq!(store.get_job(id).await.expect("get")["settings"]["tasks"], json!([]));

        store.delete_job(id).await.expect("delete");
        assert!(matches!(store.get_job(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn ids_continue_after_highest() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());
        let a = store.create_job(json!({"name": "a"})).await.expect("a");
        let b = store.create_job(json!({"name": "b"})).await.expect("b");
        assert_eq!(b.0, a.0 + 1);
    }

    #[tokio::test]
    async fn missing_resource_lists_are_empty() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());
        assert!(store.list_clusters().await.expect("clusters").is_empty());
        assert!(store.list_warehouses().await.expect("warehouses").is_empty());
        assert!(store.list_jobs().await.expect("jobs").is_empty());
    }

    #[tokio::test]
    async fn clusters_read_from_fixture() {
        let root = TempDir::new().expect("tempdir");
        std::fs::write(
            root.path().join("clusters.json"),
            r#"[{"cluster_id": "0101-abc", "cluster_name": "shared"}]"#,
        )
        .expect("write");
        let store = DirectoryStore::new(root.path());
        let clusters = store.list_clusters().await.expect("clusters");
        assert_eq!(clusters[0].cluster_name, "shared");
    }

    #[tokio::test]
    async fn files_roundtrip_and_list() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());
        store
            .upload("/Repos/jobs/a.json", b"{}".to_vec(), false)
            .await
            .expect("upload");
        store
            .upload("/Repos/jobs/sub/b.json", b"{}".to_vec(), false)
            .await
            .expect("upload nested");

        let entries = store.list_folder("/Repos/jobs").await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/Repos/jobs/a.json");
        assert!(entries[0].is_json_file());
        assert_eq!(entries[1].kind, EntryKind::Directory);

        assert_eq!(store.download("/Repos/jobs/a.json").await.expect("download"), b"{}");
        assert!(!root.path().join("files/Repos/jobs/a.json.jobsync.tmp").exists());
    }

    #[tokio::test]
    async fn missing_folder_is_not_found() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());
        let err = store.list_folder("/Repos/none").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)), "got: {err}");
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let root = TempDir::new().expect("tempdir");
        let store = DirectoryStore::new(root.path());
        let err = store.download("/Repos/../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)), "got: {err}");
    }
}
