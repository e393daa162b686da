//! In-process [`WorkspaceStore`].
//!
//! Holds jobs, clusters, warehouses and files in one mutex-guarded state.
//! Failures can be injected per call with [`MemoryStore::fail`], which is how
//! the pipeline tests exercise per-item error isolation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use jobsync_core::JobId;

use crate::store::{
    job_name, ClusterInfo, EntryKind, FolderEntry, JobSummary, StoreError, WarehouseInfo,
    WorkspaceStore,
};

const CREATOR: &str = "jobsync@localhost";

/// A store call that should fail on its next and every later invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    ListJobs,
    GetJob(JobId),
    CreateJob(String),
    UpdateJob(JobId),
    DeleteJob(JobId),
    ListFolder(String),
    Download(String),
    Upload(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    jobs: BTreeMap<JobId, Value>,
    clusters: Vec<ClusterInfo>,
    warehouses: Vec<WarehouseInfo>,
    files: BTreeMap<String, Vec<u8>>,
    faults: HashSet<Fault>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(self, cluster_id: &str, cluster_name: &str) -> Self {
        self.lock().clusters.push(ClusterInfo {
            cluster_id: cluster_id.to_string(),
            cluster_name: cluster_name.to_string(),
        });
        self
    }

    pub fn with_warehouse(self, id: &str, name: &str) -> Self {
        self.lock().warehouses.push(WarehouseInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Register a live job and return its id.
    pub fn insert_job(&self, settings: Value) -> JobId {
        let mut state = self.lock();
        let id = allocate_id(&mut state);
        state.jobs.insert(id, job_document(id, settings));
        id
    }

    /// Register a live job from a full document, stored as given apart from
    /// its `job_id`. Covers shapes [`insert_job`](Self::insert_job) never
    /// produces, such as a legacy top-level `run_as_user_name` without
    /// `settings.run_as`.
    pub fn insert_job_document(&self, mut document: Value) -> JobId {
        let mut state = self.lock();
        let id = allocate_id(&mut state);
        if let Some(top) = document.as_object_mut() {
            top.insert("job_id".into(), json!(id));
        }
        state.jobs.insert(id, document);
        id
    }

    /// Store a file at a workspace path, replacing any existing content.
    pub fn put_file(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.to_string(), bytes.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Parse the file at `path` as JSON.
    pub fn file_json(&self, path: &str) -> Option<Value> {
        self.file(path)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn job(&self, id: JobId) -> Option<Value> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn job_by_name(&self, name: &str) -> Option<(JobId, Value)> {
        self.lock()
            .jobs
            .iter()
            .find(|(_, doc)| job_name(doc) == Some(name))
            .map(|(id, doc)| (*id, doc.clone()))
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn fail(&self, fault: Fault) {
        self.lock().faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation is a single insert/remove, so poisoned state is still whole.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(state: &State, fault: Fault) -> Result<(), StoreError> {
        if state.faults.contains(&fault) {
            return Err(StoreError::Backend(format!("injected failure: {fault:?}")));
        }
        Ok(())
    }
}

fn allocate_id(state: &mut State) -> JobId {
    state.next_id += 1;
    JobId(1000 + state.next_id)
}

/// Full document as the jobs API returns it.
pub(crate) fn job_document(id: JobId, settings: Value) -> Value {
    let mut doc = json!({
        "job_id": id,
        "created_time": Utc::now().timestamp_millis(),
        "creator_user_name": CREATOR,
        "settings": settings,
    });
    if let Some(identity) = run_as_identity(&doc["settings"]) {
        doc["run_as_user_name"] = Value::String(identity);
    }
    doc
}

fn run_as_identity(settings: &Value) -> Option<String> {
    let run_as = settings.get("run_as")?;
    run_as
        .get("user_name")
        .or_else(|| run_as.get("service_principal_name"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

pub(crate) fn require_named_settings(settings: &Value) -> Result<&str, StoreError> {
    if !settings.is_object() {
        return Err(StoreError::InvalidRequest("job settings must be an object".into()));
    }
    settings
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidRequest("job settings require a string 'name'".into()))
}

/// Direct children of `folder` among `paths`: files, plus one directory
/// entry per nested prefix.
pub(crate) fn folder_children<'a>(
    folder: &str,
    paths: impl Iterator<Item = &'a String>,
) -> Vec<FolderEntry> {
    let prefix = format!("{}/", folder.trim_end_matches('/'));
    let mut files = Vec::new();
    let mut dirs = BTreeSet::new();
    for path in paths {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        match rest.split_once('/') {
            None => files.push(FolderEntry {
                path: path.clone(),
                kind: EntryKind::File,
            }),
            Some((dir, _)) => {
                dirs.insert(format!("{prefix}{dir}"));
            }
        }
    }
    files.extend(dirs.into_iter().map(|path| FolderEntry {
        path,
        kind: EntryKind::Directory,
    }));
    files
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn list_jobs(&self) -> Result<Vec<JobSummary>, StoreError> {
        let state = self.lock();
        Self::check(&state, Fault::ListJobs)?;
        Ok(state
            .jobs
            .iter()
            .filter_map(|(id, doc)| {
                job_name(doc).map(|name| JobSummary {
                    job_id: *id,
                    name: name.to_string(),
                })
            })
            .collect())
    }

    async fn get_job(&self, id: JobId) -> Result<Value, StoreError> {
        let state = self.lock();
        Self::check(&state, Fault::GetJob(id))?;
        state
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn create_job(&self, settings: Value) -> Result<JobId, StoreError> {
        let name = require_named_settings(&settings)?.to_string();
        let mut state = self.lock();
        Self::check(&state, Fault::CreateJob(name))?;
        let id = allocate_id(&mut state);
        state.jobs.insert(id, job_document(id, settings));
        Ok(id)
    }

    async fn update_job(&self, id: JobId, settings: Value) -> Result<(), StoreError> {
        require_named_settings(&settings)?;
        let mut state = self.lock();
        Self::check(&state, Fault::UpdateJob(id))?;
        let Some(existing) = state.jobs.get(&id) else {
            return Err(StoreError::NotFound(format!("job {id}")));
        };
        let mut updated = job_document(id, settings);
        updated["created_time"] = existing["created_time"].clone();
        state.jobs.insert(id, updated);
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, Fault::DeleteJob(id))?;
        state
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError> {
        Ok(self.lock().clusters.clone())
    }

    async fn list_warehouses(&self) -> Result<Vec<WarehouseInfo>, StoreError> {
        Ok(self.lock().warehouses.clone())
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>, StoreError> {
        let state = self.lock();
        Self::check(&state, Fault::ListFolder(path.to_string()))?;
        Ok(folder_children(path, state.files.keys()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.lock();
        Self::check(&state, Fault::Download(path.to_string()))?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, Fault::Upload(path.to_string()))?;
        if !overwrite && state.files.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        state.files.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, Fault::Delete(path.to_string()))?;
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_list_and_get() {
        let store = MemoryStore::new();
        let id = store
            .create_job(json!({"name": "etl", "tasks": []}))
            .await
            .expect("create");
        let jobs = store.list_jobs().await.expect("list");
        assert_eq!(jobs, vec![JobSummary { job_id: id, name: "etl".into() }]);

        let doc = store.get_job(id).await.expect("get");
        assert_eq!(doc["job_id"], json!(id.0));
        assert_eq!(doc["creator_user_name"], json!(CREATOR));
    }

    #[tokio::test]
    async fn run_as_identity_is_mirrored_at_top_level() {
        let store = MemoryStore::new();
        let id = store.insert_job(json!({"name": "a", "run_as": {"user_name": "alice"}}));
        assert_eq!(store.job(id).expect("job")["run_as_user_name"], json!("alice"));
    }

    #[tokio::test]
    async fn raw_documents_keep_their_shape() {
        let store = MemoryStore::new();
        let id = store.insert_job_document(json!({
            "job_id": 1,
            "run_as_user_name": "alice",
            "settings": {"name": "legacy"}
        }));
        let doc = store.get_job(id).await.expect("get");
        assert_eq!(doc["job_id"], json!(id.0));
        assert_eq!(doc["run_as_user_name"], json!("alice"));
        assert!(doc["settings"].get("run_as").is_none());
        assert!(doc.get("creator_user_name").is_none());
        assert_eq!(store.job_by_name("legacy").map(|(found, _)| found), Some(id));
    }

    #[tokio::test]
    async fn create_requires_name() {
        let store = MemoryStore::new();
        let err = store.create_job(json!({"tasks": []})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)), "got: {err}");
    }

    #[tokio::test]
    async fn update_keeps_created_time() {
        let store = MemoryStore::new();
        let id = store.insert_job(json!({"name": "a"}));
        let created = store.job(id).expect("job")["created_time"].clone();
        store
            .update_job(id, json!({"name": "a", "max_concurrent_runs": 2}))
            .await
            .expect("update");
        let doc = store.job(id).expect("job");
        assert_eq!(doc["created_time"], created);
        assert_eq!(doc["settings"]["max_concurrent_runs"], json!(2));
    }

    #[tokio::test]
    async fn list_folder_returns_direct_children() {
        let store = MemoryStore::new();
        store.put_file("/Repos/jobs/a.json", "{}");
        store.put_file("/Repos/jobs/nested/b.json", "{}");
        store.put_file("/Repos/other/c.json", "{}");

        let entries = store.list_folder("/Repos/jobs").await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/Repos/jobs/a.json");
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[1].path, "/Repos/jobs/nested");
    }

    #[tokio::test]
    async fn upload_without_overwrite_rejects_existing() {
        let store = MemoryStore::new();
        store.put_file("/x.json", "1");
        let err = store.upload("/x.json", b"2".to_vec(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        store.upload("/x.json", b"2".to_vec(), true).await.expect("overwrite");
        assert_eq!(store.file("/x.json"), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn injected_fault_fails_only_that_call() {
        let store = MemoryStore::new();
        let a = store.insert_job(json!({"name": "a"}));
        let b = store.insert_job(json!({"name": "b"}));
        store.fail(Fault::GetJob(a));

        assert!(store.get_job(a).await.is_err());
        assert!(store.get_job(b).await.is_ok());

        store.clear_faults();
        assert!(store.get_job(a).await.is_ok());
    }
}
