//! Fixtures shared by the pipeline tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use jobsync_core::{JobId, Settings};
use jobsync_sync::store::{ClusterInfo, FolderEntry, JobSummary, WarehouseInfo};
use jobsync_sync::{MemoryStore, OperationSnapshot, Orchestrator, StoreError, WorkspaceStore};

pub const FOLDER: &str = "/Repos/ops/jobs";
pub const MAPPINGS: &str = "/Workspace/jobsync.config.json";

pub fn settings(work: &TempDir) -> Settings {
    Settings {
        source_folder: Some(FOLDER.to_string()),
        num_threads: 3,
        mappings_path: MAPPINGS.to_string(),
        work_dir: work.path().join("runs"),
        store_root: work.path().join("workspace"),
    }
}

/// A store with one cluster (`shared`) and one warehouse (`bi`).
pub fn workspace() -> MemoryStore {
    MemoryStore::new()
        .with_cluster("0101-abc", "shared")
        .with_warehouse("wh-1", "bi")
}

pub fn definition_path(name: &str) -> String {
    format!("{FOLDER}/{name}.json")
}

pub fn put_definition(store: &MemoryStore, file_name: &str, document: Value) {
    let bytes = serde_json::to_vec_pretty(&document).expect("serialize definition");
    store.put_file(&format!("{FOLDER}/{file_name}"), bytes);
}

pub fn notebook_job(name: &str, path: &str) -> Value {
    json!({
        "name": name,
        "tasks": [{"task_key": "main", "notebook_task": {"notebook_path": path}}]
    })
}

/// Poll until `id` reaches a terminal status.
pub async fn wait(orchestrator: &Orchestrator, id: &str) -> OperationSnapshot {
    for _ in 0..500 {
        let snapshot = orchestrator.poll(id).await.expect("poll");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {id} did not finish");
}

/// Lines of the operation output containing `needle`.
pub fn lines_with<'a>(snapshot: &'a OperationSnapshot, needle: &str) -> Vec<&'a str> {
    snapshot.output.lines().filter(|l| l.contains(needle)).collect()
}

/// Memory store with a slow `list_jobs` and an optional panic in `get_job`.
pub struct ScriptedStore {
    pub inner: Arc<MemoryStore>,
    pub list_delay: Duration,
    pub panic_on_get: Option<JobId>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            list_delay: Duration::ZERO,
            panic_on_get: None,
        }
    }
}

#[async_trait]
impl WorkspaceStore for ScriptedStore {
    async fn list_jobs(&self) -> Result<Vec<JobSummary>, StoreError> {
        tokio::time::sleep(self.list_delay).await;
        self.inner.list_jobs().await
    }

    async fn get_job(&self, id: JobId) -> Result<Value, StoreError> {
        if self.panic_on_get == Some(id) {
            panic!("store exploded on job {id}");
        }
        self.inner.get_job(id).await
    }

    async fn create_job(&self, settings: Value) -> Result<JobId, StoreError> {
        self.inner.create_job(settings).await
    }

    async fn update_job(&self, id: JobId, settings: Value) -> Result<(), StoreError> {
        self.inner.update_job(id, settings).await
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.inner.delete_job(id).await
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, StoreError> {
        self.inner.list_clusters().await
    }

    async fn list_warehouses(&self) -> Result<Vec<WarehouseInfo>, StoreError> {
        self.inner.list_warehouses().await
    }

    async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>, StoreError> {
        self.inner.list_folder(path).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.download(path).await
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, overwrite: bool) -> Result<(), StoreError> {
        self.inner.upload(path, bytes, overwrite).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }
}
