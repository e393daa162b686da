//! Name ↔ id index of the live clusters, warehouses and jobs.
//!
//! Built once at the start of an operation and shared read-only by every
//! worker of that operation.

use std::collections::HashMap;

use serde_json::Value;

use jobsync_core::{JobId, ResourceKind};

use crate::store::{ClusterInfo, JobSummary, StoreError, WarehouseInfo, WorkspaceStore};

/// Reverse lookup used when encoding: live id → symbolic name.
pub trait NameResolver: Send + Sync {
    /// Name of the resource of `kind` whose live id is `id`.
    /// Ids arrive as JSON because jobs carry them as numbers and compute
    /// resources as strings.
    fn name_of(&self, kind: ResourceKind, id: &Value) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    cluster_ids: HashMap<String, String>,
    cluster_names: HashMap<String, String>,
    warehouse_ids: HashMap<String, String>,
    warehouse_names: HashMap<String, String>,
    job_ids: HashMap<String, JobId>,
    job_names: HashMap<JobId, String>,
    jobs: Vec<JobSummary>,
}

impl ResourceIndex {
    /// When two live resources share a name, the first listed wins.
    pub fn new(clusters: &[ClusterInfo], warehouses: &[WarehouseInfo], jobs: &[JobSummary]) -> Self {
        let mut index = Self::default();
        for c in clusters {
            index
                .cluster_ids
                .entry(c.cluster_name.clone())
                .or_insert_with(|| c.cluster_id.clone());
            index
                .cluster_names
                .insert(c.cluster_id.clone(), c.cluster_name.clone());
        }
        for w in warehouses {
            index
                .warehouse_ids
                .entry(w.name.clone())
                .or_insert_with(|| w.id.clone());
            index.warehouse_names.insert(w.id.clone(), w.name.clone());
        }
        for j in jobs {
            index.job_ids.entry(j.name.clone()).or_insert(j.job_id);
            index.job_names.insert(j.job_id, j.name.clone());
        }
        index.jobs = jobs.to_vec();
        index.jobs.sort_by(|a, b| a.name.cmp(&b.name).then(a.job_id.cmp(&b.job_id)));
        index
    }

    /// List jobs, clusters and warehouses from `store`.
    pub async fn load(store: &dyn WorkspaceStore) -> Result<Self, StoreError> {
        let jobs = store.list_jobs().await?;
        let clusters = store.list_clusters().await?;
        let warehouses = store.list_warehouses().await?;
        Ok(Self::new(&clusters, &warehouses, &jobs))
    }

    /// Live id for a resource name: cluster and warehouse ids as JSON
    /// strings, job ids as JSON numbers.
    pub fn resolve(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        match kind {
            ResourceKind::Cluster => self.cluster_ids.get(name).cloned().map(Value::String),
            ResourceKind::Warehouse => self.warehouse_ids.get(name).cloned().map(Value::String),
            ResourceKind::Job => self.job_id(name).map(Value::from),
        }
    }

    pub fn job_id(&self, name: &str) -> Option<JobId> {
        self.job_ids.get(name).copied()
    }

    /// Live jobs sorted by name.
    pub fn jobs(&self) -> &[JobSummary] {
        &self.jobs
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.job_ids.contains_key(name)
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_names.len()
    }

    pub fn warehouse_count(&self) -> usize {
        self.warehouse_names.len()
    }
}

impl NameResolver for ResourceIndex {
    fn name_of(&self, kind: ResourceKind, id: &Value) -> Option<String> {
        let key = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        match kind {
            ResourceKind::Cluster => self.cluster_names.get(&key).cloned(),
            ResourceKind::Warehouse => self.warehouse_names.get(&key).cloned(),
            ResourceKind::Job => {
                let id = key.parse::<u64>().ok()?;
                self.job_names.get(&JobId(id)).cloned()
            }
        }
    }
}
