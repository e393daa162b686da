//! Operation registry and lifecycle.
//!
//! One `Orchestrator` is owned by the daemon. `start` admits at most one
//! non-terminal operation per kind; everything else about an operation is
//! read back through `poll`/`list`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use jobsync_core::{OperationKind, OperationStatus, Settings};

use crate::error::{OrchestratorError, SyncError};
use crate::index::ResourceIndex;
use crate::operation::{Operation, OperationSnapshot};
use crate::pipeline::{self, failure_message, Batch, PipelineContext, StartRequest};
use crate::snapshot::SnapshotDir;
use crate::store::WorkspaceStore;

#[derive(Default)]
struct Registry {
    operations: HashMap<String, Arc<Operation>>,
    /// Kind → id of its most recent operation; it blocks new starts of that
    /// kind until it reaches a terminal status.
    active: HashMap<OperationKind, String>,
}

/// Counts describing the configured workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub source_folder: Option<String>,
    /// `.json` files in the source folder; `None` when it cannot be listed.
    pub json_files: Option<usize>,
    pub jobs: usize,
    pub clusters: usize,
    pub warehouses: usize,
    pub mappings_path: String,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    registry: Arc<RwLock<Registry>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn WorkspaceStore>, settings: Settings) -> Self {
        Self {
            ctx: PipelineContext::new(store, settings),
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    /// Register and dispatch an operation. Returns its id.
    pub async fn start(&self, request: StartRequest) -> Result<String, OrchestratorError> {
        let kind = request.kind();
        let op = Arc::new(Operation::with_source(kind, request.source_validation()));
        let id = op.id().to_string();
        {
            let mut registry = self.registry.write().await;
            let running = registry
                .active
                .get(&kind)
                .and_then(|active| registry.operations.get(active))
                .filter(|active| !active.status().is_terminal());
            if let Some(running) = running {
                return Err(OrchestratorError::Conflict {
                    kind,
                    running_id: running.id().to_string(),
                });
            }
            registry.operations.insert(id.clone(), Arc::clone(&op));
            registry.active.insert(kind, id.clone());
        }
        tracing::info!(operation_id = %id, %kind, "operation started");

        let ctx = self.ctx.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let body = tokio::spawn(pipeline::run(ctx, Arc::clone(&op), request));
            if let Err(e) = body.await {
                op.finish(OperationStatus::Failed, failure_message(kind, &e));
            } else if !op.status().is_terminal() {
                op.finish(OperationStatus::Failed, failure_message(kind, &"ended without a result"));
            }
            let status = op.status();
            tracing::info!(operation_id = op.id(), %kind, %status, "operation finished");

            let mut registry = registry.write().await;
            if registry.active.get(&kind).map(String::as_str) == Some(op.id()) {
                registry.active.remove(&kind);
            }
        });
        Ok(id)
    }

    /// Start an import or delete from a finished validation run.
    pub async fn start_from_validation(
        &self,
        kind: OperationKind,
        validation_id: &str,
    ) -> Result<String, OrchestratorError> {
        if !matches!(kind, OperationKind::Import | OperationKind::Delete) {
            return Err(OrchestratorError::NoBatchInput { kind });
        }
        let batch = self.batch_from_validation(validation_id).await?;
        let request = match kind {
            OperationKind::Import => StartRequest::Import(batch),
            _ => StartRequest::Delete(batch),
        };
        self.start(request).await
    }

    async fn get(&self, id: &str) -> Result<Arc<Operation>, OrchestratorError> {
        self.registry
            .read()
            .await
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound { id: id.to_string() })
    }

    pub async fn poll(&self, id: &str) -> Result<OperationSnapshot, OrchestratorError> {
        Ok(self.get(id).await?.snapshot())
    }

    /// Every operation, newest first.
    pub async fn list(&self) -> Vec<OperationSnapshot> {
        let operations: Vec<Arc<Operation>> =
            self.registry.read().await.operations.values().cloned().collect();
        let mut snapshots: Vec<_> = operations.iter().map(|op| op.snapshot()).collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    /// Job statuses and snapshot directory of a finished validation run.
    pub async fn batch_from_validation(&self, id: &str) -> Result<Batch, OrchestratorError> {
        let op = self.get(id).await?;
        if op.kind() != OperationKind::Validate {
            return Err(OrchestratorError::NotAValidation {
                id: id.to_string(),
                kind: op.kind(),
            });
        }
        let status = op.status();
        if !status.is_terminal() {
            return Err(OrchestratorError::NotReady {
                id: id.to_string(),
                status,
            });
        }
        let report = op.report();
        let Some((report, dir)) = report.and_then(|r| r.snapshot_dir.clone().map(|dir| (r, dir))) else {
            return Err(OrchestratorError::NoBatch {
                id: id.to_string(),
                status,
            });
        };
        Ok(Batch {
            validation_id: Some(id.to_string()),
            job_statuses: report.job_statuses,
            snapshot_dir: Some(SnapshotDir::at(dir)),
        })
    }

    pub async fn workspace_info(&self) -> Result<WorkspaceInfo, SyncError> {
        let store = &*self.ctx.store;
        let settings = &self.ctx.settings;
        let index = ResourceIndex::load(store).await?;
        let json_files = match self.ctx.source_folder() {
            Ok(folder) => match store.list_folder(folder).await {
                Ok(entries) => Some(entries.iter().filter(|e| e.is_json_file()).count()),
                Err(e) => {
                    tracing::warn!(folder, error = %e, "cannot list source folder");
                    None
                }
            },
            Err(_) => None,
        };
        Ok(WorkspaceInfo {
            source_folder: settings.source_folder.clone(),
            json_files,
            jobs: index.jobs().len(),
            clusters: index.cluster_count(),
            warehouses: index.warehouse_count(),
            mappings_path: settings.mappings_path.clone(),
        })
    }
}
