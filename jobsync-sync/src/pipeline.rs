//! Shared pipeline entrypoint used by the orchestrator.
//!
//! [`run`] drives one operation from `running` to a terminal status. The
//! pipeline bodies return `Err` only for operation-level failures; per-job
//! failures are recorded on the operation and never surface here.

use std::sync::Arc;

use jobsync_core::{
    JobStatus, JobValidationStatus, OperationKind, OperationStatus, Settings,
};

use crate::error::SyncError;
use crate::operation::Operation;
use crate::pool::WorkerPool;
use crate::snapshot::SnapshotDir;
use crate::store::WorkspaceStore;
use crate::{delete, export, import, validate};

/// Everything a pipeline needs besides its own operation record.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn WorkspaceStore>,
    pub settings: Arc<Settings>,
}

impl PipelineContext {
    pub fn new(store: Arc<dyn WorkspaceStore>, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }

    /// A fresh pool sized by `num_threads`, one per phase.
    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.settings.num_threads)
    }

    /// The configured source folder, or a configuration error.
    pub fn source_folder(&self) -> Result<&str, SyncError> {
        self.settings
            .source_folder
            .as_deref()
            .map(str::trim)
            .filter(|folder| !folder.is_empty())
            .ok_or_else(|| SyncError::Configuration("source folder is not configured".into()))
    }
}

/// Input of an import or delete run, usually taken from a validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub validation_id: Option<String>,
    pub job_statuses: Vec<JobValidationStatus>,
    /// Required by import, unused by delete.
    pub snapshot_dir: Option<SnapshotDir>,
}

impl Batch {
    /// Records with status `status` that carry a job name, sorted by name.
    pub(crate) fn with_status(&self, wanted: &[JobStatus]) -> Vec<JobValidationStatus> {
        let mut selected: Vec<_> = self
            .job_statuses
            .iter()
            .filter(|s| s.job_name.is_some() && wanted.contains(&s.status))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        selected
    }
}

/// What to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRequest {
    Validate,
    Export,
    Import(Batch),
    Delete(Batch),
}

impl StartRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Validate => OperationKind::Validate,
            Self::Export => OperationKind::Export,
            Self::Import(_) => OperationKind::Import,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    pub(crate) fn source_validation(&self) -> Option<String> {
        match self {
            Self::Import(batch) | Self::Delete(batch) => batch.validation_id.clone(),
            Self::Validate | Self::Export => None,
        }
    }
}

/// Run `request` to completion on `op`.
pub async fn run(ctx: PipelineContext, op: Arc<Operation>, request: StartRequest) {
    op.set_status(OperationStatus::Running);
    let kind = request.kind();
    let result = match request {
        StartRequest::Validate => validate::run(&ctx, &op).await,
        StartRequest::Export => export::run(&ctx, &op).await,
        StartRequest::Import(batch) => import::run(&ctx, &op, batch).await,
        StartRequest::Delete(batch) => delete::run(&ctx, &op, batch).await,
    };
    if let Err(e) = result {
        op.finish(OperationStatus::Failed, failure_message(kind, &e));
    }
}

pub(crate) fn failure_message(kind: OperationKind, err: &dyn std::fmt::Display) -> String {
    match kind {
        OperationKind::Validate => format!("Validation Failed: {err}"),
        OperationKind::Export => format!("Export failed: {err}"),
        OperationKind::Import => format!("Import failed: {err}"),
        OperationKind::Delete => format!("Deletion failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status(name: &str, status: JobStatus) -> JobValidationStatus {
        JobValidationStatus {
            file_name: Some(format!("{name}.json")),
            job_name: Some(name.to_string()),
            status,
            differences: Vec::new(),
            validation_issues: Vec::new(),
        }
    }

    #[test]
    fn batch_selection_sorted_and_filtered() {
        let batch = Batch {
            validation_id: None,
            job_statuses: vec![
                status("zeta", JobStatus::New),
                status("alpha", JobStatus::Changed),
                status("mid", JobStatus::Unchanged),
                JobValidationStatus {
                    job_name: None,
                    ..status("nameless", JobStatus::New)
                },
            ],
            snapshot_dir: None,
        };
        let names: Vec<_> = batch
            .with_status(&[JobStatus::New, JobStatus::Changed])
            .into_iter()
            .filter_map(|s| s.job_name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn source_folder_must_be_set() {
        let settings = Settings {
            source_folder: Some("  ".into()),
            num_threads: 2,
            mappings_path: "/m.json".into(),
            work_dir: PathBuf::from("/tmp/runs"),
            store_root: PathBuf::from("/tmp/ws"),
        };
        let ctx = PipelineContext::new(Arc::new(crate::MemoryStore::new()), settings);
        assert!(matches!(ctx.source_folder(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn failure_messages_per_kind() {
        assert_eq!(
            failure_message(OperationKind::Validate, &"boom"),
            "Validation Failed: boom"
        );
        assert_eq!(failure_message(OperationKind::Delete, &"boom"), "Deletion failed: boom");
    }
}
