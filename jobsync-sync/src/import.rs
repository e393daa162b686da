//! Import: create or reset live jobs from the snapshots of a validation run.

use std::sync::Arc;

use jobsync_core::{ItemState, ItemStatus, JobId, JobStatus};

use crate::error::SyncError;
use crate::index::ResourceIndex;
use crate::operation::{batch_status, ImportProgress, Operation};
use crate::pipeline::{Batch, PipelineContext};
use crate::pool::settle;
use crate::snapshot::SnapshotDir;
use crate::store::WorkspaceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Imported {
    Created(JobId),
    Reset(JobId),
}

pub async fn run(ctx: &PipelineContext, op: &Arc<Operation>, batch: Batch) -> Result<(), SyncError> {
    let snapshots = batch.snapshot_dir.clone().ok_or_else(|| {
        SyncError::Configuration("the validation run has no validated snapshots".into())
    })?;
    let jobs = ctx.store.list_jobs().await?;
    let index = Arc::new(ResourceIndex::new(&[], &[], &jobs));

    let wanted = batch.with_status(&[JobStatus::New, JobStatus::Changed]);
    let mut skipped: Vec<_> = batch
        .job_statuses
        .iter()
        .filter(|s| !matches!(s.status, JobStatus::New | JobStatus::Changed))
        .filter_map(|s| s.job_name.clone().map(|name| (name, s.clone())))
        .collect();
    skipped.sort_by(|a, b| a.0.cmp(&b.0));

    op.add_items(wanted.iter().filter_map(|s| {
        s.job_name.as_ref().map(|name| ItemStatus {
            request: Some(s.clone()),
            ..ItemStatus::pending(name.as_str())
        })
    }));
    for (name, status) in &skipped {
        op.add_items([ItemStatus {
            state: ItemState::Skipped,
            request: Some(status.clone()),
            ..ItemStatus::pending(name.as_str())
        }]);
        op.debug(format!("Skipping job '{name}' with status {}", status.status));
    }
    let skipped_count = skipped.len();
    op.progress(|p: &mut ImportProgress| p.skipped = skipped_count);

    let names: Vec<String> = wanted.iter().filter_map(|s| s.job_name.clone()).collect();
    let total = names.len();
    op.info(format!("Importing {total} jobs, skipping {skipped_count}"));

    let mut dispatched = 0;
    let results = ctx
        .pool()
        .run(names.clone(), |name| {
            dispatched += 1;
            op.info(format!("[{dispatched}/{total}] Importing job '{name}'"));
            op.set_item(&name, ItemState::InProgress, None);
            let store = Arc::clone(&ctx.store);
            let index = Arc::clone(&index);
            let snapshots = snapshots.clone();
            async move { import_job(&*store, &index, &snapshots, &name).await }
        })
        .await;

    for (name, result) in names.iter().zip(results) {
        match settle(result) {
            Ok(Imported::Created(id)) => {
                op.info(format!("Created job '{name}' with id {id}"));
                op.progress(|p: &mut ImportProgress| p.imported += 1);
                op.set_item(name, ItemState::Completed, None);
            }
            Ok(Imported::Reset(id)) => {
                op.info(format!("Updated job '{name}' ({id})"));
                op.progress(|p: &mut ImportProgress| p.imported += 1);
                op.set_item(name, ItemState::Completed, None);
            }
            Err(e) => {
                op.error(format!("Failed to import job '{name}': {e}"));
                op.progress(|p: &mut ImportProgress| p.failed_jobs += 1);
                op.set_item(name, ItemState::Error, Some(format!("Failed to import job: {e}")));
            }
        }
    }

    let progress = op.progress(|p: &mut ImportProgress| p.clone()).unwrap_or_default();
    let message = if progress.failed_jobs > 0 {
        format!("Import completed with {} failures", progress.failed_jobs)
    } else if progress.imported == 0 {
        "Import completed. No jobs to import".to_string()
    } else {
        "Import completed successfully".to_string()
    };
    op.finish(batch_status(progress.imported, progress.failed_jobs), message);
    Ok(())
}

/// Send the snapshot's `settings` to the live job of that name, creating it
/// when absent.
async fn import_job(
    store: &dyn WorkspaceStore,
    index: &ResourceIndex,
    snapshots: &SnapshotDir,
    name: &str,
) -> Result<Imported, SyncError> {
    let document = snapshots.read(name).await?;
    let settings = document
        .get("settings")
        .filter(|settings| settings.is_object())
        .cloned()
        .ok_or_else(|| SyncError::Configuration(format!("validated snapshot of '{name}' has no settings")))?;

    match index.job_id(name) {
        Some(id) => {
            store.update_job(id, settings).await?;
            Ok(Imported::Reset(id))
        }
        None => Ok(Imported::Created(store.create_job(settings).await?)),
    }
}
