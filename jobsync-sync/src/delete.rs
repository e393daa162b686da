//! Delete: remove live jobs that a validation run marked `deleted`.

use std::sync::Arc;

use jobsync_core::{ItemState, ItemStatus, JobStatus};

use crate::error::SyncError;
use crate::index::ResourceIndex;
use crate::operation::{batch_status, DeleteProgress, Operation};
use crate::pipeline::{Batch, PipelineContext};
use crate::pool::settle;

pub async fn run(ctx: &PipelineContext, op: &Arc<Operation>, batch: Batch) -> Result<(), SyncError> {
    let jobs = ctx.store.list_jobs().await?;
    let index = ResourceIndex::new(&[], &[], &jobs);

    let wanted = batch.with_status(&[JobStatus::Deleted]);
    op.add_items(wanted.iter().filter_map(|s| {
        s.job_name.as_ref().map(|name| ItemStatus {
            request: Some(s.clone()),
            ..ItemStatus::pending(name.as_str())
        })
    }));
    let names: Vec<String> = wanted.into_iter().filter_map(|s| s.job_name).collect();
    let total = names.len();
    op.info(format!("Deleting {total} jobs"));

    let mut dispatched = 0;
    let results = ctx
        .pool()
        .run(names.clone(), |name| {
            dispatched += 1;
            op.info(format!("[{dispatched}/{total}] Deleting job '{name}'"));
            op.set_item(&name, ItemState::InProgress, None);
            let store = Arc::clone(&ctx.store);
            let id = index.job_id(&name);
            async move {
                let Some(id) = id else {
                    return Err(format!("Job {name} not found in workspace"));
                };
                store
                    .delete_job(id)
                    .await
                    .map(|()| id)
                    .map_err(|e| format!("Failed to delete job: {e}"))
            }
        })
        .await;

    for (name, result) in names.iter().zip(results) {
        match settle(result) {
            Ok(id) => {
                op.info(format!("Deleted job '{name}' ({id})"));
                op.progress(|p: &mut DeleteProgress| p.deleted += 1);
                op.set_item(name, ItemState::Completed, None);
            }
            Err(e) => {
                op.error(format!("Job '{name}': {e}"));
                op.progress(|p: &mut DeleteProgress| p.failed_jobs += 1);
                op.set_item(name, ItemState::Error, Some(e));
            }
        }
    }

    let progress = op.progress(|p: &mut DeleteProgress| p.clone()).unwrap_or_default();
    let message = if progress.failed_jobs > 0 {
        format!("Deletion completed with {} failures", progress.failed_jobs)
    } else if progress.deleted == 0 {
        "Deletion completed. No jobs to delete".to_string()
    } else {
        "Deletion completed successfully".to_string()
    };
    op.finish(batch_status(progress.deleted, progress.failed_jobs), message);
    Ok(())
}
