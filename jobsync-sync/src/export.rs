//! Export: write every live job to the source folder as a portable
//! definition, then remove definitions whose job no longer exists.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use jobsync_core::{ItemState, ItemStatus};

use crate::codec;
use crate::diff;
use crate::error::SyncError;
use crate::index::ResourceIndex;
use crate::operation::{batch_status, ExportProgress, Operation};
use crate::pipeline::PipelineContext;
use crate::pool::settle;
use crate::snapshot::definition_file_name;
use crate::store::{join_path, FolderEntry, JobSummary, WorkspaceStore};

/// What happened to one exported job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exported {
    Modified,
    Unchanged,
}

pub async fn run(ctx: &PipelineContext, op: &Arc<Operation>) -> Result<(), SyncError> {
    let folder = ctx.source_folder()?.to_string();
    let index = Arc::new(ResourceIndex::load(&*ctx.store).await?);

    let (jobs, shadowed): (Vec<JobSummary>, Vec<JobSummary>) = index
        .jobs()
        .iter()
        .cloned()
        .partition(|j| index.job_id(&j.name) == Some(j.job_id));
    warn_shadowed(op, &index, &shadowed);
    let total = jobs.len();
    op.progress(|p: &mut ExportProgress| p.total_jobs = total);
    op.add_items(jobs.iter().map(|j| ItemStatus::pending(j.name.as_str())));
    op.info(format!("Exporting {total} jobs to {folder}"));

    let names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
    let mut dispatched = 0;
    let results = ctx
        .pool()
        .run(jobs, |job| {
            dispatched += 1;
            op.info(format!("[{dispatched}/{total}] Exporting job '{}'", job.name));
            op.set_item(&job.name, ItemState::InProgress, None);
            let store = Arc::clone(&ctx.store);
            let index = Arc::clone(&index);
            let op = Arc::clone(op);
            let folder = folder.clone();
            async move { export_job(&*store, &index, &op, &folder, &job).await }
        })
        .await;

    for (name, result) in names.iter().zip(results) {
        match settle(result) {
            Ok(exported) => {
                op.progress(|p: &mut ExportProgress| {
                    p.processed_jobs += 1;
                    match exported {
                        Exported::Modified => p.exported_modified += 1,
                        Exported::Unchanged => p.exported_unchanged += 1,
                    }
                });
                op.info(format!("Exported job configuration for '{name}'"));
                op.set_item(name, ItemState::Completed, None);
            }
            Err(e) => {
                op.error(format!("Failed to export job '{name}': {e}"));
                op.progress(|p: &mut ExportProgress| {
                    p.processed_jobs += 1;
                    p.failed_jobs += 1;
                });
                op.set_item(name, ItemState::Error, Some(format!("Failed to export job: {e}")));
            }
        }
    }

    let live_names: HashSet<&str> = names.iter().map(String::as_str).collect();
    remove_orphans(ctx, op, &folder, &live_names).await;

    let progress = op.progress(|p: &mut ExportProgress| p.clone()).unwrap_or_default();
    let status = batch_status(progress.exported_modified + progress.deleted_files, progress.failed_jobs);
    let message = if progress.failed_jobs > 0 {
        format!("Export completed with {} failures", progress.failed_jobs)
    } else if progress.exported_modified + progress.deleted_files == 0 {
        "Export completed. No job changes detected".to_string()
    } else {
        "Export completed successfully".to_string()
    };
    op.finish(status, message);
    Ok(())
}

/// One warning per name listed more than once; only the indexed id of that
/// name is exported.
fn warn_shadowed(op: &Operation, index: &ResourceIndex, shadowed: &[JobSummary]) {
    let mut by_name: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for job in shadowed {
        by_name.entry(job.name.as_str()).or_default().push(job.job_id.to_string());
    }
    for (name, skipped) in by_name {
        let Some(kept) = index.job_id(name) else {
            continue;
        };
        op.warn(format!(
            "Multiple jobs named '{name}'; exporting id {kept}, skipping ids {}",
            skipped.join(", ")
        ));
    }
}

async fn export_job(
    store: &dyn WorkspaceStore,
    index: &ResourceIndex,
    op: &Operation,
    folder: &str,
    job: &JobSummary,
) -> Result<Exported, String> {
    let path = join_path(folder, &definition_file_name(&job.name).map_err(|e| e.to_string())?);
    let mut document = store.get_job(job.job_id).await.map_err(|e| e.to_string())?;

    let encoded = codec::encode(&mut document, index);
    for (kind, id) in &encoded.unresolved {
        op.warn(format!(
            "Job '{}': {kind} '{id}' could not be resolved to a name and is exported as unknown",
            job.name
        ));
    }

    if let Some(existing) = existing_copy(store, &path).await {
        if !diff::compare(&existing, &document).differs {
            op.info(format!("Job '{}' is unchanged", job.name));
            return Ok(Exported::Unchanged);
        }
    }

    let bytes = serde_json::to_vec_pretty(&document).map_err(|e| e.to_string())?;
    store.upload(&path, bytes, true).await.map_err(|e| e.to_string())?;
    op.info(format!("Uploaded modified job '{}' to {path}", job.name));
    Ok(Exported::Modified)
}

/// The uploaded copy at `path`; anything unreadable counts as absent.
async fn existing_copy(store: &dyn WorkspaceStore, path: &str) -> Option<Value> {
    let bytes = store.download(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Delete `.json` files in `folder` whose job name is not live. The name
/// mappings record is never touched, even when it lives in `folder`.
async fn remove_orphans(ctx: &PipelineContext, op: &Operation, folder: &str, live_names: &HashSet<&str>) {
    let store = &*ctx.store;
    let entries = match store.list_folder(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            op.warn(format!("Could not list {folder} for orphaned definitions: {e}"));
            return;
        }
    };
    let mut orphans: Vec<FolderEntry> = entries
        .into_iter()
        .filter(|entry| entry.is_json_file() && entry.path != ctx.settings.mappings_path)
        .filter(|entry| {
            let file_name = entry.file_name();
            let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
            !live_names.contains(stem)
        })
        .collect();
    orphans.sort_by(|a, b| a.path.cmp(&b.path));

    for orphan in orphans {
        match store.delete(&orphan.path).await {
            Ok(()) => {
                op.info(format!("Deleted orphaned job definition: {}", orphan.file_name()));
                op.progress(|p: &mut ExportProgress| p.deleted_files += 1);
            }
            Err(e) => op.warn(format!("Failed to delete orphaned job definition {}: {e}", orphan.file_name())),
        }
    }
}
