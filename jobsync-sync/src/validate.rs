//! Validation: classify every job definition in the source folder against
//! the live workspace and persist the resolved documents for import.
//!
//! Phases run strictly in order; each phase fans out over the worker pool.
//!
//! 1. index live jobs, clusters and warehouses
//! 2. transfer the `.json` files of the source folder
//! 3. download the full definition of every live job
//! 4. resolve, diff and classify each file, writing its snapshot
//! 5. flag live jobs that no file names as `deleted`
//! 6. aggregate the job statuses into the operation status

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use jobsync_core::{
    IssueLevel, IssueType, ItemState, ItemStatus, JobStatus, JobValidationStatus,
    OperationStatus, ResourceNameMappings, ValidationIssue,
};

use crate::codec::{self, RunAsOutcome};
use crate::diff;
use crate::error::SyncError;
use crate::index::ResourceIndex;
use crate::mappings::{load_mappings, MappingsSource};
use crate::operation::{Operation, ValidateProgress, ValidationReport};
use crate::pipeline::PipelineContext;
use crate::pool::settle;
use crate::snapshot::SnapshotDir;
use crate::store::{job_name, FolderEntry, JobSummary};

pub const MISSING_MAPPINGS_WARNING: &str = "No compute resource mappings found. Some jobs may fail \
to import if clusters or warehouses with exact original names do not exist in this workspace.";

pub async fn run(ctx: &PipelineContext, op: &Arc<Operation>) -> Result<(), SyncError> {
    let mut task_issues = Vec::new();
    match validate(ctx, op, &mut task_issues).await {
        Ok((job_statuses, snapshots)) => {
            let status = aggregate(&job_statuses);
            let has_errors = job_statuses.iter().any(|s| s.status == JobStatus::Error);
            let message = summary_message(status, has_errors, job_statuses.is_empty());
            op.set_report(ValidationReport {
                task_issues,
                job_statuses,
                snapshot_dir: Some(snapshots.path().to_path_buf()),
            });
            op.finish(status, message);
            Ok(())
        }
        Err(e) => {
            op.set_report(ValidationReport {
                task_issues,
                job_statuses: Vec::new(),
                snapshot_dir: None,
            });
            Err(e)
        }
    }
}

async fn validate(
    ctx: &PipelineContext,
    op: &Arc<Operation>,
    task_issues: &mut Vec<ValidationIssue>,
) -> Result<(Vec<JobValidationStatus>, SnapshotDir), SyncError> {
    let folder = ctx.source_folder()?.to_string();
    let mappings_path = &ctx.settings.mappings_path;

    op.info(format!("Loading name mappings from {mappings_path}"));
    let loaded = load_mappings(&*ctx.store, mappings_path).await?;
    if let MappingsSource::Missing { created } = loaded.source {
        if created {
            op.info(format!("Created an empty name mappings record at {mappings_path}"));
        }
        op.warn(MISSING_MAPPINGS_WARNING);
        task_issues.push(ValidationIssue::new(None, MISSING_MAPPINGS_WARNING).with_level(IssueLevel::Warning));
    }

    // 1. Resource indexing
    let index = Arc::new(ResourceIndex::load(&*ctx.store).await?);
    op.info(format!(
        "Indexed {} live jobs, {} clusters and {} warehouses",
        index.jobs().len(),
        index.cluster_count(),
        index.warehouse_count()
    ));

    // 2. Transfer
    let files = transfer(ctx, op, &folder, task_issues).await?;

    // 3. Live snapshot
    let live = download_live(ctx, op, &index).await;

    // 4. Per-job validation
    let snapshots = SnapshotDir::for_run(&ctx.settings.work_dir, op.id());
    let shared = Arc::new(Shared {
        mappings: loaded.mappings,
        index: Arc::clone(&index),
        live,
        snapshots: snapshots.clone(),
    });
    let (mut statuses, names_found) = validate_jobs(ctx, op, files, shared).await;
    statuses.sort_by(|a, b| sort_key(a).cmp(sort_key(b)));

    // 5. Deletion detection
    let live_names: BTreeSet<&str> = index.jobs().iter().map(|j| j.name.as_str()).collect();
    for name in live_names.into_iter().filter(|name| !names_found.contains(*name)) {
        op.info(format!("Job '{name}' has no definition file and is marked for deletion"));
        statuses.push(JobValidationStatus::deleted(name));
    }

    log_summary(op, &statuses);
    Ok((statuses, snapshots))
}

fn sort_key(status: &JobValidationStatus) -> &str {
    status
        .job_name
        .as_deref()
        .or(status.file_name.as_deref())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// 2. Transfer
// ---------------------------------------------------------------------------

async fn transfer(
    ctx: &PipelineContext,
    op: &Arc<Operation>,
    folder: &str,
    task_issues: &mut Vec<ValidationIssue>,
) -> Result<Vec<(String, Vec<u8>)>, SyncError> {
    let mut files: Vec<FolderEntry> = ctx
        .store
        .list_folder(folder)
        .await?
        .into_iter()
        .filter(|entry| entry.is_json_file() && entry.path != ctx.settings.mappings_path)
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(b.file_name()));
    if files.is_empty() {
        return Err(SyncError::NoFiles {
            folder: folder.to_string(),
        });
    }

    let total = files.len();
    op.progress(|p: &mut ValidateProgress| {
        p.files_to_transfer = total;
        p.total_items += total;
    });
    op.info(format!("Found {total} job definition files in {folder}"));

    let names: Vec<String> = files.iter().map(|f| f.file_name().to_string()).collect();
    let results = ctx
        .pool()
        .run(files, |entry| {
            let store = Arc::clone(&ctx.store);
            let op = Arc::clone(op);
            async move {
                let result = store.download(&entry.path).await;
                op.progress(|p: &mut ValidateProgress| {
                    if result.is_ok() {
                        p.files_transferred += 1;
                    }
                    p.processed_items += 1;
                });
                result
            }
        })
        .await;

    let mut downloaded = Vec::new();
    for (name, result) in names.into_iter().zip(results) {
        match settle(result) {
            Ok(bytes) => downloaded.push((name, bytes)),
            Err(e) => {
                op.error(format!("Failed to transfer {name}: {e}"));
                task_issues.push(
                    ValidationIssue::new(Some(name.as_str()), format!("Error during transferring from workspace folder: {e}"))
                        .with_level(IssueLevel::Error),
                );
            }
        }
    }
    if downloaded.is_empty() {
        return Err(SyncError::NoFilesTransferred);
    }
    op.info(format!("Transferred {} of {total} files", downloaded.len()));
    Ok(downloaded)
}

// ---------------------------------------------------------------------------
// 3. Live snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LiveJobs {
    definitions: HashMap<String, Value>,
    /// Live jobs whose definition could not be downloaded.
    unavailable: HashSet<String>,
}

async fn download_live(ctx: &PipelineContext, op: &Arc<Operation>, index: &ResourceIndex) -> LiveJobs {
    // One download per name: the id the index resolves that name to.
    let jobs: Vec<JobSummary> = index
        .jobs()
        .iter()
        .filter(|j| index.job_id(&j.name) == Some(j.job_id))
        .cloned()
        .collect();
    let total = jobs.len();
    op.progress(|p: &mut ValidateProgress| {
        p.jobs_to_download = total;
        p.total_items += total;
    });
    op.info(format!("Downloading {total} live job definitions"));

    let results = ctx
        .pool()
        .run(jobs.clone(), |job| {
            let store = Arc::clone(&ctx.store);
            let op = Arc::clone(op);
            async move {
                let result = store.get_job(job.job_id).await;
                op.progress(|p: &mut ValidateProgress| {
                    if result.is_ok() {
                        p.jobs_downloaded += 1;
                    }
                    p.processed_items += 1;
                });
                result
            }
        })
        .await;

    let mut live = LiveJobs::default();
    for (job, result) in jobs.into_iter().zip(results) {
        match settle(result) {
            Ok(document) => {
                live.definitions.insert(job.name, document);
            }
            Err(e) => {
                op.warn(format!("Failed to download live job '{}': {e}", job.name));
                live.unavailable.insert(job.name);
            }
        }
    }
    live
}

// ---------------------------------------------------------------------------
// 4. Per-job validation
// ---------------------------------------------------------------------------

struct Shared {
    mappings: ResourceNameMappings,
    index: Arc<ResourceIndex>,
    live: LiveJobs,
    snapshots: SnapshotDir,
}

/// A parsed, structurally valid definition waiting for a worker.
#[derive(Debug)]
struct Candidate {
    file_name: String,
    job_name: String,
    document: Value,
    warnings: Vec<ValidationIssue>,
}

/// Outcome of parsing every transferred file before dispatch.
#[derive(Debug, Default)]
struct Prepared {
    candidates: Vec<Candidate>,
    rejected: Vec<JobValidationStatus>,
    /// Every job name declared by a file, valid or not.
    names_found: HashSet<String>,
}

/// Parse and structurally check `files` (sorted by file name). When two
/// files declare one job name, the first file is kept.
fn prepare(files: Vec<(String, Vec<u8>)>) -> Prepared {
    let mut prepared = Prepared::default();
    let mut claimed = HashSet::new();

    for (file_name, bytes) in files {
        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                let issue = structural_issue(&file_name, format!("Validation error: {e}"));
                prepared.rejected.push(error_status(&file_name, None, vec![issue]));
                continue;
            }
        };
        let name = job_name(&document).filter(|n| !n.is_empty()).map(str::to_owned);
        if let Some(name) = &name {
            prepared.names_found.insert(name.clone());
        }

        let warnings = match check_structure(&document, &file_name) {
            Ok(warnings) => warnings,
            Err(issue) => {
                prepared.rejected.push(error_status(&file_name, name, vec![issue]));
                continue;
            }
        };
        let Some(name) = name else {
            continue;
        };
        if !claimed.insert(name.clone()) {
            let issue = structural_issue(
                &file_name,
                format!("Duplicate job name '{name}': already defined by an earlier file"),
            );
            prepared.rejected.push(error_status(&file_name, Some(name), vec![issue]));
            continue;
        }
        prepared.candidates.push(Candidate {
            file_name,
            job_name: name,
            document,
            warnings,
        });
    }

    prepared.candidates.sort_by(|a, b| a.job_name.cmp(&b.job_name));
    prepared
}

/// Required shape of a definition. `Ok` carries non-fatal warnings.
fn check_structure(document: &Value, file: &str) -> Result<Vec<ValidationIssue>, ValidationIssue> {
    let Some(settings) = document.get("settings").filter(|s| s.is_object()) else {
        return Err(structural_issue(file, "Missing required 'settings' attribute"));
    };
    let has_name = settings
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| !name.is_empty());
    if !has_name {
        return Err(structural_issue(file, "Missing required 'name' attribute in settings"));
    }
    let Some(tasks) = settings.get("tasks") else {
        return Err(structural_issue(file, "Missing required 'tasks' attribute in settings"));
    };
    let Some(tasks) = tasks.as_array().filter(|tasks| !tasks.is_empty()) else {
        return Err(structural_issue(file, "Tasks must be a non-empty list"));
    };
    Ok(tasks
        .iter()
        .enumerate()
        .filter(|(_, task)| task.get("task_key").is_none())
        .map(|(i, _)| {
            ValidationIssue::new(Some(file), format!("Task at index {i} missing required 'task_key'"))
                .with_type(IssueType::ValidationError)
                .with_level(IssueLevel::Warning)
        })
        .collect())
}

fn structural_issue(file: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::new(Some(file), message)
        .with_type(IssueType::ValidationError)
        .with_level(IssueLevel::Error)
}

fn error_status(file_name: &str, job_name: Option<String>, issues: Vec<ValidationIssue>) -> JobValidationStatus {
    JobValidationStatus {
        file_name: Some(file_name.to_string()),
        job_name,
        status: JobStatus::Error,
        differences: Vec::new(),
        validation_issues: issues,
    }
}

/// Validate every file; returns the statuses (unsorted) and every job name
/// declared by a file.
async fn validate_jobs(
    ctx: &PipelineContext,
    op: &Arc<Operation>,
    files: Vec<(String, Vec<u8>)>,
    shared: Arc<Shared>,
) -> (Vec<JobValidationStatus>, HashSet<String>) {
    let Prepared {
        candidates,
        rejected,
        names_found,
    } = prepare(files);

    let total = candidates.len() + rejected.len();
    op.progress(|p: &mut ValidateProgress| {
        p.jobs_to_validate = total;
        p.jobs_validated = rejected.len();
        p.total_items += total;
        p.processed_items += rejected.len();
    });
    op.add_items(
        candidates
            .iter()
            .map(|c| c.file_name.as_str())
            .chain(rejected.iter().filter_map(|r| r.file_name.as_deref()))
            .map(ItemStatus::pending),
    );
    for status in &rejected {
        let file = status.file_name.as_deref().unwrap_or_default();
        let reason = status
            .validation_issues
            .first()
            .map(|issue| issue.issue.clone())
            .unwrap_or_default();
        op.error(format!("{file}: {reason}"));
        op.set_item(file, ItemState::Error, Some(reason));
    }

    let keys: Vec<(String, String)> = candidates
        .iter()
        .map(|c| (c.file_name.clone(), c.job_name.clone()))
        .collect();
    let count = candidates.len();
    let mut dispatched = 0;
    let results = ctx
        .pool()
        .run(candidates, |candidate| {
            dispatched += 1;
            op.info(format!("[{dispatched}/{count}] Validating job '{}'", candidate.job_name));
            op.set_item(&candidate.file_name, ItemState::InProgress, None);
            let shared = Arc::clone(&shared);
            let op = Arc::clone(op);
            async move {
                let status = validate_job(candidate, &shared, &op).await;
                op.progress(|p: &mut ValidateProgress| {
                    p.jobs_validated += 1;
                    p.processed_items += 1;
                });
                status
            }
        })
        .await;

    let mut statuses = rejected;
    for ((file_name, job_name), result) in keys.into_iter().zip(results) {
        let status = result.unwrap_or_else(|e| {
            let issue = structural_issue(&file_name, format!("Validation error: {e}"));
            op.error(format!("Job '{job_name}': {e}"));
            error_status(&file_name, Some(job_name), vec![issue])
        });
        match status.status {
            JobStatus::Error => {
                let reason = status.validation_issues.iter().find(|i| i.level == Some(IssueLevel::Error));
                op.set_item(&file_name, ItemState::Error, reason.map(|i| i.issue.clone()));
            }
            _ => op.set_item(&file_name, ItemState::Completed, None),
        }
        statuses.push(status);
    }
    (statuses, names_found)
}

async fn validate_job(candidate: Candidate, shared: &Shared, op: &Operation) -> JobValidationStatus {
    let Candidate {
        file_name,
        job_name,
        mut document,
        warnings,
    } = candidate;
    let file = Some(file_name.as_str());
    let mut issues = warnings;
    let mut failed = false;

    codec::normalize_legacy_run_as(&mut document);
    match codec::resolve_run_as(&mut document, &shared.mappings, file) {
        RunAsOutcome::Mapped {
            identity,
            mapped,
            from_default,
        } => {
            let via = if from_default { " (default mapping)" } else { "" };
            op.info(format!("Job '{job_name}': RunAs '{identity}' mapped to {mapped}{via}"));
        }
        RunAsOutcome::Invalid(issue) => {
            issues.push(issue);
            failed = true;
        }
        RunAsOutcome::Absent | RunAsOutcome::Unmapped { .. } => {}
    }

    let reference_issues = codec::decode(&mut document, &shared.mappings, &shared.index, file);
    failed |= !reference_issues.is_empty();
    issues.extend(reference_issues);

    let (mut status, differences) = if shared.live.unavailable.contains(&job_name) {
        issues.push(structural_issue(
            &file_name,
            format!("Live definition of job '{job_name}' could not be downloaded"),
        ));
        failed = true;
        (JobStatus::Error, Vec::new())
    } else if let Some(live) = shared.live.definitions.get(&job_name) {
        let diff = diff::compare(live, &document);
        if diff.differs {
            (JobStatus::Changed, diff.differences)
        } else {
            (JobStatus::Unchanged, Vec::new())
        }
    } else {
        (JobStatus::New, Vec::new())
    };

    if let Err(e) = shared.snapshots.write(&job_name, &document).await {
        issues.push(structural_issue(&file_name, format!("Failed to write validated snapshot: {e}")));
        failed = true;
    }
    if failed {
        status = JobStatus::Error;
    }

    match status {
        JobStatus::New => op.info(format!("Job '{job_name}' is new")),
        JobStatus::Changed => op.info(format!(
            "Job '{job_name}' has changed ({} differences shown)",
            differences.len()
        )),
        JobStatus::Unchanged => op.info(format!("Job '{job_name}' is unchanged")),
        _ => op.warn(format!("Job '{job_name}' has validation errors and will not be imported")),
    }

    JobValidationStatus {
        file_name: Some(file_name),
        job_name: Some(job_name),
        status,
        differences,
        validation_issues: issues,
    }
}

// ---------------------------------------------------------------------------
// 6. Aggregation
// ---------------------------------------------------------------------------

/// Operation status for a finished set of job statuses.
pub fn aggregate(statuses: &[JobValidationStatus]) -> OperationStatus {
    let errors = statuses.iter().any(|s| s.status == JobStatus::Error);
    let actionable = statuses.iter().any(|s| s.status.is_actionable());
    let settled = statuses
        .iter()
        .any(|s| matches!(s.status, JobStatus::Unchanged | JobStatus::Skipped));
    match (errors, actionable) {
        (true, true) => OperationStatus::CompletedWithErrors,
        (true, false) if settled => OperationStatus::CompletedNoChanges,
        (true, false) => OperationStatus::Failed,
        (false, true) => OperationStatus::Completed,
        (false, false) => OperationStatus::CompletedNoChanges,
    }
}

fn summary_message(status: OperationStatus, has_errors: bool, empty: bool) -> &'static str {
    match status {
        OperationStatus::CompletedWithErrors => {
            "Validation completed. Some jobs had validation errors and will not be imported."
        }
        OperationStatus::CompletedNoChanges if has_errors => {
            "Validation completed. Some jobs had validation errors. No changes detected."
        }
        OperationStatus::CompletedNoChanges if empty => {
            "Validation completed. No job were detected or processed."
        }
        OperationStatus::CompletedNoChanges => "Validation completed. No job changes detected.",
        OperationStatus::Completed => "Validation completed. Ready to import changed jobs.",
        _ => "Validation Failed. No jobs were validated successfully.",
    }
}

fn log_summary(op: &Operation, statuses: &[JobValidationStatus]) {
    let count = |wanted: JobStatus| statuses.iter().filter(|s| s.status == wanted).count();
    op.info(format!(
        "Validation summary: {} new, {} changed, {} unchanged, {} deleted, {} with errors",
        count(JobStatus::New),
        count(JobStatus::Changed),
        count(JobStatus::Unchanged),
        count(JobStatus::Deleted),
        count(JobStatus::Error),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn status(name: &str, status: JobStatus) -> JobValidationStatus {
        JobValidationStatus {
            file_name: Some(format!("{name}.json")),
            job_name: Some(name.to_string()),
            status,
            differences: Vec::new(),
            validation_issues: Vec::new(),
        }
    }

    #[rstest]
    #[case(&[JobStatus::Error, JobStatus::New], OperationStatus::CompletedWithErrors)]
    #[case(&[JobStatus::Error, JobStatus::Deleted], OperationStatus::CompletedWithErrors)]
    #[case(&[JobStatus::Error, JobStatus::Unchanged], OperationStatus::CompletedNoChanges)]
    #[case(&[JobStatus::Error], OperationStatus::Failed)]
    #[case(&[JobStatus::Changed, JobStatus::Unchanged], OperationStatus::Completed)]
    #[case(&[JobStatus::Unchanged], OperationStatus::CompletedNoChanges)]
    #[case(&[], OperationStatus::CompletedNoChanges)]
    fn aggregation_rules(#[case] kinds: &[JobStatus], #[case] expected: OperationStatus) {
        let statuses: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| status(&format!("job{i}"), *kind))
            .collect();
        assert_eq!(aggregate(&statuses), expected);
    }

    #[test]
    fn summary_messages() {
        assert_eq!(
            summary_message(OperationStatus::CompletedNoChanges, false, true),
            "Validation completed. No job were detected or processed."
        );
        assert_eq!(
            summary_message(OperationStatus::Failed, true, false),
            "Validation Failed. No jobs were validated successfully."
        );
    }

    #[rstest]
    #[case(json!({"name": "x"}), "Missing required 'settings' attribute")]
    #[case(json!({"settings": "nope"}), "Missing required 'settings' attribute")]
    #[case(json!({"settings": {"tasks": [{"task_key": "a"}]}}), "Missing required 'name' attribute in settings")]
    #[case(json!({"settings": {"name": ""}}), "Missing required 'name' attribute in settings")]
    #[case(json!({"settings": {"name": "x"}}), "Missing required 'tasks' attribute in settings")]
    #[case(json!({"settings": {"name": "x", "tasks": []}}), "Tasks must be a non-empty list")]
    #[case(json!({"settings": {"name": "x", "tasks": {"a": 1}}}), "Tasks must be a non-empty list")]
    fn structural_errors(#[case] document: Value, #[case] expected: &str) {
        let issue = check_structure(&document, "f.json").unwrap_err();
        assert_eq!(issue.issue, expected);
        assert_eq!(issue.issue_type, Some(IssueType::ValidationError));
    }

    #[test]
    fn missing_task_key_is_a_warning() {
        let document = json!({"settings": {"name": "x", "tasks": [{"task_key": "a"}, {"notebook_task": {}}]}});
        let warnings = check_structure(&document, "f.json").expect("valid");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].issue, "Task at index 1 missing required 'task_key'");
        assert_eq!(warnings[0].level, Some(IssueLevel::Warning));
    }

    #[test]
    fn prepare_keeps_first_file_for_duplicate_names() {
        let doc = |name: &str| {
            serde_json::to_vec(&json!({"settings": {"name": name, "tasks": [{"task_key": "t"}]}}))
                .expect("json")
        };
        let prepared = prepare(vec![
            ("a.json".into(), doc("etl")),
            ("b.json".into(), doc("etl")),
            ("c.json".into(), b"{broken".to_vec()),
            ("d.json".into(), doc("alpha")),
        ]);
        let kept: Vec<_> = prepared.candidates.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(kept, vec!["d.json", "a.json"]);
        assert_eq!(prepared.rejected.len(), 2);
        assert_eq!(prepared.rejected[0].file_name.as_deref(), Some("b.json"));
        assert!(prepared.rejected[1].validation_issues[0]
            .issue
            .starts_with("Validation error:"));
        assert!(prepared.names_found.contains("etl"));
        assert!(prepared.names_found.contains("alpha"));
    }
}
