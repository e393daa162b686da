//! Operation records: status, kind-specific progress, per-item statuses and
//! the operation log.
//!
//! One [`Operation`] is shared by the task running it, its pool workers and
//! any number of pollers. Mutable state sits behind a `std::sync::Mutex`
//! that is never held across an `.await`, so every accessor is synchronous.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobsync_core::{
    ItemState, ItemStatus, JobValidationStatus, LogLevel, LogRecord, OperationKind,
    OperationStatus, ValidationIssue,
};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub total_jobs: usize,
    pub processed_jobs: usize,
    pub exported_modified: usize,
    pub exported_unchanged: usize,
    pub failed_jobs: usize,
    pub deleted_files: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub imported: usize,
    pub skipped: usize,
    pub failed_jobs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProgress {
    pub deleted: usize,
    pub failed_jobs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateProgress {
    pub files_to_transfer: usize,
    pub files_transferred: usize,
    pub jobs_to_download: usize,
    pub jobs_downloaded: usize,
    pub jobs_to_validate: usize,
    pub jobs_validated: usize,
    pub total_items: usize,
    pub processed_items: usize,
}

/// Kind-specific counters, tagged with the operation kind on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Progress {
    Export(ExportProgress),
    Import(ImportProgress),
    Delete(DeleteProgress),
    Validate(ValidateProgress),
}

impl Progress {
    pub fn new(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Export => Self::Export(ExportProgress::default()),
            OperationKind::Import => Self::Import(ImportProgress::default()),
            OperationKind::Delete => Self::Delete(DeleteProgress::default()),
            OperationKind::Validate => Self::Validate(ValidateProgress::default()),
        }
    }

    /// Items that ended in error, for kinds that count them.
    pub fn failed_items(&self) -> usize {
        match self {
            Self::Export(p) => p.failed_jobs,
            Self::Import(p) => p.failed_jobs,
            Self::Delete(p) => p.failed_jobs,
            Self::Validate(_) => 0,
        }
    }
}

/// Typed access to one variant of [`Progress`].
pub trait KindProgress: Sized {
    fn select(progress: &mut Progress) -> Option<&mut Self>;
}

macro_rules! kind_progress {
    ($ty:ty, $variant:ident) => {
        impl KindProgress for $ty {
            fn select(progress: &mut Progress) -> Option<&mut Self> {
                match progress {
                    Progress::$variant(p) => Some(p),
                    _ => None,
                }
            }
        }
    };
}

kind_progress!(ExportProgress, Export);
kind_progress!(ImportProgress, Import);
kind_progress!(DeleteProgress, Delete);
kind_progress!(ValidateProgress, Validate);

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

/// Result payload of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Run-level issues (transfer failures, missing mappings).
    pub task_issues: Vec<ValidationIssue>,
    /// One record per job; deleted records last.
    pub job_statuses: Vec<JobValidationStatus>,
    /// Directory holding the validated snapshots; `None` when the run failed
    /// before any job was validated.
    pub snapshot_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// Ordered log of one operation, mirrored to `tracing`.
#[derive(Debug, Default)]
struct OperationLog {
    records: Vec<LogRecord>,
}

impl OperationLog {
    fn push(&mut self, id: &str, kind: OperationKind, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!(operation_id = id, %kind, "{message}"),
            LogLevel::Info => tracing::info!(operation_id = id, %kind, "{message}"),
            LogLevel::Warn => tracing::warn!(operation_id = id, %kind, "{message}"),
            LogLevel::Error => tracing::error!(operation_id = id, %kind, "{message}"),
        }
        self.records.push(LogRecord {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// `LEVEL: message` lines, debug records excluded.
    fn text(&self) -> String {
        let mut out = String::new();
        for record in self.records.iter().filter(|r| r.level != LogLevel::Debug) {
            out.push_str(&format!("{}: {}\n", record.level, record.message));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OperationState {
    status: OperationStatus,
    progress: Progress,
    items: BTreeMap<String, ItemStatus>,
    log: OperationLog,
    message: Option<String>,
    report: Option<ValidationReport>,
    finished_at: Option<DateTime<Utc>>,
}

/// Poll result: a consistent copy of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub output: String,
    pub progress: Progress,
    /// Sorted by item name.
    pub per_item_statuses: Vec<ItemStatus>,
    pub log_records: Vec<LogRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
    /// Validation run an import or delete batch came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_validation: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Operation {
    id: String,
    kind: OperationKind,
    source_validation: Option<String>,
    created_at: DateTime<Utc>,
    state: Mutex<OperationState>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self::with_source(kind, None)
    }

    pub fn with_source(kind: OperationKind, source_validation: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source_validation,
            created_at: Utc::now(),
            state: Mutex::new(OperationState {
                status: OperationStatus::Pending,
                progress: Progress::new(kind),
                items: BTreeMap::new(),
                log: OperationLog::default(),
                message: None,
                report: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, OperationState> {
        // Critical sections never panic mid-update; a poisoned lock still
        // guards consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> OperationStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: OperationStatus) {
        self.lock().status = status;
    }

    // -- log ---------------------------------------------------------------

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.lock().log.push(&self.id, self.kind, level, message.into());
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    // -- progress ------------------------------------------------------------

    /// Mutate the kind-specific counters. `None` if `P` does not match the
    /// operation kind.
    pub fn progress<P: KindProgress, R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        let mut state = self.lock();
        P::select(&mut state.progress).map(f)
    }

    // -- items -----------------------------------------------------------------

    /// Register items as `pending`.
    pub fn add_items(&self, items: impl IntoIterator<Item = ItemStatus>) {
        let mut state = self.lock();
        for item in items {
            state.items.insert(item.name.clone(), item);
        }
    }

    /// Move an item to `item_state`. Unknown names are registered on the fly.
    pub fn set_item(&self, name: &str, item_state: ItemState, error: Option<String>) {
        let mut state = self.lock();
        let item = state
            .items
            .entry(name.to_string())
            .or_insert_with(|| ItemStatus::pending(name));
        item.state = item_state;
        if error.is_some() {
            item.error_message = error;
        }
    }

    pub fn item(&self, name: &str) -> Option<ItemStatus> {
        self.lock().items.get(name).cloned()
    }

    // -- completion --------------------------------------------------------------

    pub fn set_report(&self, report: ValidationReport) {
        self.lock().report = Some(report);
    }

    pub fn report(&self) -> Option<ValidationReport> {
        self.lock().report.clone()
    }

    /// Enter a terminal state with a human-readable message.
    pub fn finish(&self, status: OperationStatus, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.lock();
        let level = match status {
            OperationStatus::Failed => LogLevel::Error,
            OperationStatus::CompletedWithErrors => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        state.log.push(&self.id, self.kind, level, message.clone());
        state.status = status;
        state.message = Some(message);
        state.finished_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        let state = self.lock();
        OperationSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: state.status,
            output: state.log.text(),
            progress: state.progress.clone(),
            per_item_statuses: state.items.values().cloned().collect(),
            log_records: state.log.records.clone(),
            message: state.message.clone(),
            report: state.report.clone(),
            source_validation: self.source_validation.clone(),
            created_at: self.created_at,
            finished_at: state.finished_at,
        }
    }
}

/// Terminal status shared by export, import and delete.
pub fn batch_status(changed: usize, failed: usize) -> OperationStatus {
    if failed > 0 {
        OperationStatus::CompletedWithErrors
    } else if changed == 0 {
        OperationStatus::CompletedNoChanges
    } else {
        OperationStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_operation_is_pending_with_kind_progress() {
        let op = Operation::new(OperationKind::Export);
        let snap = op.snapshot();
        assert_eq!(snap.status, OperationStatus::Pending);
        assert_eq!(snap.progress, Progress::Export(ExportProgress::default()));
        assert!(Uuid::parse_str(&snap.id).is_ok());
    }

    #[test]
    fn progress_selects_matching_kind_only() {
        let op = Operation::new(OperationKind::Delete);
        assert_eq!(op.progress(|p: &mut DeleteProgress| { p.deleted += 1; p.deleted }), Some(1));
        assert_eq!(op.progress(|p: &mut ExportProgress| p.failed_jobs), None);
    }

    #[test]
    fn log_text_has_level_prefix_and_skips_debug() {
        let op = Operation::new(OperationKind::Validate);
        op.info("Found 2 files");
        op.debug("noise");
        op.warn("careful");
        let snap = op.snapshot();
        assert_eq!(snap.output, "INFO: Found 2 files\nWARNING: careful\n");
        assert_eq!(snap.log_records.len(), 3);
    }

    #[test]
    fn items_sorted_and_error_kept() {
        let op = Operation::new(OperationKind::Import);
        op.add_items([ItemStatus::pending("b"), ItemStatus::pending("a")]);
        op.set_item("b", ItemState::Error, Some("boom".into()));
        op.set_item("b", ItemState::Error, None);
        let items = op.snapshot().per_item_statuses;
        assert_eq!(items[0].name, "a");
        assert_eq!(items[1].error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn finish_sets_terminal_state() {
        let op = Operation::new(OperationKind::Export);
        op.finish(OperationStatus::Completed, "Export completed successfully");
        let snap = op.snapshot();
        assert!(snap.status.is_terminal());
        assert!(snap.finished_at.is_some());
        assert_eq!(snap.message.as_deref(), Some("Export completed successfully"));
    }

    #[test]
    fn snapshot_wire_names() {
        let value = serde_json::to_value(Operation::new(OperationKind::Import).snapshot())
            .expect("serialize");
        assert!(value.get("perItemStatuses").is_some());
        assert!(value.get("logRecords").is_some());
        assert_eq!(value["progress"]["kind"], "import");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn batch_status_rules() {
        assert_eq!(batch_status(3, 1), OperationStatus::CompletedWithErrors);
        assert_eq!(batch_status(0, 0), OperationStatus::CompletedNoChanges);
        assert_eq!(batch_status(2, 0), OperationStatus::Completed);
    }
}
