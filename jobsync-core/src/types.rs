//! Domain types shared by the sync engine, the daemon and the CLI.
//!
//! Job definitions themselves stay untyped (`serde_json::Value`): the differ
//! and the reference codec walk arbitrary documents. Everything that
//! describes the *outcome* of a run is typed here.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric identifier of a live job in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<JobId> for Value {
    fn from(id: JobId) -> Self {
        Value::from(id.0)
    }
}

// ---------------------------------------------------------------------------
// Resource references
// ---------------------------------------------------------------------------

/// Kind of environment-specific resource a task can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cluster,
    Warehouse,
    Job,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Cluster, Self::Warehouse, Self::Job];

    /// Upper-case tag embedded in sentinels: `__CLUSTER__<name>__`.
    pub fn sentinel_tag(self) -> &'static str {
        match self {
            Self::Cluster => "CLUSTER",
            Self::Warehouse => "WAREHOUSE",
            Self::Job => "JOB",
        }
    }

    /// Issue type reported when a reference of this kind cannot be resolved.
    pub fn issue_type(self) -> IssueType {
        match self {
            Self::Cluster => IssueType::ClusterReference,
            Self::Warehouse => IssueType::WarehouseReference,
            Self::Job => IssueType::JobReference,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Warehouse => write!(f, "warehouse"),
            Self::Job => write!(f, "job"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation outcome
// ---------------------------------------------------------------------------

/// Classification of one job in a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Changed,
    Unchanged,
    Deleted,
    Error,
    Skipped,
}

impl JobStatus {
    /// `new`, `changed` and `deleted` are the statuses that lead to a write.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::New | Self::Changed | Self::Deleted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ClusterReference,
    WarehouseReference,
    JobReference,
    RunAsReference,
    ValidationError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Warning,
    Error,
}

/// A non-fatal problem attached to a file or to the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: Option<String>,
    pub issue: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<IssueLevel>,
}

impl ValidationIssue {
    pub fn new(file: Option<&str>, issue: impl Into<String>) -> Self {
        Self {
            file: file.map(str::to_owned),
            issue: issue.into(),
            issue_type: None,
            level: None,
        }
    }

    pub fn with_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = Some(issue_type);
        self
    }

    pub fn with_level(mut self, level: IssueLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// Outcome of validating one job definition (or one live job with no file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobValidationStatus {
    pub file_name: Option<String>,
    pub job_name: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub differences: Vec<String>,
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
}

impl JobValidationStatus {
    /// Synthetic record for a live job that no definition file tracks.
    pub fn deleted(job_name: &str) -> Self {
        Self {
            file_name: None,
            job_name: Some(job_name.to_owned()),
            status: JobStatus::Deleted,
            differences: Vec::new(),
            validation_issues: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Name mappings
// ---------------------------------------------------------------------------

/// Symbolic-name overrides for compute resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeNameMappings {
    #[serde(default)]
    pub cluster_name_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub warehouse_name_mappings: BTreeMap<String, String>,
}

/// Environment-specific remapping applied while resolving sentinels.
///
/// `run_as_mappings` values stay untyped so a malformed entry surfaces as a
/// per-job issue instead of rejecting the whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNameMappings {
    #[serde(default)]
    pub compute_name_mappings: ComputeNameMappings,
    #[serde(default)]
    pub run_as_mappings: BTreeMap<String, Value>,
}

impl ResourceNameMappings {
    /// Target name for a symbolic resource name; pass-through when unmapped.
    /// Job references have no override table.
    pub fn target_name<'a>(&'a self, kind: ResourceKind, name: &'a str) -> &'a str {
        let table = match kind {
            ResourceKind::Cluster => &self.compute_name_mappings.cluster_name_mappings,
            ResourceKind::Warehouse => &self.compute_name_mappings.warehouse_name_mappings,
            ResourceKind::Job => return name,
        };
        table.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_empty(&self) -> bool {
        self.compute_name_mappings.cluster_name_mappings.is_empty()
            && self.compute_name_mappings.warehouse_name_mappings.is_empty()
            && self.run_as_mappings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Export,
    Import,
    Delete,
    Validate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
            Self::Delete => write!(f, "delete"),
            Self::Validate => write!(f, "validate"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "export" => Ok(Self::Export),
            "import" => Ok(Self::Import),
            "delete" => Ok(Self::Delete),
            "validate" => Ok(Self::Validate),
            other => Err(format!(
                "unknown operation kind '{other}'; expected: export, import, delete, validate"
            )),
        }
    }
}

/// Lifecycle of an operation. Validation's `in_progress` maps to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    CompletedNoChanges,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::CompletedNoChanges => "completed_no_changes",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-item progress inside an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Error,
}

/// One entry of an operation's per-item status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub name: String,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The validation record that requested this item (import/delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<JobValidationStatus>,
}

impl ItemStatus {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ItemState::Pending,
            error_message: None,
            request: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One line of an operation's log, as exposed to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Unchanged).expect("serialize");
        assert_eq!(json, "\"unchanged\"");
        assert_eq!(JobStatus::Deleted.to_string(), "deleted");
    }

    #[test]
    fn operation_status_terminal_states() {
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(OperationStatus::CompletedNoChanges.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn issue_type_field_is_named_type() {
        let issue = ValidationIssue::new(Some("a.json"), "boom").with_type(IssueType::JobReference);
        let value = serde_json::to_value(&issue).expect("serialize");
        assert_eq!(value["type"], json!("job_reference"));
        assert!(value.get("level").is_none());
    }

    #[test]
    fn mappings_pass_through_unmapped_names() {
        let mut mappings = ResourceNameMappings::default();
        mappings
            .compute_name_mappings
            .cluster_name_mappings
            .insert("shared".into(), "shared-prod".into());
        assert_eq!(mappings.target_name(ResourceKind::Cluster, "shared"), "shared-prod");
        assert_eq!(mappings.target_name(ResourceKind::Cluster, "other"), "other");
        assert_eq!(mappings.target_name(ResourceKind::Job, "shared"), "shared");
    }

    #[test]
    fn mappings_deserialize_with_missing_sections() {
        let mappings: ResourceNameMappings =
            serde_json::from_str(r#"{"run_as_mappings": {"default": {"user_name": "svc"}}}"#)
                .expect("deserialize");
        assert!(mappings.compute_name_mappings.cluster_name_mappings.is_empty());
        assert_eq!(mappings.run_as_mappings["default"], json!({"user_name": "svc"}));
    }

    #[test]
    fn operation_kind_parses_case_insensitively() {
        assert_eq!("Export".parse::<OperationKind>(), Ok(OperationKind::Export));
        assert!("sync".parse::<OperationKind>().is_err());
    }
}
