//! jobsync core library: domain types, settings, errors.
//!
//! - [`types`]: newtypes, statuses, issues, name mappings, operation records
//! - [`config`]: settings file + environment overrides
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::CoreError;
pub use types::{
    IssueLevel, IssueType, ItemState, ItemStatus, JobId, JobStatus, JobValidationStatus,
    LogLevel, LogRecord, OperationKind, OperationStatus, ResourceKind, ResourceNameMappings,
    ValidationIssue,
};
