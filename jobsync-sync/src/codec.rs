//! Portable job definitions.
//!
//! Export replaces environment-specific ids inside every task with symbolic
//! sentinels; validation resolves them back against the target workspace.
//!
//! | task field                   | sentinel                   |
//! |------------------------------|----------------------------|
//! | `existing_cluster_id`        | `__CLUSTER__<name>__`      |
//! | `sql_task.warehouse_id`      | `__WAREHOUSE__<name>__`    |
//! | `run_job_task.job_id`        | `__JOB__<name>__`          |
//!
//! An id that cannot be named on export becomes `__<KIND>__unknown__`.

use std::collections::BTreeSet;

use serde_json::Value;

use jobsync_core::{
    IssueLevel, IssueType, ResourceKind, ResourceNameMappings, ValidationIssue,
};

use crate::index::{NameResolver, ResourceIndex};

/// Name embedded when an id could not be resolved on export.
pub const UNKNOWN: &str = "unknown";

const SLOTS: [(ResourceKind, &[&str]); 3] = [
    (ResourceKind::Cluster, &["existing_cluster_id"]),
    (ResourceKind::Warehouse, &["sql_task", "warehouse_id"]),
    (ResourceKind::Job, &["run_job_task", "job_id"]),
];

// ---------------------------------------------------------------------------
// Sentinels
// ---------------------------------------------------------------------------

pub fn sentinel(kind: ResourceKind, name: &str) -> String {
    format!("__{}__{}__", kind.sentinel_tag(), name)
}

/// Symbolic name inside a sentinel of `kind`, or `None` if `value` is not one.
///
/// A missing trailing `__` is tolerated. Underscores inside the name are kept.
pub fn parse_sentinel(kind: ResourceKind, value: &str) -> Option<&str> {
    let prefix = format!("__{}__", kind.sentinel_tag());
    let rest = value.strip_prefix(prefix.as_str())?;
    Some(rest.strip_suffix("__").unwrap_or(rest))
}

fn slot_mut<'a>(task: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    path.iter().try_fold(task, |node, key| node.get_mut(*key))
}

fn tasks_mut(job: &mut Value) -> Option<&mut Vec<Value>> {
    job.get_mut("settings")?.get_mut("tasks")?.as_array_mut()
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// What [`encode`] replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOutcome {
    pub encoded: usize,
    /// References that fell back to the `unknown` sentinel, with the raw id.
    pub unresolved: Vec<(ResourceKind, String)>,
}

/// Replace every live reference in `job` with a sentinel. Never fails.
pub fn encode(job: &mut Value, resolver: &dyn NameResolver) -> EncodeOutcome {
    let mut outcome = EncodeOutcome::default();
    let Some(tasks) = tasks_mut(job) else {
        return outcome;
    };
    for task in tasks.iter_mut() {
        for (kind, path) in SLOTS {
            let Some(slot) = slot_mut(task, path) else {
                continue;
            };
            if slot.as_str().and_then(|s| parse_sentinel(kind, s)).is_some() {
                continue;
            }
            let name = match resolver.name_of(kind, slot) {
                Some(name) => name,
                None => {
                    outcome.unresolved.push((kind, id_text(slot)));
                    UNKNOWN.to_string()
                }
            };
            *slot = Value::String(sentinel(kind, &name));
            outcome.encoded += 1;
        }
    }
    outcome
}

fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Resolve every sentinel in `job` against the live `index`.
///
/// Cluster and warehouse names pass through `mappings` first. Values that
/// are not sentinels are left untouched. An unresolved reference leaves its
/// sentinel in place and yields one issue per distinct name and kind;
/// decoding carries on with the remaining references.
pub fn decode(
    job: &mut Value,
    mappings: &ResourceNameMappings,
    index: &ResourceIndex,
    file: Option<&str>,
) -> Vec<ValidationIssue> {
    let mut missing: [BTreeSet<String>; 3] = Default::default();
    if let Some(tasks) = tasks_mut(job) {
        for task in tasks.iter_mut() {
            for (slot_idx, (kind, path)) in SLOTS.into_iter().enumerate() {
                let Some(slot) = slot_mut(task, path) else {
                    continue;
                };
                let Some(symbolic) = slot.as_str().and_then(|s| parse_sentinel(kind, s)) else {
                    continue;
                };
                let target = mappings.target_name(kind, symbolic).to_string();
                match index.resolve(kind, &target) {
                    Some(id) => *slot = id,
                    None => {
                        missing[slot_idx].insert(target);
                    }
                }
            }
        }
    }

    let mut issues = Vec::new();
    for ((kind, _), names) in SLOTS.into_iter().zip(missing) {
        for name in names {
            issues.push(
                ValidationIssue::new(file, missing_message(kind, &name))
                    .with_type(kind.issue_type())
                    .with_level(IssueLevel::Error),
            );
        }
    }
    issues
}

fn missing_message(kind: ResourceKind, name: &str) -> String {
    match kind {
        ResourceKind::Cluster => format!("Cluster '{name}' does not exist in this workspace"),
        ResourceKind::Warehouse => format!("Warehouse '{name}' does not exist in this workspace"),
        ResourceKind::Job => format!("Referenced job '{name}' not found in this workspace"),
    }
}

// ---------------------------------------------------------------------------
// RunAs
// ---------------------------------------------------------------------------

/// Copy a legacy top-level `run_as_user_name` into `settings.run_as` when the
/// job has no `run_as` block. Returns `true` if the document changed.
pub fn normalize_legacy_run_as(job: &mut Value) -> bool {
    let Some(legacy) = job.get("run_as_user_name").and_then(Value::as_str).map(str::to_owned) else {
        return false;
    };
    let Some(settings) = job.get_mut("settings").and_then(Value::as_object_mut) else {
        return false;
    };
    if settings.contains_key("run_as") {
        return false;
    }
    settings.insert("run_as".into(), serde_json::json!({ "user_name": legacy }));
    true
}

const RUN_AS_KEYS: [&str; 2] = ["user_name", "service_principal_name"];

/// Result of [`resolve_run_as`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunAsOutcome {
    /// No `settings.run_as` identity to map.
    Absent,
    /// No mapping applies; the identity is kept.
    Unmapped { identity: String },
    /// `settings.run_as` was replaced.
    Mapped {
        identity: String,
        mapped: Value,
        from_default: bool,
    },
    /// The mapping entry is unusable; the document is unchanged.
    Invalid(ValidationIssue),
}

/// Apply `run_as_mappings` to `settings.run_as`.
///
/// The identity's own entry wins over `"default"`. A mapping must be an
/// object carrying `user_name` or `service_principal_name`.
pub fn resolve_run_as(job: &mut Value, mappings: &ResourceNameMappings, file: Option<&str>) -> RunAsOutcome {
    let identity = match job.pointer("/settings/run_as") {
        Some(run_as) => RUN_AS_KEYS
            .iter()
            .filter_map(|key| run_as.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_owned),
        None => None,
    };
    let Some(identity) = identity else {
        return RunAsOutcome::Absent;
    };

    let table = &mappings.run_as_mappings;
    let (mapping, from_default) = match table.get(&identity).filter(|v| is_present(v)) {
        Some(m) => (m, false),
        None => match table.get("default").filter(|v| is_present(v)) {
            Some(m) => (m, true),
            None => return RunAsOutcome::Unmapped { identity },
        },
    };

    let mapped = RUN_AS_KEYS
        .iter()
        .find_map(|key| mapping.get(*key).filter(|v| !v.is_null()))
        .cloned();
    let Some(mapped) = mapped.filter(|_| mapping.is_object()) else {
        let message = format!(
            "Invalid {}mapping format for RunAs identity '{identity}'",
            if from_default { "default " } else { "" }
        );
        return RunAsOutcome::Invalid(
            ValidationIssue::new(file, message)
                .with_type(IssueType::RunAsReference)
                .with_level(IssueLevel::Error),
        );
    };

    if let Some(settings) = job.get_mut("settings").and_then(Value::as_object_mut) {
        settings.insert("run_as".into(), mapping.clone());
    }
    if let Some(top) = job.as_object_mut() {
        if top.contains_key("run_as_user_name") {
            top.insert("run_as_user_name".into(), mapped.clone());
        }
    }
    RunAsOutcome::Mapped {
        identity,
        mapped,
        from_default,
    }
}

/// A mapping entry counts when it is non-empty. An object whose identity
/// keys are all `null` names nobody and is skipped like a missing entry.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => {
            let identities: Vec<&Value> = RUN_AS_KEYS.iter().filter_map(|key| map.get(*key)).collect();
            !map.is_empty() && (identities.is_empty() || identities.iter().any(|v| !v.is_null()))
        }
        _ => true,
    }
}
