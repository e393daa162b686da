//! Structural comparison of two job documents.
//!
//! The walk is order-sensitive for lists (index by index) and skips the
//! volatile keys `job_id`, `created_time` and `creator_user_name` wherever
//! they appear, matching by key name rather than by path. A `run_job_task`
//! that changes only its `job_id` is therefore reported as unchanged.
//!
//! Paths join object keys with `.` and list indices with `[i]`:
//! `settings.tasks[0].notebook_task.notebook_path: "/a" → "/b"`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Only the first this-many differences are kept.
pub const MAX_DIFFERENCES: usize = 10;

/// Keys ignored at any depth.
pub const VOLATILE_KEYS: [&str; 3] = ["job_id", "created_time", "creator_user_name"];

/// Outcome of [`compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDiff {
    /// `true` when at least one difference exists, even past the cap.
    pub differs: bool,
    /// First [`MAX_DIFFERENCES`] differences in traversal order.
    pub differences: Vec<String>,
}

/// Compare `old` (typically the live job) against `new`.
///
/// Neither input is modified.
pub fn compare(old: &Value, new: &Value) -> JobDiff {
    let mut old = old.clone();
    let mut new = new.clone();
    drop_duplicate_run_as(&mut old, &mut new);

    let mut walker = Walker::default();
    walker.walk(&old, &new, "");
    JobDiff {
        differs: walker.found,
        differences: walker.differences,
    }
}

/// When both documents carry the same legacy `run_as_user_name`, a side
/// whose `settings.run_as.user_name` repeats it drops `settings.run_as`.
/// Each side is checked on its own, so a job that only has the legacy field
/// matches its normalized copy.
fn drop_duplicate_run_as(old: &mut Value, new: &mut Value) {
    let legacy = match (old.get("run_as_user_name"), new.get("run_as_user_name")) {
        (Some(Value::String(a)), Some(Value::String(b))) if !a.is_empty() && a == b => a.clone(),
        _ => return,
    };
    for doc in [old, new] {
        let mirrors_legacy =
            doc.pointer("/settings/run_as/user_name").and_then(Value::as_str) == Some(legacy.as_str());
        if !mirrors_legacy {
            continue;
        }
        if let Some(settings) = doc.get_mut("settings").and_then(Value::as_object_mut) {
            settings.remove("run_as");
        }
    }
}

#[derive(Default)]
struct Walker {
    found: bool,
    differences: Vec<String>,
}

impl Walker {
    fn capped(&self) -> bool {
        self.differences.len() >= MAX_DIFFERENCES
    }

    fn record(&mut self, line: String) {
        self.found = true;
        if !self.capped() {
            self.differences.push(line);
        }
    }

    fn walk(&mut self, old: &Value, new: &Value, path: &str) {
        if self.capped() {
            return;
        }
        match (old, new) {
            (Value::Object(a), Value::Object(b)) => {
                let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
                for key in keys {
                    if VOLATILE_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    match (a.get(key), b.get(key)) {
                        (Some(x), Some(y)) => self.walk(x, y, &child),
                        (Some(x), None) => self.record(format!("{child}: {} → (removed)", render(x))),
                        (None, Some(y)) => self.record(format!("{child}: (added) → {}", render(y))),
                        (None, None) => {}
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for i in 0..a.len().max(b.len()) {
                    let child = format!("{path}[{i}]");
                    match (a.get(i), b.get(i)) {
                        (Some(x), Some(y)) => self.walk(x, y, &child),
                        (Some(x), None) => self.record(format!("{child}: {} → (removed)", render(x))),
                        (None, Some(y)) => self.record(format!("{child}: (added) → {}", render(y))),
                        (None, None) => {}
                    }
                }
            }
            _ => {
                if old != new {
                    self.record(format!("{path}: {} → {}", render(old), render(new)));
                }
            }
        }
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
