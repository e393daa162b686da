//! Validated snapshots: the resolved job documents import consumes.
//!
//! One file per job, `<work_dir>/<validation id>/validated/<job name>.json`.
//! Writes use the `.tmp` + rename pattern so import never reads a partial
//! document.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{io_err, SyncError};

/// `<job name>.json`, the file name a job definition is stored under both in
/// the source folder and in a snapshot directory. Names that are not a
/// single path segment are rejected.
pub fn definition_file_name(job_name: &str) -> Result<String, SyncError> {
    let unusable = job_name.is_empty()
        || job_name == "."
        || job_name == ".."
        || job_name.contains(['/', '\\', '\0']);
    if unusable {
        return Err(SyncError::Configuration(format!(
            "job name '{job_name}' cannot be used as a file name"
        )));
    }
    Ok(format!("{job_name}.json"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    /// `<work_dir>/<operation_id>/validated` (pure, no I/O).
    pub fn for_run(work_dir: &Path, operation_id: &str) -> Self {
        Self {
            dir: work_dir.join(operation_id).join("validated"),
        }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of one job's snapshot.
    pub fn snapshot_path(&self, job_name: &str) -> Result<PathBuf, SyncError> {
        Ok(self.dir.join(definition_file_name(job_name)?))
    }

    /// Persist `document` as the snapshot of `job_name`.
    pub async fn write(&self, job_name: &str, document: &Value) -> Result<PathBuf, SyncError> {
        let path = self.snapshot_path(job_name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;

        let json = serde_json::to_vec_pretty(document)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }
        Ok(path)
    }

    pub async fn read(&self, job_name: &str) -> Result<Value, SyncError> {
        let path = self.snapshot_path(job_name)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
