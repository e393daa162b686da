//! Process settings.
//!
//! # Storage layout
//!
//! ```text
//! ~/.jobsync/
//!   config.yaml     (optional; every key has a default, mode 0600)
//!   runs/           (default work_dir: one directory per validation run)
//!   workspace/      (default store_root for the directory-backed store)
//! ```
//!
//! Environment variables override the file:
//! `JOBSYNC_SOURCE_FOLDER`, `JOBSYNC_NUM_THREADS`, `JOBSYNC_MAPPINGS_PATH`,
//! `JOBSYNC_WORK_DIR`, `JOBSYNC_STORE_ROOT`.
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

pub const ENV_SOURCE_FOLDER: &str = "JOBSYNC_SOURCE_FOLDER";
pub const ENV_NUM_THREADS: &str = "JOBSYNC_NUM_THREADS";
pub const ENV_MAPPINGS_PATH: &str = "JOBSYNC_MAPPINGS_PATH";
pub const ENV_WORK_DIR: &str = "JOBSYNC_WORK_DIR";
pub const ENV_STORE_ROOT: &str = "JOBSYNC_STORE_ROOT";

pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_MAPPINGS_PATH: &str = "/Workspace/jobsync.config.json";

/// Effective settings for one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Workspace folder holding the version-controlled `<job name>.json` files.
    pub source_folder: Option<String>,
    /// Width of every per-operation worker pool.
    pub num_threads: usize,
    /// Workspace path of the name-mapping record.
    pub mappings_path: String,
    /// Local directory for validated snapshots.
    pub work_dir: PathBuf,
    /// Root of the directory-backed workspace store.
    pub store_root: PathBuf,
}

/// On-disk shape: every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    source_folder: Option<String>,
    num_threads: Option<usize>,
    mappings_path: Option<String>,
    work_dir: Option<PathBuf>,
    store_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.jobsync`
pub fn jobsync_root(home: &Path) -> PathBuf {
    home.join(".jobsync")
}

/// `<home>/.jobsync/config.yaml` (pure, no I/O).
pub fn settings_path_at(home: &Path) -> PathBuf {
    jobsync_root(home).join("config.yaml")
}

/// Defaults rooted at `home`.
pub fn defaults_at(home: &Path) -> Settings {
    Settings {
        source_folder: None,
        num_threads: DEFAULT_NUM_THREADS,
        mappings_path: DEFAULT_MAPPINGS_PATH.to_string(),
        work_dir: jobsync_root(home).join("runs"),
        store_root: jobsync_root(home).join("workspace"),
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `config.yaml` (if present) on top of the defaults. No env overrides.
///
/// Returns `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_file_at(home: &Path) -> Result<Settings, CoreError> {
    let mut settings = defaults_at(home);
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(settings);
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let file: SettingsFile = if contents.trim().is_empty() {
        SettingsFile::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?
    };

    if file.source_folder.is_some() {
        settings.source_folder = file.source_folder;
    }
    if let Some(n) = file.num_threads {
        settings.num_threads = validate_threads(n, "num_threads")?;
    }
    if let Some(p) = file.mappings_path {
        settings.mappings_path = p;
    }
    if let Some(p) = file.work_dir {
        settings.work_dir = p;
    }
    if let Some(p) = file.store_root {
        settings.store_root = p;
    }
    Ok(settings)
}

/// Load the file, then apply process environment overrides.
pub fn load_at(home: &Path) -> Result<Settings, CoreError> {
    let settings = load_file_at(home)?;
    apply_overrides(settings, |key| std::env::var(key).ok())
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, CoreError> {
    load_at(&home()?)
}

/// Apply overrides from `lookup` (the environment in production).
///
/// Empty values are ignored so `JOBSYNC_SOURCE_FOLDER=` does not clear a
/// configured folder.
pub fn apply_overrides<F>(mut settings: Settings, lookup: F) -> Result<Settings, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(folder) = get(ENV_SOURCE_FOLDER) {
        settings.source_folder = Some(folder);
    }
    if let Some(raw) = get(ENV_NUM_THREADS) {
        let n = raw.trim().parse::<usize>().map_err(|e| CoreError::InvalidSetting {
            key: ENV_NUM_THREADS.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        settings.num_threads = validate_threads(n, ENV_NUM_THREADS)?;
    }
    if let Some(path) = get(ENV_MAPPINGS_PATH) {
        settings.mappings_path = path;
    }
    if let Some(dir) = get(ENV_WORK_DIR) {
        settings.work_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get(ENV_STORE_ROOT) {
        settings.store_root = PathBuf::from(dir);
    }
    Ok(settings)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `settings` to `<home>/.jobsync/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), CoreError> {
    let root = jobsync_root(home);
    std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;

    let path = settings_path_at(home);
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

fn validate_threads(n: usize, key: &str) -> Result<usize, CoreError> {
    if n == 0 {
        return Err(CoreError::InvalidSetting {
            key: key.to_string(),
            value: n.to_string(),
            reason: "worker pool width must be at least 1".to_string(),
        });
    }
    Ok(n)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn settings_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(settings_path_at(home.path()).ends_with(".jobsync/config.yaml"));
    }

    #[test]
    fn defaults_when_file_missing() {
        let home = TempDir::new().expect("tempdir");
        let settings = load_file_at(home.path()).expect("load");
        assert_eq!(settings, defaults_at(home.path()));
        assert_eq!(settings.num_threads, DEFAULT_NUM_THREADS);
        assert!(settings.source_folder.is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let home = TempDir::new().expect("tempdir");
        let settings = apply_overrides(
            defaults_at(home.path()),
            env(&[
                (ENV_SOURCE_FOLDER, "/Repos/ops/jobs"),
                (ENV_NUM_THREADS, "8"),
                (ENV_WORK_DIR, "/tmp/jobsync-runs"),
            ]),
        )
        .expect("overrides");
        assert_eq!(settings.source_folder.as_deref(), Some("/Repos/ops/jobs"));
        assert_eq!(settings.num_threads, 8);
        assert_eq!(settings.work_dir, PathBuf::from("/tmp/jobsync-runs"));
        assert_eq!(settings.mappings_path, DEFAULT_MAPPINGS_PATH);
    }

    #[test]
    fn empty_env_value_is_ignored() {
        let home = TempDir::new().expect("tempdir");
        let mut base = defaults_at(home.path());
        base.source_folder = Some("/Repos/a".into());
        let settings = apply_overrides(base, env(&[(ENV_SOURCE_FOLDER, "  ")])).expect("ok");
        assert_eq!(settings.source_folder.as_deref(), Some("/Repos/a"));
    }

    #[test]
    fn zero_threads_rejected() {
        let home = TempDir::new().expect("tempdir");
        let err = apply_overrides(defaults_at(home.path()), env(&[(ENV_NUM_THREADS, "0")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSetting { .. }), "got: {err}");
    }

    #[test]
    fn non_numeric_threads_rejected() {
        let home = TempDir::new().expect("tempdir");
        let err = apply_overrides(defaults_at(home.path()), env(&[(ENV_NUM_THREADS, "four")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_NUM_THREADS));
    }

    #[test]
    fn save_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        save_at(home.path(), &defaults_at(home.path())).expect("save");
        let tmp = settings_path_at(home.path()).with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(CoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
