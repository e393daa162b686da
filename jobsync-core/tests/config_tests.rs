//! Settings file error messages, atomic-write safety, and override layering.
//! Storage: ~/.jobsync/config.yaml

use assert_fs::prelude::*;
use jobsync_core::config::{self, ENV_MAPPINGS_PATH, ENV_NUM_THREADS, ENV_STORE_ROOT};
use jobsync_core::CoreError;
use predicates::prelude::predicate;
use std::fs;
use std::path::PathBuf;

fn write_config(home: &assert_fs::TempDir, yaml: &str) {
    home.child(".jobsync/config.yaml").write_str(yaml).expect("write config");
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_reads_every_key() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        "source_folder: /Repos/team/jobs\n\
         num_threads: 2\n\
         mappings_path: /Workspace/prod.config.json\n\
         work_dir: /var/jobsync/runs\n\
         store_root: /var/jobsync/workspace\n",
    );

    let settings = config::load_file_at(home.path()).expect("load");
    assert_eq!(settings.source_folder.as_deref(), Some("/Repos/team/jobs"));
    assert_eq!(settings.num_threads, 2);
    assert_eq!(settings.mappings_path, "/Workspace/prod.config.json");
    assert_eq!(settings.work_dir, PathBuf::from("/var/jobsync/runs"));
    assert_eq!(settings.store_root, PathBuf::from("/var/jobsync/workspace"));
}

#[test]
fn partial_file_keeps_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "source_folder: /Repos/team/jobs\n");

    let settings = config::load_file_at(home.path()).expect("load");
    let defaults = config::defaults_at(home.path());
    assert_eq!(settings.num_threads, defaults.num_threads);
    assert_eq!(settings.work_dir, defaults.work_dir);
}

#[test]
fn empty_file_is_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "");
    let settings = config::load_file_at(home.path()).expect("load");
    assert_eq!(settings, config::defaults_at(home.path()));
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_file_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn unknown_key_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "num_thread: 3\n");
    let err = config::load_file_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
}

#[test]
fn zero_threads_in_file_is_invalid() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "num_threads: 0\n");
    let err = config::load_file_at(home.path()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidSetting { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Overrides on top of the file
// ---------------------------------------------------------------------------

#[test]
fn overrides_win_over_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "num_threads: 2\nmappings_path: /Workspace/a.json\n");

    let from_file = config::load_file_at(home.path()).expect("load");
    let settings = config::apply_overrides(from_file, |key| match key {
        k if k == ENV_NUM_THREADS => Some("16".to_string()),
        k if k == ENV_STORE_ROOT => Some("/srv/fixture".to_string()),
        _ => None,
    })
    .expect("overrides");

    assert_eq!(settings.num_threads, 16);
    assert_eq!(settings.store_root, PathBuf::from("/srv/fixture"));
    assert_eq!(settings.mappings_path, "/Workspace/a.json");
}

#[test]
fn mappings_path_override() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let settings = config::apply_overrides(config::defaults_at(home.path()), |key| {
        (key == ENV_MAPPINGS_PATH).then(|| "/Workspace/dev.json".to_string())
    })
    .expect("overrides");
    assert_eq!(settings.mappings_path, "/Workspace/dev.json");
}

// ---------------------------------------------------------------------------
// 3. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_roundtrips() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut settings = config::defaults_at(home.path());
    settings.source_folder = Some("/Repos/x".into());
    settings.num_threads = 6;
    config::save_at(home.path(), &settings).expect("save");

    home.child(".jobsync/config.yaml").assert(predicate::path::exists());
    let loaded = config::load_file_at(home.path()).expect("load");
    assert_eq!(loaded, settings);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = config::settings_path_at(home.path());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &config::defaults_at(home.path())).expect("save");

    let path = config::settings_path_at(home.path());
    let original = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original, fs::read(&path).expect("read after crash"));
    let loaded = config::load_file_at(home.path()).expect("load ignores orphan tmp");
    assert_eq!(loaded, config::defaults_at(home.path()));
}
