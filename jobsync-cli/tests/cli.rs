use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::json;
use tempfile::TempDir;

const ENV_OVERRIDES: [&str; 5] = [
    "JOBSYNC_SOURCE_FOLDER",
    "JOBSYNC_NUM_THREADS",
    "JOBSYNC_MAPPINGS_PATH",
    "JOBSYNC_WORK_DIR",
    "JOBSYNC_STORE_ROOT",
];

fn jobsync_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_jobsync"))
}

fn jobsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(jobsync_bin());
    cmd.env("HOME", home).env("USERPROFILE", home);
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd
}

fn write_json(path: &Path, value: serde_json::Value) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, serde_json::to_vec_pretty(&value).expect("encode")).expect("write");
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

#[test]
fn diff_of_identical_documents_succeeds() {
    let dir = TempDir::new().expect("dir");
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    write_json(&a, json!({"settings": {"name": "etl", "job_id": 1}}));
    write_json(&b, json!({"settings": {"name": "etl", "job_id": 2}}));

    Command::new(jobsync_bin())
        .arg("diff")
        .arg(&a)
        .arg(&b)
        .assert()
        .success()
        .stdout(contains("No differences."));
}

#[test]
fn diff_reports_paths_and_exits_one() {
    let dir = TempDir::new().expect("dir");
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.json");
    write_json(&a, json!({"settings": {"name": "etl", "timeout_seconds": 60}}));
    write_json(&b, json!({"settings": {"name": "etl", "timeout_seconds": 90}}));

    let assert = Command::new(jobsync_bin())
        .arg("diff")
        .arg(&a)
        .arg(&b)
        .arg("--unified")
        .assert()
        .code(1)
        .stdout(contains("settings.timeout_seconds: 60 → 90"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    assert!(
        stdout
            .lines()
            .any(|line| line.starts_with('+') && line.contains("\"timeout_seconds\": 90")),
        "expected an added line in the unified diff:\n{stdout}"
    );
}

#[test]
fn diff_rejects_invalid_json() {
    let dir = TempDir::new().expect("dir");
    let a = dir.path().join("a.json");
    fs::write(&a, "{not json").expect("write");

    Command::new(jobsync_bin())
        .arg("diff")
        .arg(&a)
        .arg(&a)
        .assert()
        .failure()
        .stderr(contains("is not valid JSON"));
}

// ---------------------------------------------------------------------------
// Without a daemon
// ---------------------------------------------------------------------------

#[test]
fn ping_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    jobsync_cmd(home.path())
        .args(["daemon", "ping"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}

#[test]
fn start_without_daemon_fails_with_hint() {
    let home = TempDir::new().expect("home");
    jobsync_cmd(home.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("jobsync daemon start"));
}

// ---------------------------------------------------------------------------
// Against a running daemon
// ---------------------------------------------------------------------------

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = jobsync_cmd(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self {
            child,
            home: home.to_path_buf(),
        }
    }

    fn stop(&mut self) {
        let _ = jobsync_cmd(&self.home).args(["daemon", "stop"]).status();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

fn daemon_running(home: &Path) -> bool {
    let Ok(output) = jobsync_cmd(home).args(["daemon", "ping"]).output() else {
        return false;
    };
    serde_json::from_slice::<serde_json::Value>(&output.stdout)
        .ok()
        .and_then(|v| v.get("running").and_then(|r| r.as_bool()))
        .unwrap_or(false)
}

/// Run a start command with `--wait`; returns the operation id and stdout.
fn run_waiting(home: &Path, args: &[&str]) -> (String, String) {
    let assert = jobsync_cmd(home).args(args).arg("--wait").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let id = stdout
        .lines()
        .find_map(|line| {
            line.strip_prefix("Started ")
                .and_then(|rest| rest.split_whitespace().nth(2))
        })
        .expect("operation id in output")
        .to_string();
    (id, stdout)
}

/// `~/.jobsync` with a config file and a directory-backed workspace holding
/// one definition file and no live jobs.
fn seed_home(home: &Path) -> PathBuf {
    let root = home.join(".jobsync");
    fs::create_dir_all(&root).expect("jobsync root");
    fs::write(
        root.join("config.yaml"),
        "source_folder: /Repos/ops/jobs\nnum_threads: 2\n",
    )
    .expect("config.yaml");

    let workspace = root.join("workspace");
    write_json(
        &workspace.join("clusters.json"),
        json!([{"cluster_id": "0101-abc", "cluster_name": "shared"}]),
    );
    write_json(
        &workspace.join("files/Repos/ops/jobs/nightly.json"),
        json!({"settings": {
            "name": "nightly",
            "tasks": [{"task_key": "main", "existing_cluster_id": "__CLUSTER__shared__"}]
        }}),
    );
    workspace
}

fn live_job_files(workspace: &Path) -> Vec<PathBuf> {
    match fs::read_dir(workspace.join("jobs")) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn validate_import_then_delete_through_the_daemon() {
    let home = TempDir::new().expect("home");
    let workspace = seed_home(home.path());
    let mut daemon = DaemonProcess::start(home.path());
    assert!(
        wait_until(Duration::from_secs(5), || daemon_running(home.path())),
        "daemon did not answer ping in time",
    );

    // The definition exists only on disk.
    let (validation, stdout) = run_waiting(home.path(), &["validate"]);
    assert!(stdout.contains("nightly"), "{stdout}");
    assert!(stdout.contains("new"), "{stdout}");

    let (_, stdout) = run_waiting(home.path(), &["import", "--from", &validation]);
    assert!(stdout.contains("Import completed successfully"), "{stdout}");
    let jobs = live_job_files(&workspace);
    assert_eq!(jobs.len(), 1);
    let live: serde_json::Value =
        serde_json::from_slice(&fs::read(&jobs[0]).expect("read job")).expect("job json");
    assert_eq!(
        live["settings"]["tasks"][0]["existing_cluster_id"],
        json!("0101-abc")
    );

    // Drop the definition: the live job is now untracked.
    fs::remove_file(workspace.join("files/Repos/ops/jobs/nightly.json")).expect("remove");
    fs::write(workspace.join("files/Repos/ops/jobs/other.json"), "{}").expect("placeholder");
    let (validation, _) = run_waiting(home.path(), &["validate"]);
    let (_, stdout) = run_waiting(home.path(), &["delete", "--from", &validation]);
    assert!(stdout.contains("Deletion completed successfully"), "{stdout}");
    assert!(live_job_files(&workspace).is_empty());

    jobsync_cmd(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(contains("validate"))
        .stdout(contains("import"))
        .stdout(contains("delete"));

    jobsync_cmd(home.path())
        .args(["status", &validation, "--json"])
        .assert()
        .success()
        .stdout(contains("\"kind\": \"validate\""));

    jobsync_cmd(home.path())
        .args(["import", "--from", "no-such-run"])
        .assert()
        .failure()
        .stderr(contains("not_found"));

    daemon.stop();
}
