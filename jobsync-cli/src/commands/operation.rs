//! `jobsync validate|export|import|delete`: start operations on the daemon.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use jobsync_core::{OperationKind, OperationStatus};
use jobsync_daemon::{request_start, request_status, DaemonError};
use jobsync_sync::OperationSnapshot;

use super::status::print_snapshot;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments for `jobsync validate` and `jobsync export`.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Block until the operation finishes and print its result.
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for `jobsync import` and `jobsync delete`.
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Id of a finished validation run.
    #[arg(long = "from", value_name = "VALIDATION_ID")]
    pub from: String,

    /// Block until the operation finishes and print its result.
    #[arg(long)]
    pub wait: bool,
}

/// Start `kind`; with `wait`, returns `false` when the operation failed.
pub fn run(kind: OperationKind, validation_id: Option<String>, wait: bool) -> Result<bool> {
    let home = super::home()?;

    let id = match request_start(&home, kind, validation_id) {
        Ok(id) => id,
        Err(err @ DaemonError::DaemonNotRunning { .. }) => {
            return Err(err).context("start it with `jobsync daemon start`");
        }
        Err(err) => return Err(err).with_context(|| format!("failed to start {kind}")),
    };
    println!("Started {kind} operation {id}");
    if !wait {
        return Ok(true);
    }

    let snapshot = wait_for(&home, &id)?;
    print_snapshot(&snapshot);
    Ok(snapshot.status != OperationStatus::Failed)
}

fn wait_for(home: &Path, id: &str) -> Result<OperationSnapshot> {
    loop {
        let snapshot =
            request_status(home, id).with_context(|| format!("failed to poll operation {id}"))?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        sleep(POLL_INTERVAL);
    }
}
