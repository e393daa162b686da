//! jobsync: reconcile job definitions between a workspace and its
//! version-controlled folder.
//!
//! # Usage
//!
//! ```text
//! jobsync daemon start|stop|ping
//! jobsync validate [--wait]
//! jobsync export [--wait]
//! jobsync import --from <validation id> [--wait]
//! jobsync delete --from <validation id> [--wait]
//! jobsync status <id> [--json]
//! jobsync list
//! jobsync info
//! jobsync diff <a.json> <b.json> [--unified]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    diff::DiffArgs,
    operation::{BatchArgs, StartArgs},
    status::StatusArgs,
};
use jobsync_core::OperationKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "jobsync",
    version,
    about = "Validate, export, import and delete workspace job definitions",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare the definition folder with the live workspace.
    Validate(StartArgs),

    /// Write every live job into the definition folder.
    Export(StartArgs),

    /// Create or update the new and changed jobs of a validation run.
    Import(BatchArgs),

    /// Delete the live jobs a validation run marked as deleted.
    Delete(BatchArgs),

    /// Show one operation.
    Status(StatusArgs),

    /// List every operation the daemon knows, newest first.
    List,

    /// Show the configured workspace.
    Info,

    /// Compare two definition files without the daemon.
    Diff(DiffArgs),

    /// Manage the jobsync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let succeeded = match cli.command {
        Commands::Validate(args) => commands::operation::run(OperationKind::Validate, None, args.wait)?,
        Commands::Export(args) => commands::operation::run(OperationKind::Export, None, args.wait)?,
        Commands::Import(args) => {
            commands::operation::run(OperationKind::Import, Some(args.from), args.wait)?
        }
        Commands::Delete(args) => {
            commands::operation::run(OperationKind::Delete, Some(args.from), args.wait)?
        }
        Commands::Status(args) => args.run().map(|()| true)?,
        Commands::List => commands::status::run_list().map(|()| true)?,
        Commands::Info => commands::status::run_info().map(|()| true)?,
        Commands::Diff(args) => !args.run()?,
        Commands::Daemon { command } => commands::daemon::run(command).map(|()| true)?,
    };
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
