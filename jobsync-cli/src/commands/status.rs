//! `jobsync status`, `jobsync list` and `jobsync info`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use jobsync_core::{IssueLevel, ItemState, JobStatus, OperationStatus};
use jobsync_daemon::{request_info, request_list, request_status};
use jobsync_sync::{OperationSnapshot, WorkspaceInfo};

/// Arguments for `jobsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Operation id returned by a start command.
    pub id: String,

    /// Emit the raw operation snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let snapshot = request_status(&home, &self.id)
            .with_context(|| format!("failed to fetch operation {}", self.id))?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot)
                    .context("failed to serialize operation JSON")?
            );
            return Ok(());
        }
        print_snapshot(&snapshot);
        Ok(())
    }
}

pub fn run_list() -> Result<()> {
    let home = super::home()?;
    let operations = request_list(&home).context("failed to list operations")?;
    if operations.is_empty() {
        println!("No operations yet.");
        return Ok(());
    }

    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            id: op.id.clone(),
            kind: op.kind.to_string(),
            status: status_label(op.status),
            started: timestamp(op.created_at),
            finished: op.finished_at.map(timestamp).unwrap_or_default(),
            message: op.message.clone().unwrap_or_default(),
        })
        .collect();
    println!("{}", table(rows));
    Ok(())
}

pub fn run_info() -> Result<()> {
    let home = super::home()?;
    let info = request_info(&home).context("failed to fetch workspace info")?;
    println!("{}", table(info_rows(&info)));
    Ok(())
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "started")]
    started: String,
    #[tabled(rename = "finished")]
    finished: String,
    #[tabled(rename = "message")]
    message: String,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "field")]
    field: String,
    #[tabled(rename = "value")]
    value: String,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "job")]
    job: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "item")]
    item: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "error")]
    error: String,
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Human rendering shared by `status` and `--wait`.
pub fn print_snapshot(snapshot: &OperationSnapshot) {
    println!(
        "{} {} | {} | started {}",
        snapshot.kind.to_string().to_uppercase().bold(),
        snapshot.id,
        status_label(snapshot.status),
        timestamp(snapshot.created_at),
    );
    if let Some(source) = &snapshot.source_validation {
        println!("from validation {source}");
    }
    if let Some(message) = &snapshot.message {
        println!("{message}");
    }

    let counters = progress_rows(&snapshot.progress);
    if !counters.is_empty() {
        println!("{}", table(counters));
    }

    if let Some(report) = &snapshot.report {
        for issue in &report.task_issues {
            let level = match issue.level {
                Some(IssueLevel::Error) => "error".red().bold(),
                _ => "warning".yellow().bold(),
            };
            match &issue.file {
                Some(file) => println!("{level}: {} ({file})", issue.issue),
                None => println!("{level}: {}", issue.issue),
            }
        }
        if !report.job_statuses.is_empty() {
            let rows: Vec<JobRow> = report
                .job_statuses
                .iter()
                .map(|s| JobRow {
                    file: s.file_name.clone().unwrap_or_default(),
                    job: s.job_name.clone().unwrap_or_default(),
                    status: job_status_label(s.status),
                    detail: s
                        .validation_issues
                        .iter()
                        .map(|i| i.issue.as_str())
                        .chain(s.differences.iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join("\n"),
                })
                .collect();
            println!("{}", table(rows));
        }
    } else if !snapshot.per_item_statuses.is_empty() {
        let rows: Vec<ItemRow> = snapshot
            .per_item_statuses
            .iter()
            .map(|item| ItemRow {
                item: item.name.clone(),
                state: item_state_label(item.state),
                error: item.error_message.clone().unwrap_or_default(),
            })
            .collect();
        println!("{}", table(rows));
    }
}

/// Counter rows of a tagged progress record, sorted by counter name.
fn progress_rows(progress: &impl serde::Serialize) -> Vec<FieldRow> {
    let Ok(Value::Object(fields)) = serde_json::to_value(progress) else {
        return Vec::new();
    };
    fields
        .into_iter()
        .filter(|(key, _)| key != "kind")
        .map(|(key, value)| FieldRow {
            field: key.replace('_', " "),
            value: value.to_string(),
        })
        .collect()
}

fn info_rows(info: &WorkspaceInfo) -> Vec<FieldRow> {
    let row = |field: &str, value: String| FieldRow {
        field: field.to_string(),
        value,
    };
    vec![
        row(
            "source folder",
            info.source_folder
                .clone()
                .unwrap_or_else(|| "(not configured)".to_string()),
        ),
        row(
            "definition files",
            info.json_files
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unavailable".to_string()),
        ),
        row("jobs", info.jobs.to_string()),
        row("clusters", info.clusters.to_string()),
        row("warehouses", info.warehouses.to_string()),
        row("mappings", info.mappings_path.clone()),
    ]
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn status_label(status: OperationStatus) -> String {
    let label = status.to_string().to_uppercase();
    match status {
        OperationStatus::Pending => label.bright_black().bold().to_string(),
        OperationStatus::Running => label.cyan().bold().to_string(),
        OperationStatus::Completed => label.green().bold().to_string(),
        OperationStatus::CompletedNoChanges => label.green().to_string(),
        OperationStatus::CompletedWithErrors => label.yellow().bold().to_string(),
        OperationStatus::Failed => label.red().bold().to_string(),
    }
}

fn job_status_label(status: JobStatus) -> String {
    let label = status.to_string();
    match status {
        JobStatus::New => label.green().to_string(),
        JobStatus::Changed => label.yellow().to_string(),
        JobStatus::Deleted => label.magenta().to_string(),
        JobStatus::Error => label.red().bold().to_string(),
        JobStatus::Unchanged | JobStatus::Skipped => label.bright_black().to_string(),
    }
}

fn item_state_label(state: ItemState) -> String {
    match state {
        ItemState::Pending => "pending".bright_black().to_string(),
        ItemState::InProgress => "in progress".cyan().to_string(),
        ItemState::Completed => "completed".green().to_string(),
        ItemState::Skipped => "skipped".bright_black().to_string(),
        ItemState::Error => "error".red().bold().to_string(),
    }
}
