//! `jobsync diff <a.json> <b.json>`: compare two definition files locally.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use similar::TextDiff;

use jobsync_sync::diff::{compare, MAX_DIFFERENCES};

/// Arguments for `jobsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Baseline definition (for example the live export).
    pub old: PathBuf,

    /// Definition to compare against the baseline.
    pub new: PathBuf,

    /// Also print a line diff of the pretty-printed documents.
    #[arg(long)]
    pub unified: bool,
}

impl DiffArgs {
    /// Returns `true` when the documents differ.
    pub fn run(self) -> Result<bool> {
        let old = read_document(&self.old)?;
        let new = read_document(&self.new)?;

        let diff = compare(&old, &new);
        if !diff.differs {
            println!("No differences.");
            return Ok(false);
        }

        for line in &diff.differences {
            println!("{} {line}", "~".yellow().bold());
        }
        if diff.differences.len() == MAX_DIFFERENCES {
            println!("{}", format!("(showing the first {MAX_DIFFERENCES})").bright_black());
        }

        if self.unified {
            let old_text = pretty(&old)?;
            let new_text = pretty(&new)?;
            let old_header = format!("a/{}", self.old.display());
            let new_header = format!("b/{}", self.new.display());
            let unified = TextDiff::from_lines(&old_text, &new_text)
                .unified_diff()
                .header(&old_header, &new_header)
                .context_radius(3)
                .to_string();
            println!();
            print!("{unified}");
            if !unified.ends_with('\n') {
                println!();
            }
        }

        Ok(true)
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn pretty(value: &Value) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    text.push('\n');
    Ok(text)
}
