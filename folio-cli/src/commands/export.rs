//! `folio export <manifest.json>`: commit one collection of file operations.
//!
//! The manifest is a JSON object:
//!
//! ```json
//! {
//!   "id": "2024-05-01_12-00-00.000000__0001",
//!   "items": [
//!     { "operation": "write", "path": "blog/index.html", "text": "<h1>Blog</h1>" },
//!     { "operation": "delete", "path": "drafts/old.html" }
//!   ]
//! }
//! ```
//!
//! `id` is optional; one is minted when missing. Relative item paths are
//! resolved against the data directory. Binary payloads go in `content` as
//! base64, text payloads in `text`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use folio_commit::{CommitMode, DiskCommitWriter};
use folio_core::{FileCollection, FileCollectionGroup, FileItem, Settings, UniqueId};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Path of the JSON manifest.
    pub manifest: PathBuf,

    /// Commit directly, bypassing the queue and the output lock.
    #[arg(long)]
    pub no_lock: bool,

    /// Queue the collection and leave draining to another process.
    #[arg(long, conflicts_with = "no_lock")]
    pub no_coordinate: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    id: Option<UniqueId>,
    #[serde(default)]
    items: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    #[serde(flatten)]
    item: FileItem,
    #[serde(default)]
    text: Option<String>,
}

impl ManifestItem {
    fn into_item(self, data_dir: &Path) -> FileItem {
        let mut item = self.item;
        if item.path.is_relative() {
            item.path = data_dir.join(&item.path);
        }
        if item.label.is_empty() {
            if let Some(name) = item.path.file_name() {
                item.label = name.to_string_lossy().into_owned();
            }
        }
        if let Some(text) = self.text {
            item.content = text.into_bytes();
        }
        item
    }
}

#[derive(Serialize)]
struct ExportReport {
    id: UniqueId,
    mode: &'static str,
    committed: Vec<UniqueId>,
    executed: usize,
    skipped: usize,
}

impl ExportArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let raw = fs::read_to_string(&self.manifest)
            .with_context(|| format!("failed to read manifest {}", self.manifest.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("invalid manifest {}", self.manifest.display()))?;

        let data_dir = settings.data_dir();
        let items: Vec<FileItem> = manifest
            .items
            .into_iter()
            .map(|item| item.into_item(&data_dir))
            .collect();

        let writer = DiskCommitWriter::new(settings);
        let mode = if self.no_lock {
            CommitMode::Direct
        } else {
            CommitMode::Queued {
                coordinate: !self.no_coordinate,
            }
        };
        let id = match (mode, manifest.id) {
            (CommitMode::Direct, Some(id)) => id,
            (CommitMode::Direct, None) => UniqueId::generate(),
            (CommitMode::Queued { .. }, Some(id)) => {
                writer
                    .queue()
                    .start_insertion(&id)
                    .with_context(|| format!("failed to queue export {id}"))?;
                id
            }
            (CommitMode::Queued { .. }, None) => {
                writer.begin().context("failed to queue export")?
            }
        };

        let group = writer
            .save(FileCollection::with_items(id.clone(), items), mode)
            .with_context(|| format!("failed to commit export {id}"))?;

        let report = ExportReport {
            id,
            mode: mode_name(mode),
            committed: group.ids().into_iter().cloned().collect(),
            executed: group.executed_count(),
            skipped: group.skipped_count(),
        };
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, &group);
        }
        Ok(())
    }
}

fn mode_name(mode: CommitMode) -> &'static str {
    match mode {
        CommitMode::Direct => "direct",
        CommitMode::Queued { coordinate: true } => "queued",
        CommitMode::Queued { coordinate: false } => "queued-only",
    }
}

fn print_report(report: &ExportReport, group: &FileCollectionGroup) {
    if group.is_empty() {
        println!("{} {}", "queued".yellow().bold(), report.id);
        return;
    }
    for collection in group.iter() {
        let marker = if collection.id == report.id {
            "committed".green().bold()
        } else {
            "committed".normal()
        };
        println!("{marker} {}", collection.id);
    }
    println!(
        "{} executed, {} skipped",
        report.executed, report.skipped
    );
}
