//! `folio queue status` and `folio queue drain`

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use folio_commit::DiskCommitWriter;
use folio_core::{Audience, Settings, UniqueId};

use super::format_age;

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// Show queued entries and the control ids.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Commit every queued entry under the output lock.
    Drain,
}

#[derive(Serialize)]
struct QueueStatusJson {
    last_committed: UniqueId,
    last_executed_live: UniqueId,
    last_executed_preview: UniqueId,
    entries: Vec<QueueEntryJson>,
}

#[derive(Serialize)]
struct QueueEntryJson {
    id: UniqueId,
    state: &'static str,
    age_secs: u64,
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "state")]
    state: &'static str,
    #[tabled(rename = "age")]
    age: String,
}

pub fn run(command: QueueCommand, settings: &Settings) -> Result<()> {
    let writer = DiskCommitWriter::new(settings);
    match command {
        QueueCommand::Status { json } => status(&writer, json),
        QueueCommand::Drain => drain(&writer),
    }
}

fn status(writer: &DiskCommitWriter, json: bool) -> Result<()> {
    let control = writer.control();
    let entries = writer.queue().list().context("failed to list commit queue")?;
    let report = QueueStatusJson {
        last_committed: control.last_committed()?,
        last_executed_live: control.last_executed(Audience::Live)?,
        last_executed_preview: control.last_executed(Audience::Preview)?,
        entries: entries
            .iter()
            .map(|entry| QueueEntryJson {
                id: entry.id.clone(),
                state: state_name(entry.pending),
                age_secs: entry.age.as_secs(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("last committed:         {}", report.last_committed);
    println!("last executed (live):    {}", report.last_executed_live);
    println!("last executed (preview): {}", report.last_executed_preview);
    if entries.is_empty() {
        println!("{}", "queue is empty".dimmed());
        return Ok(());
    }
    let rows: Vec<QueueRow> = entries
        .iter()
        .map(|entry| QueueRow {
            id: entry.id.to_string(),
            state: state_name(entry.pending),
            age: format_age(entry.age),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn drain(writer: &DiskCommitWriter) -> Result<()> {
    let group = writer.drain().context("failed to drain commit queue")?;
    if group.is_empty() {
        println!("{}", "nothing to commit".dimmed());
        return Ok(());
    }
    for collection in group.iter() {
        println!("{} {}", "committed".green().bold(), collection.id);
    }
    println!(
        "{} executed, {} skipped",
        group.executed_count(),
        group.skipped_count()
    );
    Ok(())
}

fn state_name(pending: bool) -> &'static str {
    if pending {
        "pending"
    } else {
        "done"
    }
}
