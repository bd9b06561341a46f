//! `folio changes [--since <id>]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use folio_commit::ChangeLog;
use folio_core::{Operation, Settings, UniqueId};

#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Only show changes committed after this id.
    #[arg(long)]
    pub since: Option<UniqueId>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ChangeJson {
    id: UniqueId,
    operation: Operation,
    entity_id: Option<String>,
    label: String,
    path: PathBuf,
}

impl ChangesArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let log = ChangeLog::new(&settings.work_dir());
        let since = self.since.unwrap_or_default();
        let records = log
            .since(&since)
            .with_context(|| format!("failed to read {}", log.path().display()))?;

        if self.json {
            let records: Vec<ChangeJson> = records
                .into_iter()
                .map(|r| ChangeJson {
                    id: r.id,
                    operation: r.operation,
                    entity_id: r.entity_id,
                    label: r.label,
                    path: r.path,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("{}", "no changes".dimmed());
        }
        for record in records {
            let op = match record.operation {
                Operation::Write => "write ".green(),
                Operation::Delete => "delete".red(),
            };
            println!("{} {op} {}", record.id, record.path.display());
        }
        Ok(())
    }
}
