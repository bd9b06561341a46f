//! `folio release …`: list, inspect, publish, roll back and prune releases.
//!
//! Commands that move `current` or delete releases take the build lock
//! without waiting, so they never race a running build.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use folio_core::{paths, NamedLock, Settings, UniqueId};
use folio_release::ReleaseManager;

#[derive(Subcommand, Debug)]
pub enum ReleaseCommand {
    /// List releases, newest first.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the id of the current release.
    Current,

    /// Make a finished release current.
    Publish {
        /// Release id.
        id: UniqueId,
    },

    /// Make the newest finished release older than the current one current.
    Rollback,

    /// Delete releases beyond `releases.retention`, sparing the current one.
    Prune,
}

#[derive(Serialize)]
struct ReleaseJson {
    id: UniqueId,
    created_at: String,
    task: String,
    current: bool,
}

#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "task")]
    task: String,
}

pub fn run(command: ReleaseCommand, settings: &Settings) -> Result<()> {
    let releases = ReleaseManager::open(&settings.base_dir)
        .with_context(|| format!("failed to open releases under {}", settings.base_dir.display()))?;
    let task = settings.releases.task.as_str();

    match command {
        ReleaseCommand::List { json } => list(&releases, task, json),
        ReleaseCommand::Current => match releases.current_id()? {
            Some(id) => {
                println!("{id}");
                Ok(())
            }
            None => bail!("no release is current"),
        },
        ReleaseCommand::Publish { id } => {
            let _lock = build_lock(settings)?;
            let release = releases.create(&id);
            if !release.exists() {
                bail!("unknown release {id}");
            }
            let state = release.task(task).state()?;
            if state != folio_release::TaskState::Done {
                bail!("release {id} cannot be published: task '{task}' is {state}");
            }
            if !releases.publish(&id, task)? {
                bail!("publishing release {id} could not be confirmed");
            }
            println!("{} {id}", "published".green().bold());
            Ok(())
        }
        ReleaseCommand::Rollback => {
            let _lock = build_lock(settings)?;
            match releases.rollback(task)? {
                Some(id) => {
                    println!("{} {id}", "current".green().bold());
                    Ok(())
                }
                None => bail!("no finished release older than the current one"),
            }
        }
        ReleaseCommand::Prune => {
            let _lock = build_lock(settings)?;
            let deleted = releases.delete_old_releases(settings.releases.retention)?;
            if deleted.is_empty() {
                println!("{}", "nothing to prune".dimmed());
            }
            for id in deleted {
                println!("{} {id}", "deleted".yellow());
            }
            Ok(())
        }
    }
}

fn list(releases: &ReleaseManager, task: &str, json: bool) -> Result<()> {
    let current = releases.current_id()?;
    let mut entries = Vec::new();
    for release in releases.all_releases()? {
        entries.push(ReleaseJson {
            id: release.id().clone(),
            created_at: release
                .id()
                .timestamp()
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            task: release.task(task).state()?.to_string(),
            current: current.as_ref() == Some(release.id()),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("{}", "no releases".dimmed());
        return Ok(());
    }
    let rows: Vec<ReleaseRow> = entries
        .into_iter()
        .map(|entry| ReleaseRow {
            marker: if entry.current { "*" } else { "" },
            id: entry.id.to_string(),
            created: entry.created_at,
            task: entry.task,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Hold the build lock for the rest of the command. Released on drop.
fn build_lock(settings: &Settings) -> Result<NamedLock> {
    let mut lock = NamedLock::new(
        &paths::locks_dir(&settings.work_dir()),
        paths::BUILD_LOCK,
        settings.locks.build_lease(),
    );
    if !lock.try_acquire().context("failed to take the build lock")? {
        bail!("a build is in progress; try again later");
    }
    Ok(lock)
}
