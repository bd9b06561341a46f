//! folio: ordered export commits and atomically published site releases.
//!
//! # Usage
//!
//! ```text
//! folio [--base <dir>] [--json-logs] export <manifest.json> [--no-lock] [--no-coordinate]
//! folio queue status|drain
//! folio release list|current|publish <id>|rollback|prune
//! folio changes [--since <id>]
//! folio build
//! folio daemon
//! folio id new|check <id>
//! ```
//!
//! Exit status is 2 when the export/build system itself failed and 1 for
//! every other error.

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    build::BuildArgs, changes::ChangesArgs, daemon::DaemonArgs, export::ExportArgs,
    id::IdCommand, queue::QueueCommand, release::ReleaseCommand,
};
use folio_build::BuildError;
use folio_commit::CommitError;
use folio_core::Settings;
use folio_daemon::DaemonError;
use folio_release::ReleaseError;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "folio",
    version,
    about = "Commit exported files in order and publish site releases atomically",
    long_about = None,
)]
struct Cli {
    /// Site base directory (holds folio.yaml, releases/ and current).
    #[arg(long, global = true, default_value = ".")]
    base: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Commit a manifest of file writes and deletes.
    Export(ExportArgs),

    /// Inspect or drain the commit queue.
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Inspect and manage releases.
    Release {
        #[command(subcommand)]
        command: ReleaseCommand,
    },

    /// List executed changes.
    Changes(ChangesArgs),

    /// Run the build loop once.
    Build(BuildArgs),

    /// Run the build loop periodically until ctrl-c.
    Daemon(DaemonArgs),

    /// Mint or validate unique ids.
    Id {
        #[command(subcommand)]
        command: IdCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    folio_daemon::init_tracing(cli.json_logs);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            if is_systemic(&err) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let base = cli.base;
    match cli.command {
        Commands::Id { command } => commands::id::run(command),
        Commands::Export(args) => args.run(&load_settings(&base)?),
        Commands::Queue { command } => commands::queue::run(command, &load_settings(&base)?),
        Commands::Release { command } => commands::release::run(command, &load_settings(&base)?),
        Commands::Changes(args) => args.run(&load_settings(&base)?),
        Commands::Build(args) => args.run(load_settings(&base)?),
        Commands::Daemon(args) => args.run(load_settings(&base)?),
    }
}

fn load_settings(base: &Path) -> Result<Settings> {
    Settings::load_with_env(base)
        .with_context(|| format!("failed to load settings from {}", base.display()))
}

/// The first folio error in the chain decides.
fn is_systemic(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<DaemonError>() {
            return err.is_systemic();
        }
        if let Some(err) = cause.downcast_ref::<BuildError>() {
            return err.is_systemic();
        }
        if let Some(err) = cause.downcast_ref::<CommitError>() {
            return !err.is_invalid_input() && !err.is_lock_timeout();
        }
        if let Some(err) = cause.downcast_ref::<ReleaseError>() {
            return !matches!(err, ReleaseError::CannotDeleteCurrentRelease { .. });
        }
    }
    false
}
