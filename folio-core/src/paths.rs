//! Layout of the work directory.
//!
//! ```text
//! <work>/
//!   queue/<id>[.pending]     commit queue entries
//!   locks/<name>.lock        named lock leases
//!   last-committed           last globally committed id
//!   last-executed.live       last id that changed live-visible content
//!   last-executed.preview    last id that changed any content
//!   commit.log               append-only audit log, one line per item
//!   changes.log              append-only log of executed items
//! ```

use std::path::{Path, PathBuf};

use crate::types::Audience;

pub const SETTINGS_FILE: &str = "folio.yaml";
pub const OUTPUT_LOCK: &str = "output";
pub const BUILD_LOCK: &str = "build";

pub fn queue_dir(work: &Path) -> PathBuf {
    work.join("queue")
}

pub fn locks_dir(work: &Path) -> PathBuf {
    work.join("locks")
}

pub fn last_committed_path(work: &Path) -> PathBuf {
    work.join("last-committed")
}

pub fn last_executed_path(work: &Path, audience: Audience) -> PathBuf {
    work.join(format!("last-executed.{audience}"))
}

pub fn commit_log_path(work: &Path) -> PathBuf {
    work.join("commit.log")
}

pub fn changes_log_path(work: &Path) -> PathBuf {
    work.join("changes.log")
}

pub fn settings_path(base: &Path) -> PathBuf {
    base.join(SETTINGS_FILE)
}
