//! # folio-commit
//!
//! Ordered, idempotent commits of exported files into the shared output
//! directory.
//!
//! Producers reserve a slot in the [`CommitQueue`] when an export starts and
//! hand the finished [`folio_core::FileCollection`] to
//! [`DiskCommitWriter::save`]. The coordinating writer drains the queue under
//! the output lock, applying collections in id order and discarding stale
//! ones.

pub mod changes;
pub mod control;
pub mod error;
pub mod queue;
pub mod writer;

pub use changes::{ChangeLog, ChangeRecord};
pub use control::ControlFiles;
pub use error::CommitError;
pub use queue::{CommitQueue, EntryState, QueueEntry, QueueListing};
pub use writer::{CommitMode, DiskCommitWriter};
