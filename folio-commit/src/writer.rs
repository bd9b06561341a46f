//! The disk commit writer: the only component that mutates the output
//! directory.
//!
//! ## Queued save
//!
//! 1. Producer step (`begin`): reserve an id in the queue.
//! 2. Finish the insertion with the real payload.
//! 3. Coordinating writers only: acquire the output lock, drain the queue in
//!    id order, release the lock.
//!
//! Non-coordinating writers return after step 2; whoever drains next commits
//! their collection.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use folio_core::{
    paths, Audience, FileCollection, FileCollectionGroup, FileItem, NamedLock, Operation,
    Settings, UniqueId,
};

use crate::changes::ChangeLog;
use crate::control::ControlFiles;
use crate::error::{io_err, CommitError};
use crate::queue::{CommitQueue, EntryState};

/// How a collection reaches the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit immediately, bypassing queue and lock. Control files are not
    /// touched.
    Direct,
    /// Go through the queue. With `coordinate`, also drain it under the
    /// output lock.
    Queued { coordinate: bool },
}

impl Default for CommitMode {
    fn default() -> Self {
        CommitMode::Queued { coordinate: true }
    }
}

#[derive(Debug, Clone)]
pub struct DiskCommitWriter {
    queue: CommitQueue,
    control: ControlFiles,
    changes: ChangeLog,
    locks_dir: PathBuf,
    output_wait: Duration,
    output_lease: Duration,
    retry_interval: Duration,
    poll_interval: Duration,
}

impl DiskCommitWriter {
    pub fn new(settings: &Settings) -> Self {
        let work = settings.work_dir();
        Self {
            queue: CommitQueue::new(paths::queue_dir(&work), settings.queue.insertion_timeout()),
            control: ControlFiles::new(&work),
            changes: ChangeLog::new(&work),
            locks_dir: paths::locks_dir(&work),
            output_wait: settings.locks.output_wait(),
            output_lease: settings.locks.output_lease(),
            retry_interval: settings.locks.retry_interval(),
            poll_interval: settings.queue.poll_interval(),
        }
    }

    pub fn queue(&self) -> &CommitQueue {
        &self.queue
    }

    pub fn control(&self) -> &ControlFiles {
        &self.control
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    /// A handle on the output-directory lock. Not acquired.
    pub fn output_lock(&self) -> NamedLock {
        NamedLock::new(&self.locks_dir, paths::OUTPUT_LOCK, self.output_lease)
            .with_retry_interval(self.retry_interval)
    }

    pub fn output_wait(&self) -> Duration {
        self.output_wait
    }

    /// Producer step: allocate an id and reserve its place in the queue.
    ///
    /// Call before the (possibly slow) export so the queue position reflects
    /// when the export was requested, not when it finished.
    pub fn begin(&self) -> Result<UniqueId, CommitError> {
        let id = UniqueId::generate();
        self.queue.start_insertion(&id)?;
        Ok(id)
    }

    /// Commit `collection` according to `mode`.
    ///
    /// Returns every collection committed by this call. A queued save may
    /// return collections of other producers and, when not coordinating,
    /// returns an empty group. On error a dangling pending insertion for
    /// `collection.id` is removed before the error is returned.
    pub fn save(
        &self,
        collection: FileCollection,
        mode: CommitMode,
    ) -> Result<FileCollectionGroup, CommitError> {
        let id = collection.id.clone();
        let result = match mode {
            CommitMode::Direct => self
                .commit_collection(collection, false)
                .map(FileCollectionGroup::single),
            CommitMode::Queued { coordinate } => self
                .queue
                .finish_insertion(&collection)
                .and_then(|()| {
                    if coordinate {
                        self.drain()
                    } else {
                        Ok(FileCollectionGroup::new())
                    }
                }),
        };
        if let Err(err) = &result {
            tracing::warn!(id = %id, error = %err, "save failed; cleaning up queue insertion");
            self.queue.delete_pending_insertion(&id);
        }
        result
    }

    /// Abandon a producer step started with [`begin`](Self::begin).
    pub fn abort(&self, id: &UniqueId) {
        self.queue.delete_pending_insertion(id);
    }

    /// Acquire the output lock and commit every queued entry in id order.
    pub fn drain(&self) -> Result<FileCollectionGroup, CommitError> {
        let mut lock = self.output_lock();
        lock.acquire(self.output_wait)?;
        let result = self.drain_locked(&mut lock);
        if let Err(err) = lock.release() {
            tracing::warn!(error = %err, "failed to release output lock");
        }
        result
    }

    /// Drain while the caller already holds the output lock.
    pub fn drain_locked(&self, lock: &mut NamedLock) -> Result<FileCollectionGroup, CommitError> {
        let mut group = FileCollectionGroup::new();
        while let Some(entry) = self.queue.pull()? {
            let last_committed = self.control.last_committed()?;
            if self.queue.is_stale(&entry, &last_committed) {
                tracing::warn!(
                    id = %entry.id,
                    pending = !entry.is_done(),
                    last_committed = %last_committed,
                    "discarding stale queue entry",
                );
                self.queue.remove(&entry);
                continue;
            }

            let EntryState::Done(collection) = &entry.state else {
                tracing::debug!(id = %entry.id, "head of queue still pending; waiting");
                sleep(self.poll_interval);
                continue;
            };

            match self.commit_collection(collection.clone(), true) {
                Ok(committed) => {
                    self.queue.remove(&entry);
                    group.push(committed);
                }
                Err(err) if err.is_invalid_input() => {
                    // Would fail the same way on every retry and block the queue.
                    self.queue.remove(&entry);
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
            lock.renew()?;
        }
        Ok(group)
    }

    /// Apply every item of `collection` and record the outcome.
    ///
    /// All targets are validated before anything is written. `locked` is
    /// `true` when the caller holds the output lock; only then are the
    /// control files and the changes log updated.
    pub fn commit_collection(
        &self,
        mut collection: FileCollection,
        locked: bool,
    ) -> Result<FileCollection, CommitError> {
        for item in &collection.items {
            validate_target(&item.path)?;
        }

        for item in collection.items.iter_mut() {
            let started = Instant::now();
            item.executed = match item.operation {
                Operation::Write => write_item(item)?,
                Operation::Delete => delete_item(&item.path)?,
            };
            item.elapsed += started.elapsed();
            self.control.append_commit_log(&audit_line(&collection.id, item));
        }

        if locked {
            self.control.set_last_committed(&collection.id)?;
            if collection.any_executed() {
                self.control.set_last_executed(Audience::Preview, &collection.id)?;
                if collection.executed_items().any(|item| item.status.affects_live()) {
                    self.control.set_last_executed(Audience::Live, &collection.id)?;
                }
                self.changes.append(&collection);
            }
        }

        tracing::info!(
            id = %collection.id,
            items = collection.items.len(),
            executed = collection.executed_items().count(),
            "committed collection",
        );
        Ok(collection)
    }
}

// ---------------------------------------------------------------------------
// Per-item operations
// ---------------------------------------------------------------------------

fn validate_target(path: &Path) -> Result<(), CommitError> {
    if !path.is_absolute() {
        return Err(CommitError::RelativePath {
            path: path.to_path_buf(),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CommitError::PathTraversal {
            path: path.to_path_buf(),
        });
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() || meta.file_type().is_symlink() => {
            Err(CommitError::InvalidTarget {
                path: path.to_path_buf(),
            })
        }
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Returns `false` when the target already holds identical bytes.
fn write_item(item: &FileItem) -> Result<bool, CommitError> {
    if !item.force && matches_on_disk(&item.path, &item.content)? {
        tracing::debug!("unchanged: {}", item.path.display());
        return Ok(false);
    }
    if let Some(parent) = item.path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(&item.path, &item.content).map_err(|e| io_err(&item.path, e))?;
    tracing::debug!("wrote: {}", item.path.display());
    Ok(true)
}

fn matches_on_disk(path: &Path, content: &[u8]) -> Result<bool, CommitError> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() != content.len() as u64 => return Ok(false),
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(path, err)),
    }
    let existing = fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(digest(&existing) == digest(content))
}

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Returns `false` when there was nothing to delete.
fn delete_item(path: &Path) -> Result<bool, CommitError> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("deleted: {}", path.display());
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

/// `<id> <operation> <executed|skipped> <micros>us <path>`
fn audit_line(id: &UniqueId, item: &FileItem) -> String {
    format!(
        "{} {} {} {}us {}",
        id,
        item.operation,
        if item.executed { "executed" } else { "skipped" },
        item.elapsed.as_micros(),
        item.path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use folio_core::PublishStatus;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Settings, DiskCommitWriter) {
        let base = TempDir::new().unwrap();
        let mut settings = Settings::for_base(base.path());
        settings.queue.poll_interval_ms = 10;
        settings.locks.retry_interval_ms = 10;
        let writer = DiskCommitWriter::new(&settings);
        (base, settings, writer)
    }

    fn single(settings: &Settings, name: &str, content: &str) -> FileCollection {
        FileCollection::with_items(
            UniqueId::generate(),
            vec![FileItem::write(settings.data_dir().join(name), content)],
        )
    }

    #[test]
    fn identical_write_is_skipped_without_touching_mtime() {
        let (_base, settings, writer) = setup();
        let target = settings.data_dir().join("page.html");

        let first = writer
            .save(single(&settings, "page.html", "hello"), CommitMode::Direct)
            .unwrap();
        assert_eq!(first.executed_count(), 1);

        let old = FileTime::from_unix_time(1_000_000_000, 0);
        set_file_mtime(&target, old).unwrap();

        let second = writer
            .save(single(&settings, "page.html", "hello"), CommitMode::Direct)
            .unwrap();
        assert_eq!(second.executed_count(), 0);
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&target).unwrap());
        assert_eq!(mtime, old);

        let third = writer
            .save(single(&settings, "page.html", "hello, world"), CommitMode::Direct)
            .unwrap();
        assert_eq!(third.executed_count(), 1);
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello, world");
    }

    #[test]
    fn forced_write_always_executes() {
        let (_base, settings, writer) = setup();
        writer
            .save(single(&settings, "a.txt", "x"), CommitMode::Direct)
            .unwrap();
        let mut forced = single(&settings, "a.txt", "x");
        forced.items[0].force = true;
        let group = writer.save(forced, CommitMode::Direct).unwrap();
        assert_eq!(group.executed_count(), 1);
    }

    #[test]
    fn delete_of_missing_file_is_skipped() {
        let (_base, settings, writer) = setup();
        let target = settings.data_dir().join("gone.html");
        let collection =
            FileCollection::with_items(UniqueId::generate(), vec![FileItem::delete(&target)]);
        let group = writer.save(collection, CommitMode::Direct).unwrap();
        assert_eq!(group.skipped_count(), 1);

        fs::create_dir_all(settings.data_dir()).unwrap();
        fs::write(&target, "bye").unwrap();
        let collection =
            FileCollection::with_items(UniqueId::generate(), vec![FileItem::delete(&target)]);
        let group = writer.save(collection, CommitMode::Direct).unwrap();
        assert_eq!(group.executed_count(), 1);
        assert!(!target.exists());
    }

    #[test]
    fn unsafe_targets_are_rejected_before_any_write() {
        let (_base, settings, writer) = setup();
        let ok = settings.data_dir().join("ok.html");
        let traversal = settings.data_dir().join("..").join("escape.html");
        let collection = FileCollection::with_items(
            UniqueId::generate(),
            vec![FileItem::write(&ok, "ok"), FileItem::write(&traversal, "no")],
        );
        let err = writer.save(collection, CommitMode::Direct).unwrap_err();
        assert!(matches!(err, CommitError::PathTraversal { .. }));
        assert!(!ok.exists());

        let relative = FileCollection::with_items(
            UniqueId::generate(),
            vec![FileItem::write("relative/x.html", "no")],
        );
        let err = writer.save(relative, CommitMode::Direct).unwrap_err();
        assert!(matches!(err, CommitError::RelativePath { .. }));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn directory_target_is_rejected() {
        let (_base, settings, writer) = setup();
        let dir = settings.data_dir().join("section");
        fs::create_dir_all(&dir).unwrap();
        let collection =
            FileCollection::with_items(UniqueId::generate(), vec![FileItem::write(&dir, "x")]);
        let err = writer.save(collection, CommitMode::Direct).unwrap_err();
        assert!(matches!(err, CommitError::InvalidTarget { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn symlink_target_is_rejected() {
        let (_base, settings, writer) = setup();
        fs::create_dir_all(settings.data_dir()).unwrap();
        let real = settings.data_dir().join("real.html");
        let link = settings.data_dir().join("link.html");
        fs::write(&real, "real").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let collection =
            FileCollection::with_items(UniqueId::generate(), vec![FileItem::delete(&link)]);
        let err = writer.save(collection, CommitMode::Direct).unwrap_err();
        assert!(matches!(err, CommitError::InvalidTarget { .. }));
        assert!(link.exists());
    }

    #[test]
    fn direct_mode_leaves_control_files_alone() {
        let (_base, settings, writer) = setup();
        writer
            .save(single(&settings, "a.html", "a"), CommitMode::Direct)
            .unwrap();
        assert_eq!(writer.control().last_committed().unwrap(), UniqueId::default());
        assert!(writer.changes().read_all().unwrap().is_empty());
        assert_eq!(writer.control().read_commit_log().unwrap().len(), 1);
    }

    #[test]
    fn queued_save_records_control_files() {
        let (_base, settings, writer) = setup();
        let id = writer.begin().unwrap();
        let collection = FileCollection::with_items(
            id.clone(),
            vec![FileItem::write(settings.data_dir().join("a.html"), "a").with_entity_id("node:1")],
        );
        let group = writer.save(collection, CommitMode::default()).unwrap();

        assert_eq!(group.ids(), vec![&id]);
        assert_eq!(writer.control().last_committed().unwrap(), id);
        assert_eq!(writer.control().last_executed(Audience::Live).unwrap(), id);
        assert_eq!(writer.control().last_executed(Audience::Preview).unwrap(), id);
        let changes = writer.changes().read_all().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].entity_id.as_deref(), Some("node:1"));
        assert!(writer.queue().pull().unwrap().is_none());
    }

    #[test]
    fn preview_only_change_does_not_bump_live() {
        let (_base, settings, writer) = setup();
        let draft = FileItem::write(settings.data_dir().join("draft.html"), "draft")
            .with_status(PublishStatus::new(false, Some(false)));
        let collection = FileCollection::with_items(UniqueId::generate(), vec![draft]);
        let id = collection.id.clone();
        writer.save(collection, CommitMode::default()).unwrap();

        assert_eq!(writer.control().last_executed(Audience::Preview).unwrap(), id);
        assert_eq!(writer.control().last_executed(Audience::Live).unwrap(), UniqueId::default());
    }

    #[test]
    fn skipped_commit_only_bumps_last_committed() {
        let (_base, settings, writer) = setup();
        let first = single(&settings, "same.html", "same");
        let first_id = first.id.clone();
        writer.save(first, CommitMode::default()).unwrap();

        let second = single(&settings, "same.html", "same");
        let second_id = second.id.clone();
        writer.save(second, CommitMode::default()).unwrap();

        assert_eq!(writer.control().last_committed().unwrap(), second_id);
        assert_eq!(writer.control().last_executed(Audience::Live).unwrap(), first_id);
    }

    #[test]
    fn non_coordinating_save_leaves_entry_for_the_next_drain() {
        let (_base, settings, writer) = setup();
        let collection = single(&settings, "later.html", "later");
        let id = collection.id.clone();
        let group = writer
            .save(collection, CommitMode::Queued { coordinate: false })
            .unwrap();
        assert!(group.is_empty());
        assert!(writer.queue().done_path(&id).exists());

        let drained = writer.drain().unwrap();
        assert!(drained.contains(&id));
        assert!(settings.data_dir().join("later.html").exists());
    }

    #[test]
    fn superseded_entry_is_discarded_not_applied() {
        let (_base, settings, writer) = setup();
        let old = single(&settings, "page.html", "old");
        std::thread::sleep(Duration::from_millis(2));
        let new = single(&settings, "page.html", "new");

        writer.save(new, CommitMode::default()).unwrap();
        let group = writer.save(old, CommitMode::default()).unwrap();

        assert!(group.is_empty());
        assert_eq!(
            fs::read_to_string(settings.data_dir().join("page.html")).unwrap(),
            "new"
        );
    }

    #[test]
    fn failed_save_removes_pending_insertion() {
        let (_base, _settings, writer) = setup();
        let id = writer.begin().unwrap();
        let bad = FileCollection::with_items(id.clone(), vec![FileItem::write("relative", "x")]);
        assert!(writer.save(bad, CommitMode::Direct).is_err());
        assert!(!writer.queue().pending_path(&id).exists());
    }

    #[test]
    fn invalid_queued_entry_is_dropped_from_queue() {
        let (_base, _settings, writer) = setup();
        let bad =
            FileCollection::with_items(UniqueId::generate(), vec![FileItem::write("rel", "x")]);
        let err = writer.save(bad, CommitMode::default()).unwrap_err();
        assert!(err.is_invalid_input());
        assert!(writer.queue().pull().unwrap().is_none());
    }

    #[test]
    fn audit_line_format() {
        let id: UniqueId = "2024-01-02_03-04-05.000006__0007".parse().unwrap();
        let mut item = FileItem::write("/srv/out/a.html", "a");
        item.executed = true;
        item.elapsed = Duration::from_micros(42);
        assert_eq!(
            audit_line(&id, &item),
            "2024-01-02_03-04-05.000006__0007 write executed 42us /srv/out/a.html"
        );
    }
}
