//! File-based commit queue.
//!
//! ## Entry lifecycle
//!
//! 1. `start_insertion`: empty marker `queue/<id>.pending`.
//! 2. `finish_insertion`: payload written into the marker, then renamed to
//!    `queue/<id>` (atomic on POSIX; readers never see a half-written entry).
//! 3. The draining writer commits the entry and removes it.
//!
//! File names are unique ids, so a lexical sort of the directory listing is
//! the order exports were requested in. The queue has no lock of its own.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use folio_core::{FileCollection, UniqueId};

use crate::error::{queue_err, CommitError};

pub const PENDING_SUFFIX: &str = ".pending";

/// State of an entry at the time it was pulled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Still being written by its producer.
    Pending { age: Duration },
    /// Finished and deserialized.
    Done(FileCollection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: UniqueId,
    pub path: PathBuf,
    pub state: EntryState,
}

impl QueueEntry {
    pub fn is_done(&self) -> bool {
        matches!(self.state, EntryState::Done(_))
    }
}

/// Cheap view of an entry for status output; payloads are not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueListing {
    pub id: UniqueId,
    pub pending: bool,
    pub age: Duration,
}

#[derive(Debug, Clone)]
pub struct CommitQueue {
    dir: PathBuf,
    insertion_timeout: Duration,
}

impl CommitQueue {
    pub fn new(dir: impl Into<PathBuf>, insertion_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            insertion_timeout,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn insertion_timeout(&self) -> Duration {
        self.insertion_timeout
    }

    pub fn pending_path(&self, id: &UniqueId) -> PathBuf {
        self.dir.join(format!("{id}{PENDING_SUFFIX}"))
    }

    pub fn done_path(&self, id: &UniqueId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Reserve `id`'s place in the queue with an empty pending marker.
    pub fn start_insertion(&self, id: &UniqueId) -> Result<(), CommitError> {
        fs::create_dir_all(&self.dir).map_err(|e| queue_err(&self.dir, e))?;
        let pending = self.pending_path(id);
        fs::write(&pending, b"").map_err(|e| queue_err(&pending, e))?;
        tracing::debug!(id = %id, "queue insertion started");
        Ok(())
    }

    /// Write the collection's payload and publish it by dropping the
    /// `.pending` suffix.
    pub fn finish_insertion(&self, collection: &FileCollection) -> Result<(), CommitError> {
        let payload = serde_json::to_vec(collection)?;
        fs::create_dir_all(&self.dir).map_err(|e| queue_err(&self.dir, e))?;
        let pending = self.pending_path(&collection.id);
        let done = self.done_path(&collection.id);
        fs::write(&pending, payload).map_err(|e| queue_err(&pending, e))?;
        fs::rename(&pending, &done).map_err(|e| queue_err(&done, e))?;
        tracing::debug!(id = %collection.id, "queue insertion finished");
        Ok(())
    }

    /// The first readable entry in id order, or `None` when the queue is
    /// empty.
    ///
    /// Files that disappear between listing and reading (a pending marker
    /// renamed by its producer, an entry consumed by another drainer) are
    /// skipped. A finished entry that does not deserialize is an error.
    pub fn pull(&self) -> Result<Option<QueueEntry>, CommitError> {
        let now = SystemTime::now();
        for (id, pending, path) in self.scan()? {
            if pending {
                let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(queue_err(&path, err)),
                };
                let age = now.duration_since(modified).unwrap_or_default();
                return Ok(Some(QueueEntry {
                    id,
                    path,
                    state: EntryState::Pending { age },
                }));
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(queue_err(&path, err)),
            };
            let collection: FileCollection = serde_json::from_slice(&bytes)
                .map_err(|source| CommitError::CorruptQueueEntry {
                    path: path.clone(),
                    source,
                })?;
            return Ok(Some(QueueEntry {
                id,
                path,
                state: EntryState::Done(collection),
            }));
        }
        Ok(None)
    }

    /// Every entry currently on disk, in id order.
    pub fn list(&self) -> Result<Vec<QueueListing>, CommitError> {
        let now = SystemTime::now();
        let mut listings = Vec::new();
        for (id, pending, path) in self.scan()? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(queue_err(&path, err)),
            };
            listings.push(QueueListing {
                id,
                pending,
                age: now.duration_since(modified).unwrap_or_default(),
            });
        }
        Ok(listings)
    }

    /// Whether `entry` must be discarded instead of committed.
    ///
    /// - done: its timestamp is strictly older than the last committed id's,
    ///   so applying it now would overwrite newer output;
    /// - pending: its producer has not finished within the insertion
    ///   timeout and is presumed dead.
    pub fn is_stale(&self, entry: &QueueEntry, last_committed: &UniqueId) -> bool {
        match &entry.state {
            EntryState::Done(_) => entry.id.timestamp() < last_committed.timestamp(),
            EntryState::Pending { age } => *age > self.insertion_timeout,
        }
    }

    /// Remove a pulled entry. Best-effort.
    pub fn remove(&self, entry: &QueueEntry) {
        remove_quietly(&entry.path);
    }

    /// Remove `id`'s pending marker, if any. Best-effort; used on error paths.
    pub fn delete_pending_insertion(&self, id: &UniqueId) {
        remove_quietly(&self.pending_path(id));
    }

    fn scan(&self) -> Result<Vec<(UniqueId, bool, PathBuf)>, CommitError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(queue_err(&self.dir, err)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| queue_err(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let (raw_id, pending) = match name.strip_suffix(PENDING_SUFFIX) {
                Some(raw) => (raw.to_string(), true),
                None => (name.clone(), false),
            };
            let Ok(id) = raw_id.parse::<UniqueId>() else {
                tracing::debug!(file = %name, "ignoring foreign file in commit queue");
                continue;
            };
            found.push((name, id, pending, entry.path()));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found
            .into_iter()
            .map(|(_, id, pending, path)| (id, pending, path))
            .collect())
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove queue entry")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use filetime::{set_file_mtime, FileTime};
    use folio_core::FileItem;
    use tempfile::TempDir;

    fn queue(dir: &TempDir) -> CommitQueue {
        CommitQueue::new(dir.path().join("queue"), Duration::from_secs(20))
    }

    fn ids(n: usize) -> Vec<UniqueId> {
        let base = Utc::now();
        (0..n)
            .map(|i| UniqueId::with_suffix(base + ChronoDuration::milliseconds(i as i64), 0))
            .collect()
    }

    fn collection(id: &UniqueId) -> FileCollection {
        FileCollection::with_items(id.clone(), vec![FileItem::write("/srv/data/a.html", "a")])
    }

    #[test]
    fn empty_or_missing_queue_pulls_nothing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(queue(&dir).pull().unwrap(), None);
    }

    #[test]
    fn start_then_finish_renames_marker() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let id = UniqueId::generate();

        queue.start_insertion(&id).unwrap();
        assert!(queue.pending_path(&id).exists());
        let pulled = queue.pull().unwrap().unwrap();
        assert!(matches!(pulled.state, EntryState::Pending { .. }));

        queue.finish_insertion(&collection(&id)).unwrap();
        assert!(!queue.pending_path(&id).exists());
        let pulled = queue.pull().unwrap().unwrap();
        assert_eq!(pulled.state, EntryState::Done(collection(&id)));
    }

    #[test]
    fn pull_returns_lowest_id_first() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let ids = ids(3);
        queue.finish_insertion(&collection(&ids[2])).unwrap();
        queue.finish_insertion(&collection(&ids[0])).unwrap();
        queue.start_insertion(&ids[1]).unwrap();

        let head = queue.pull().unwrap().unwrap();
        assert_eq!(head.id, ids[0]);
        queue.remove(&head);

        let head = queue.pull().unwrap().unwrap();
        assert_eq!(head.id, ids[1]);
        assert!(!head.is_done());

        let listed: Vec<_> = queue.list().unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(listed, vec![ids[1].clone(), ids[2].clone()]);
    }

    #[test]
    fn corrupt_done_entry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let id = UniqueId::generate();
        fs::create_dir_all(queue.dir()).unwrap();
        fs::write(queue.done_path(&id), b"{ not json").unwrap();
        let err = queue.pull().unwrap_err();
        assert!(matches!(err, CommitError::CorruptQueueEntry { .. }));
    }

    #[test]
    fn foreign_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        fs::create_dir_all(queue.dir()).unwrap();
        fs::write(queue.dir().join(".DS_Store"), b"").unwrap();
        assert_eq!(queue.pull().unwrap(), None);
    }

    #[test]
    fn done_entry_older_than_last_commit_is_stale() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let ids = ids(2);
        queue.finish_insertion(&collection(&ids[0])).unwrap();
        let entry = queue.pull().unwrap().unwrap();

        assert!(queue.is_stale(&entry, &ids[1]));
        assert!(!queue.is_stale(&entry, &ids[0]));
        assert!(!queue.is_stale(&entry, &UniqueId::default()));
    }

    #[test]
    fn same_instant_with_other_suffix_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let now = Utc::now();
        let entry_id = UniqueId::with_suffix(now, 1);
        queue.finish_insertion(&collection(&entry_id)).unwrap();
        let entry = queue.pull().unwrap().unwrap();
        assert!(!queue.is_stale(&entry, &UniqueId::with_suffix(now, 9)));
    }

    #[test]
    fn pending_entry_is_stale_after_insertion_timeout() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let id = UniqueId::generate();
        queue.start_insertion(&id).unwrap();

        let fresh = queue.pull().unwrap().unwrap();
        assert!(!queue.is_stale(&fresh, &UniqueId::default()));

        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(21));
        set_file_mtime(queue.pending_path(&id), old).unwrap();
        let abandoned = queue.pull().unwrap().unwrap();
        assert!(queue.is_stale(&abandoned, &UniqueId::default()));
    }

    #[test]
    fn delete_pending_insertion_never_fails() {
        let dir = TempDir::new().unwrap();
        let queue = queue(&dir);
        let id = UniqueId::generate();
        queue.delete_pending_insertion(&id);
        queue.start_insertion(&id).unwrap();
        queue.delete_pending_insertion(&id);
        assert!(!queue.pending_path(&id).exists());
    }

    #[test]
    #[cfg(unix)]
    fn start_insertion_reports_queue_io() {
        let dir = TempDir::new().unwrap();
        // A regular file where the queue directory should be.
        fs::write(dir.path().join("queue"), b"").unwrap();
        let err = queue(&dir).start_insertion(&UniqueId::generate()).unwrap_err();
        assert!(matches!(err, CommitError::QueueIo { .. }));
    }
}
