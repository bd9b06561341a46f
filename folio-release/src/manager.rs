//! Release lifecycle: create, publish, prune, roll back.
//!
//! ## Publish protocol
//!
//! 1. Already current → success, nothing to do.
//! 2. Release directory missing or task not `done` → `InvariantViolation`.
//! 3. Create a fresh symlink `<base>/.current.<pid>.<seq>.tmp -> releases/<id>`.
//! 4. Rename it over `<base>/current` (atomic on POSIX, so `current` always
//!    resolves to either the old or the new release).
//! 5. Read the link back; `false` if it does not name `id`.

use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use folio_core::UniqueId;

use crate::error::{io_err, ReleaseError};
use crate::release::Release;
use crate::task::TaskState;

pub const RELEASES_DIR: &str = "releases";
pub const CURRENT_LINK: &str = "current";

// Distinguishes temporary links of concurrent publishers in one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct ReleaseManager {
    base_dir: PathBuf,
    cache: Mutex<HashMap<UniqueId, Release>>,
}

impl ReleaseManager {
    /// A manager rooted at `base`, with `releases/` created.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, ReleaseError> {
        let mut manager = Self {
            base_dir: PathBuf::new(),
            cache: Mutex::new(HashMap::new()),
        };
        manager.init(&base.into())?;
        Ok(manager)
    }

    /// Ensure `<base>/releases` exists. Switching to another base drops every
    /// cached release handle.
    pub fn init(&mut self, base: &Path) -> Result<(), ReleaseError> {
        if self.base_dir.as_path() != base {
            self.base_dir = base.to_path_buf();
            self.cache_mut().clear();
        }
        let releases = self.releases_dir();
        fs::create_dir_all(&releases).map_err(|e| io_err(&releases, e))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.base_dir.join(RELEASES_DIR)
    }

    pub fn current_link(&self) -> PathBuf {
        self.base_dir.join(CURRENT_LINK)
    }

    /// Handle for release `id`. Does not touch the disk.
    pub fn create(&self, id: &UniqueId) -> Release {
        let releases = self.releases_dir();
        self.cache_mut()
            .entry(id.clone())
            .or_insert_with(|| Release::new(id.clone(), &releases))
            .clone()
    }

    /// Create the release directory, its metadata directories and id file.
    pub fn create_release_dir(&self, release: &Release) -> Result<(), ReleaseError> {
        let creation = |path: &Path, source: io::Error| ReleaseError::ReleaseCreation {
            id: release.id().clone(),
            path: path.to_path_buf(),
            source,
        };
        let releases = self.releases_dir();
        fs::create_dir_all(&releases).map_err(|e| creation(&releases, e))?;
        fs::create_dir(release.dir()).map_err(|e| creation(release.dir(), e))?;
        let tasks = release.tasks_dir();
        fs::create_dir_all(&tasks).map_err(|e| creation(&tasks, e))?;
        let id_file = release.id_file();
        fs::write(&id_file, format!("{}\n", release.id())).map_err(|e| creation(&id_file, e))?;
        tracing::info!(release = %release.id(), dir = %release.dir().display(), "created release");
        Ok(())
    }

    pub fn exists(&self, id: &UniqueId) -> bool {
        self.releases_dir().join(id.as_str()).is_dir()
    }

    /// Every release directory, newest first.
    pub fn all_releases(&self) -> Result<Vec<Release>, ReleaseError> {
        let dir = self.releases_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Ok(id) = entry.file_name().to_string_lossy().parse::<UniqueId>() {
                ids.push(id);
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids.iter().map(|id| self.create(id)).collect())
    }

    pub fn latest_release(&self) -> Result<Option<Release>, ReleaseError> {
        Ok(self.all_releases()?.into_iter().next())
    }

    /// Newest release whose `task` is `done`.
    pub fn latest_done_release(&self, task: &str) -> Result<Option<Release>, ReleaseError> {
        for release in self.all_releases()? {
            if release.task(task).is_done()? {
                return Ok(Some(release));
            }
        }
        Ok(None)
    }

    /// Id named by the `current` link, if there is one.
    pub fn current_id(&self) -> Result<Option<UniqueId>, ReleaseError> {
        let link = self.current_link();
        let target = match fs::read_link(&link) {
            Ok(target) => target,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&link, err)),
        };
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.parse::<UniqueId>() {
            Ok(id) => Ok(Some(id)),
            Err(err) => {
                tracing::warn!(target = %target.display(), error = %err, "current link names no release");
                Ok(None)
            }
        }
    }

    pub fn current_release(&self) -> Result<Option<Release>, ReleaseError> {
        Ok(self.current_id()?.map(|id| self.create(&id)))
    }

    /// Make `id` the current release once its `task` is `done`.
    pub fn publish(&self, id: &UniqueId, task: &str) -> Result<bool, ReleaseError> {
        if self.current_id()?.as_ref() == Some(id) {
            tracing::debug!(release = %id, "release already current");
            return Ok(true);
        }

        let release = self.create(id);
        if !release.exists() {
            return Err(ReleaseError::InvariantViolation {
                id: id.clone(),
                reason: format!("release directory {} does not exist", release.dir().display()),
            });
        }
        let state = release.task(task).state()?;
        if state != TaskState::Done {
            return Err(ReleaseError::InvariantViolation {
                id: id.clone(),
                reason: format!("task '{task}' is {state}, not done"),
            });
        }

        let link = self.current_link();
        let tmp = self
            .base_dir
            .join(format!(
                ".{CURRENT_LINK}.{}.{}.tmp",
                std::process::id(),
                TMP_SEQ.fetch_add(1, Ordering::Relaxed)
            ));
        remove_link(&tmp)?;
        let target = Path::new(RELEASES_DIR).join(id.as_str());
        symlink_dir(&target, &tmp).map_err(|e| io_err(&tmp, e))?;
        if let Err(err) = fs::rename(&tmp, &link) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&link, err));
        }

        if self.current_id()?.as_ref() != Some(id) {
            tracing::warn!(release = %id, "current link does not name the published release");
            return Ok(false);
        }
        tracing::info!(release = %id, "published release");
        Ok(true)
    }

    /// Remove release `id`. The current release can never be deleted.
    pub fn delete(&self, id: &UniqueId) -> Result<(), ReleaseError> {
        if self.current_id()?.as_ref() == Some(id) {
            return Err(ReleaseError::CannotDeleteCurrentRelease { id: id.clone() });
        }
        let dir = self.releases_dir().join(id.as_str());
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&dir, err)),
        }
        self.cache_mut().remove(id);
        tracing::info!(release = %id, "deleted release");
        Ok(())
    }

    /// Delete every release beyond the newest `retention`, sparing the
    /// current one. Returns the deleted ids.
    pub fn delete_old_releases(&self, retention: usize) -> Result<Vec<UniqueId>, ReleaseError> {
        let mut deleted = Vec::new();
        for release in self.all_releases()?.into_iter().skip(retention) {
            match self.delete(release.id()) {
                Ok(()) => deleted.push(release.id().clone()),
                Err(ReleaseError::CannotDeleteCurrentRelease { id }) => {
                    tracing::debug!(release = %id, "keeping current release past retention");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }

    /// Publish the newest `done` release older than the current one.
    ///
    /// Without a current release, the newest `done` release is used. Returns
    /// the id now current, or `None` when there was nothing to roll back to.
    pub fn rollback(&self, task: &str) -> Result<Option<UniqueId>, ReleaseError> {
        let current = self.current_id()?;
        for release in self.all_releases()? {
            if current.as_ref().is_some_and(|c| release.id() >= c) {
                continue;
            }
            if !release.task(task).is_done()? {
                continue;
            }
            if self.publish(release.id(), task)? {
                tracing::warn!(
                    from = ?current.as_ref().map(UniqueId::as_str),
                    to = %release.id(),
                    "rolled back current release",
                );
                return Ok(Some(release.id().clone()));
            }
        }
        Ok(None)
    }

    fn cache_mut(&self) -> std::sync::MutexGuard<'_, HashMap<UniqueId, Release>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_link(path: &Path) -> Result<(), ReleaseError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
