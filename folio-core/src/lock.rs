//! Named locks shared between processes through the filesystem.
//!
//! A lock is a lease file at `<locks>/<name>.lock` holding JSON owner
//! metadata (`pid`, random `token`, `acquired_at`, `expires_at`). Reading and
//! claiming the lease happens under an `fs2` exclusive lock on a sibling
//! `<name>.lock.guard` file, so two processes can never both see the lease
//! as free. A lease past its `expires_at` is stale and may be taken over;
//! holders that run longer than their lease call [`NamedLock::renew`].
//!
//! A [`LeaseHandle`] lets another thread drop a lease it does not own, for
//! shutdown paths where the owning thread will never get to run `Drop`.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{lock_io, LockError};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Owner metadata persisted in the lease file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub name: String,
    pub pid: u32,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A named, lease-based lock. Dropping a held lock releases it.
#[derive(Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
    guard_path: PathBuf,
    lease: Duration,
    retry_interval: Duration,
    token: String,
    held: bool,
    revoked: Arc<AtomicBool>,
}

/// Detached view of one [`NamedLock`]'s lease.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    name: String,
    path: PathBuf,
    guard_path: PathBuf,
    token: String,
    revoked: Arc<AtomicBool>,
}

impl LeaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the lease if the originating lock still owns it. The lock can
    /// never claim or renew again afterwards. Returns whether a lease file
    /// was removed.
    pub fn revoke(&self) -> Result<bool, LockError> {
        self.revoked.store(true, Ordering::SeqCst);
        let removed = with_guard(&self.guard_path, || match read_lease(&self.path)? {
            Some(lease) if lease.token == self.token => match fs::remove_file(&self.path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
                Err(err) => Err(lock_io(&self.path, err)),
            },
            _ => Ok(false),
        })?;
        if removed {
            tracing::warn!(lock = %self.name, "lock lease revoked");
        }
        Ok(removed)
    }
}

impl NamedLock {
    /// A lock named `name` stored under `locks_dir`, leased for `lease` on
    /// every acquisition or renewal.
    pub fn new(locks_dir: &Path, name: &str, lease: Duration) -> Self {
        let path = locks_dir.join(format!("{name}.lock"));
        let guard_path = locks_dir.join(format!("{name}.lock.guard"));
        Self {
            name: name.to_string(),
            path,
            guard_path,
            lease,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            token: format!("{}-{:016x}", std::process::id(), rand::random::<u64>()),
            held: false,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Claim the lease once without waiting. Returns `false` when another
    /// owner holds an unexpired lease.
    pub fn try_acquire(&mut self) -> Result<bool, LockError> {
        let claimed = self.claim()?;
        self.held = claimed;
        if claimed {
            tracing::debug!(lock = %self.name, "lock acquired");
        }
        Ok(claimed)
    }

    /// Claim the lease, polling until `wait` elapses.
    pub fn acquire(&mut self, wait: Duration) -> Result<(), LockError> {
        let started = Instant::now();
        loop {
            if self.try_acquire()? {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Err(LockError::Timeout {
                    name: self.name.clone(),
                    waited: elapsed,
                });
            }
            sleep(self.retry_interval.min(wait - elapsed));
        }
    }

    /// Extend a held lease by a fresh `lease` interval.
    ///
    /// Fails with [`LockError::Lost`] if the lease expired and another owner
    /// took it over in the meantime.
    pub fn renew(&mut self) -> Result<(), LockError> {
        if self.claim()? {
            self.held = true;
            tracing::debug!(lock = %self.name, "lock renewed");
            Ok(())
        } else {
            self.held = false;
            Err(LockError::Lost {
                name: self.name.clone(),
            })
        }
    }

    /// Drop the lease if this lock still owns it.
    pub fn release(&mut self) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        with_guard(&self.guard_path, || {
            match read_lease(&self.path)? {
                Some(lease) if lease.token == self.token => match fs::remove_file(&self.path) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(lock_io(&self.path, err)),
                },
                _ => Ok(()),
            }
        })?;
        tracing::debug!(lock = %self.name, "lock released");
        Ok(())
    }

    pub fn handle(&self) -> LeaseHandle {
        LeaseHandle {
            name: self.name.clone(),
            path: self.path.clone(),
            guard_path: self.guard_path.clone(),
            token: self.token.clone(),
            revoked: Arc::clone(&self.revoked),
        }
    }

    /// Current lease owner, if any (expired leases included).
    pub fn holder(&self) -> Result<Option<LeaseInfo>, LockError> {
        read_lease(&self.path)
    }

    fn claim(&self) -> Result<bool, LockError> {
        if self.revoked.load(Ordering::SeqCst) {
            return Ok(false);
        }
        with_guard(&self.guard_path, || {
            let now = Utc::now();
            if let Some(existing) = read_lease(&self.path)? {
                if existing.token != self.token {
                    if !existing.is_expired(now) {
                        return Ok(false);
                    }
                    tracing::warn!(
                        lock = %self.name,
                        stale_pid = existing.pid,
                        expired_at = %existing.expires_at,
                        "taking over expired lock lease",
                    );
                }
            }

            let lease = chrono::Duration::from_std(self.lease)
                .unwrap_or_else(|_| chrono::Duration::days(365));
            let info = LeaseInfo {
                name: self.name.clone(),
                pid: std::process::id(),
                token: self.token.clone(),
                acquired_at: now,
                expires_at: now + lease,
            };
            write_lease(&self.path, &info)?;
            Ok(true)
        })
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(lock = %self.name, error = %err, "failed to release lock on drop");
        }
    }
}

fn with_guard<T>(
    guard_path: &Path,
    f: impl FnOnce() -> Result<T, LockError>,
) -> Result<T, LockError> {
    if let Some(dir) = guard_path.parent() {
        fs::create_dir_all(dir).map_err(|e| lock_io(dir, e))?;
    }
    let guard = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(guard_path)
        .map_err(|e| lock_io(guard_path, e))?;
    guard
        .lock_exclusive()
        .map_err(|e| lock_io(guard_path, e))?;
    let result = f();
    let _ = guard.unlock();
    result
}

fn read_lease(path: &Path) -> Result<Option<LeaseInfo>, LockError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(lock_io(path, err)),
    };
    // A torn or foreign lease file is treated as free rather than wedging
    // every future writer.
    match serde_json::from_str(&contents) {
        Ok(info) => Ok(Some(info)),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable lock lease");
            Ok(None)
        }
    }
}

fn write_lease(path: &Path, info: &LeaseInfo) -> Result<(), LockError> {
    let json = serde_json::to_string(info)?;
    let tmp = path.with_extension("lock.tmp");
    fs::write(&tmp, json).map_err(|e| lock_io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| lock_io(path, e))
}
