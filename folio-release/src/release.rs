use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use folio_core::UniqueId;

use crate::task::Task;

pub const METADATA_DIR: &str = ".metadata";
pub const TASKS_DIR: &str = "tasks";
pub const ID_FILE: &str = "id";

/// Handle on one release directory. Clones share the memoized task handles.
#[derive(Debug, Clone)]
pub struct Release {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: UniqueId,
    dir: PathBuf,
    tasks: Mutex<HashMap<String, Task>>,
}

impl Release {
    pub(crate) fn new(id: UniqueId, releases_dir: &Path) -> Self {
        let dir = releases_dir.join(id.as_str());
        Self {
            inner: Arc::new(Inner {
                id,
                dir,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> &UniqueId {
        &self.inner.id
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.inner.dir.join(METADATA_DIR)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.metadata_dir().join(TASKS_DIR)
    }

    pub fn id_file(&self) -> PathBuf {
        self.metadata_dir().join(ID_FILE)
    }

    pub fn exists(&self) -> bool {
        self.inner.dir.is_dir()
    }

    /// The task named `name`, created on first use.
    pub fn task(&self, name: &str) -> Task {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks
            .entry(name.to_string())
            .or_insert_with(|| Task::new(self.inner.id.clone(), name, &self.tasks_dir()))
            .clone()
    }

    /// `true` when both handles came from the same cache entry.
    pub fn same_handle(&self, other: &Release) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id && self.inner.dir == other.inner.dir
    }
}

impl Eq for Release {}
