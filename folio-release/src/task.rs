//! Per-release task status.
//!
//! A task's state lives in `.metadata/tasks/<name>`; a missing file means
//! `pending`. `done` and `failed` are terminal and never overwritten.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use folio_core::UniqueId;

use crate::error::{io_err, ReleaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Started,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Started => "started",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskState::Pending),
            "started" => Some(TaskState::Started),
            "done" => Some(TaskState::Done),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle on one named task of one release. Cheap to clone; all state is on
/// disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    release: UniqueId,
    name: String,
    path: PathBuf,
}

impl Task {
    pub(crate) fn new(release: UniqueId, name: &str, tasks_dir: &Path) -> Self {
        Self {
            release,
            name: name.to_string(),
            path: tasks_dir.join(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release_id(&self) -> &UniqueId {
        &self.release
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> Result<TaskState, ReleaseError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(TaskState::Pending),
            Err(err) => return Err(io_err(&self.path, err)),
        };
        let value = contents.trim();
        TaskState::parse(value).ok_or_else(|| ReleaseError::UnknownTaskState {
            path: self.path.clone(),
            value: value.to_string(),
        })
    }

    /// Returns `false` if the task had already finished.
    pub fn set_started(&self) -> Result<bool, ReleaseError> {
        self.transition(TaskState::Started)
    }

    pub fn set_done(&self) -> Result<bool, ReleaseError> {
        self.transition(TaskState::Done)
    }

    pub fn set_failed(&self) -> Result<bool, ReleaseError> {
        self.transition(TaskState::Failed)
    }

    pub fn is_started(&self) -> Result<bool, ReleaseError> {
        Ok(self.state()? == TaskState::Started)
    }

    pub fn is_done(&self) -> Result<bool, ReleaseError> {
        Ok(self.state()? == TaskState::Done)
    }

    pub fn is_failed(&self) -> Result<bool, ReleaseError> {
        Ok(self.state()? == TaskState::Failed)
    }

    fn transition(&self, next: TaskState) -> Result<bool, ReleaseError> {
        let current = self.state()?;
        if current.is_terminal() {
            tracing::debug!(
                release = %self.release,
                task = %self.name,
                state = %current,
                requested = %next,
                "task already finished; ignoring transition",
            );
            return Ok(false);
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        fs::write(&self.path, format!("{next}\n")).map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(release = %self.release, task = %self.name, state = %next, "task state changed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn task(dir: &TempDir) -> Task {
        Task::new(UniqueId::generate(), "build", &dir.path().join("tasks"))
    }

    #[test]
    fn missing_file_is_pending() {
        let dir = TempDir::new().unwrap();
        assert_eq!(task(&dir).state().unwrap(), TaskState::Pending);
    }

    #[test]
    fn started_then_done() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        assert!(task.set_started().unwrap());
        assert!(task.is_started().unwrap());
        assert!(task.set_done().unwrap());
        assert!(task.is_done().unwrap());
        assert!(!task.is_started().unwrap());
    }

    #[rstest]
    #[case::done(TaskState::Done)]
    #[case::failed(TaskState::Failed)]
    fn terminal_states_stick(#[case] terminal: TaskState) {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        task.transition(terminal).unwrap();

        assert!(!task.set_started().unwrap());
        assert!(!task.set_done().unwrap());
        assert!(!task.set_failed().unwrap());
        assert_eq!(task.state().unwrap(), terminal);
    }

    #[test]
    fn unknown_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        fs::create_dir_all(task.path().parent().unwrap()).unwrap();
        fs::write(task.path(), "finished\n").unwrap();
        assert!(matches!(
            task.state().unwrap_err(),
            ReleaseError::UnknownTaskState { .. }
        ));
    }
}
