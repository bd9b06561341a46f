//! Append-only log of executed file operations.
//!
//! One line per executed item:
//!
//! ```text
//! <uniqueId> <operation> [ID: <entityId>] <label> | <absolutePath>
//! ```
//!
//! The build loop reads it back to answer "which paths changed since
//! release X". Items without an entity id are written as `[ID: -]`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use folio_core::{paths, FileCollection, Operation, UniqueId};

use crate::control::append_lines;
use crate::error::{io_err, CommitError};

/// One parsed line of the changes log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub id: UniqueId,
    pub operation: Operation,
    pub entity_id: Option<String>,
    pub label: String,
    pub path: PathBuf,
}

impl ChangeRecord {
    pub fn to_line(&self) -> String {
        let entity = self.entity_id.as_deref().unwrap_or("-");
        format!(
            "{} {} [ID: {}] {} | {}",
            self.id,
            self.operation,
            sanitize(entity),
            sanitize(&self.label),
            self.path.display()
        )
    }

    /// Parse one log line; `None` when it does not follow the format.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (id, rest) = line.split_once(' ')?;
        let id: UniqueId = id.parse().ok()?;
        let (operation, rest) = rest.split_once(' ')?;
        let operation = match operation {
            "write" => Operation::Write,
            "delete" => Operation::Delete,
            _ => return None,
        };
        let rest = rest.strip_prefix("[ID: ")?;
        let (entity, rest) = rest.split_once("] ")?;
        let (label, path) = rest.split_once(" | ")?;
        Some(Self {
            id,
            operation,
            entity_id: (entity != "-").then(|| entity.to_string()),
            label: label.to_string(),
            path: PathBuf::from(path),
        })
    }
}

// Labels and entity ids are free text; keep them on one line and free of the
// field separators.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '|' | ']' => ' ',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
}

impl ChangeLog {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: paths::changes_log_path(work_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per executed item of `collection`. Never fails.
    pub fn append(&self, collection: &FileCollection) {
        let lines: Vec<String> = collection
            .executed_items()
            .map(|item| {
                ChangeRecord {
                    id: collection.id.clone(),
                    operation: item.operation,
                    entity_id: item.entity_id.clone(),
                    label: item.label.clone(),
                    path: item.path.clone(),
                }
                .to_line()
            })
            .collect();
        append_lines(&self.path, lines.iter().map(String::as_str));
    }

    /// Every well-formed record, in log order. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<ChangeRecord>, CommitError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&self.path, err)),
        };
        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match ChangeRecord::parse_line(line) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    "skipping malformed changes log line",
                ),
            }
        }
        Ok(records)
    }

    /// Records committed strictly after `id`.
    pub fn since(&self, id: &UniqueId) -> Result<Vec<ChangeRecord>, CommitError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| &record.id > id)
            .collect())
    }

    /// Distinct paths changed strictly after `id`, sorted.
    pub fn changed_paths_since(&self, id: &UniqueId) -> Result<Vec<PathBuf>, CommitError> {
        let mut paths: Vec<PathBuf> = self.since(id)?.into_iter().map(|r| r.path).collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::FileItem;
    use tempfile::TempDir;

    fn executed(item: FileItem) -> FileItem {
        FileItem {
            executed: true,
            ..item
        }
    }

    #[test]
    fn line_format_matches_contract() {
        let record = ChangeRecord {
            id: "2024-05-01_10-00-00.000001__0042".parse().unwrap(),
            operation: Operation::Write,
            entity_id: Some("node:12".to_string()),
            label: "About us".to_string(),
            path: PathBuf::from("/srv/data/about/index.html"),
        };
        let line = record.to_line();
        assert_eq!(
            line,
            "2024-05-01_10-00-00.000001__0042 write [ID: node:12] About us | /srv/data/about/index.html"
        );
        assert_eq!(ChangeRecord::parse_line(&line), Some(record));
    }

    #[test]
    fn missing_entity_id_roundtrips_as_dash() {
        let record = ChangeRecord {
            id: UniqueId::generate(),
            operation: Operation::Delete,
            entity_id: None,
            label: "a | b".to_string(),
            path: PathBuf::from("/srv/data/x.json"),
        };
        let parsed = ChangeRecord::parse_line(&record.to_line()).unwrap();
        assert_eq!(parsed.entity_id, None);
        assert_eq!(parsed.label, "a   b");
        assert_eq!(parsed.path, record.path);
    }

    #[test]
    fn only_executed_items_are_logged_and_since_filters_by_id() {
        let work = TempDir::new().unwrap();
        let log = ChangeLog::new(work.path());

        let first = FileCollection::with_items(
            UniqueId::generate(),
            vec![
                executed(FileItem::write("/srv/data/a.html", "a")),
                FileItem::write("/srv/data/skipped.html", "s"),
            ],
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = FileCollection::with_items(
            UniqueId::generate(),
            vec![executed(FileItem::delete("/srv/data/b.html"))],
        );
        log.append(&first);
        log.append(&second);
        fs::write(
            log.path(),
            format!("{}garbage line\n", fs::read_to_string(log.path()).unwrap()),
        )
        .unwrap();

        assert_eq!(log.read_all().unwrap().len(), 2);
        let since_first = log.since(&first.id).unwrap();
        assert_eq!(since_first.len(), 1);
        assert_eq!(since_first[0].operation, Operation::Delete);
        assert_eq!(
            log.changed_paths_since(&UniqueId::default()).unwrap(),
            vec![PathBuf::from("/srv/data/a.html"), PathBuf::from("/srv/data/b.html")]
        );
    }
}
