//! The file-operation model handed from exporters to the commit writer.
//!
//! A [`FileCollection`] is one export's worth of [`FileItem`]s sharing a
//! [`UniqueId`]. Collections are serialized into the commit queue as JSON;
//! item content is carried as base64 so binary payloads survive.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::UniqueId;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A single file mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => write!(f, "write"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Which audience a change is visible to.
///
/// Preview sees every change; live only sees changes to published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Live,
    Preview,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Live => write!(f, "live"),
            Audience::Preview => write!(f, "preview"),
        }
    }
}

impl std::str::FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Audience::Live),
            "preview" => Ok(Audience::Preview),
            other => Err(format!("unknown audience '{other}'; expected: live, preview")),
        }
    }
}

// ---------------------------------------------------------------------------
// Publish status
// ---------------------------------------------------------------------------

/// Published flags of the entity behind a file, before and after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStatus {
    /// Whether the entity is published after the change.
    pub published: bool,
    /// Whether the previous version was published; `None` when the entity
    /// has no previous version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_published: Option<bool>,
}

impl Default for PublishStatus {
    fn default() -> Self {
        Self {
            published: true,
            was_published: None,
        }
    }
}

impl PublishStatus {
    pub fn new(published: bool, was_published: Option<bool>) -> Self {
        Self {
            published,
            was_published,
        }
    }

    /// A change is visible to the live audience if the entity is published
    /// now or was published before (unpublishing removes live content).
    ///
    /// An entity without a previous version counts as unchanged in status,
    /// so only its current flag decides.
    pub fn affects_live(&self) -> bool {
        self.published || self.was_published.unwrap_or(self.published)
    }

    pub fn is_preview_only(&self) -> bool {
        !self.affects_live()
    }
}

// ---------------------------------------------------------------------------
// FileItem
// ---------------------------------------------------------------------------

/// One pending write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub operation: Operation,
    /// Absolute target path.
    pub path: PathBuf,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<u8>,
    /// Identifier of the exported entity, for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Human-readable label, for logs.
    #[serde(default)]
    pub label: String,
    /// Write even when the target already holds identical bytes.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub status: PublishStatus,
    /// Set by the commit writer: `false` means the operation was a no-op.
    #[serde(default)]
    pub executed: bool,
    /// Time the export (and later the commit) of this item took.
    #[serde(default)]
    pub elapsed: Duration,
}

impl FileItem {
    pub fn write(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(Operation::Write, path.into(), content.into())
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(Operation::Delete, path.into(), Vec::new())
    }

    fn new(operation: Operation, path: PathBuf, content: Vec<u8>) -> Self {
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            operation,
            path,
            content,
            entity_id: None,
            label,
            force: false,
            status: PublishStatus::default(),
            executed: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: PublishStatus) -> Self {
        self.status = status;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_preview_only(&self) -> bool {
        self.status.is_preview_only()
    }
}

// ---------------------------------------------------------------------------
// FileCollection / FileCollectionGroup
// ---------------------------------------------------------------------------

/// The items of one export, committed together under one id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCollection {
    pub id: UniqueId,
    #[serde(default)]
    pub items: Vec<FileItem>,
}

impl FileCollection {
    pub fn new(id: UniqueId) -> Self {
        Self {
            id,
            items: Vec::new(),
        }
    }

    pub fn with_items(id: UniqueId, items: Vec<FileItem>) -> Self {
        Self { id, items }
    }

    pub fn push(&mut self, item: FileItem) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `true` iff every item is preview-only.
    pub fn is_preview_only(&self) -> bool {
        self.items.iter().all(FileItem::is_preview_only)
    }

    pub fn executed_items(&self) -> impl Iterator<Item = &FileItem> {
        self.items.iter().filter(|item| item.executed)
    }

    pub fn any_executed(&self) -> bool {
        self.items.iter().any(|item| item.executed)
    }
}

/// Every collection committed by one write call, in commit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCollectionGroup {
    collections: Vec<FileCollection>,
}

impl FileCollectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(collection: FileCollection) -> Self {
        Self {
            collections: vec![collection],
        }
    }

    pub fn push(&mut self, collection: FileCollection) {
        self.collections.push(collection);
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileCollection> {
        self.collections.iter()
    }

    pub fn ids(&self) -> Vec<&UniqueId> {
        self.collections.iter().map(|c| &c.id).collect()
    }

    pub fn contains(&self, id: &UniqueId) -> bool {
        self.collections.iter().any(|c| &c.id == id)
    }

    pub fn executed_count(&self) -> usize {
        self.collections
            .iter()
            .map(|c| c.executed_items().count())
            .sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.collections
            .iter()
            .map(|c| c.items.len() - c.executed_items().count())
            .sum()
    }
}

impl IntoIterator for FileCollectionGroup {
    type Item = FileCollection;
    type IntoIter = std::vec::IntoIter<FileCollection>;

    fn into_iter(self) -> Self::IntoIter {
        self.collections.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileCollectionGroup {
    type Item = &'a FileCollection;
    type IntoIter = std::slice::Iter<'a, FileCollection>;

    fn into_iter(self) -> Self::IntoIter {
        self.collections.iter()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, None, false)]
    #[case(false, None, true)]
    #[case(true, Some(false), false)]
    #[case(false, Some(true), false)]
    #[case(false, Some(false), true)]
    fn preview_only_classification(
        #[case] published: bool,
        #[case] was_published: Option<bool>,
        #[case] preview_only: bool,
    ) {
        let status = PublishStatus::new(published, was_published);
        assert_eq!(status.is_preview_only(), preview_only);
    }

    #[test]
    fn collection_is_preview_only_only_when_every_item_is() {
        let draft = PublishStatus::new(false, Some(false));
        let mut collection = FileCollection::new(UniqueId::generate());
        collection.push(FileItem::write("/srv/a.html", "a").with_status(draft));
        assert!(collection.is_preview_only());

        collection.push(FileItem::write("/srv/b.html", "b"));
        assert!(!collection.is_preview_only());
    }

    #[test]
    fn binary_content_survives_json() {
        let item = FileItem::write("/srv/logo.png", vec![0u8, 159, 146, 150, 255])
            .with_entity_id("node:7")
            .forced();
        let collection = FileCollection::with_items(UniqueId::generate(), vec![item]);
        let json = serde_json::to_string(&collection).expect("serialize");
        assert!(json.contains("\"content\":\"AJ+Slv8=\""), "got {json}");
        let back: FileCollection = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, collection);
    }

    #[test]
    fn label_defaults_to_file_name() {
        let item = FileItem::delete("/srv/blog/post.html");
        assert_eq!(item.label, "post.html");
        assert_eq!(item.operation.to_string(), "delete");
    }

    #[test]
    fn group_counts_executed_and_skipped() {
        let mut a = FileItem::write("/srv/a", "a");
        a.executed = true;
        let b = FileItem::write("/srv/b", "b");
        let collection = FileCollection::with_items(UniqueId::generate(), vec![a, b]);
        let group = FileCollectionGroup::single(collection.clone());
        assert_eq!(group.executed_count(), 1);
        assert_eq!(group.skipped_count(), 1);
        assert!(group.contains(&collection.id));
    }
}
