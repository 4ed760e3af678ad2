//! Source collections: where documents come from.
//!
//! The engine only ever reads from a [`SourceCollection`]. Listing returns
//! lightweight [`SourceEntry`] metadata; content is fetched per document with
//! [`SourceCollection::read`] so that one unreadable document can be skipped
//! without failing the whole run.
//!
//! # Architecture
//!
//! * [`fs`]: markdown files under one or more named directory roots.
//! * [`memory`]: an in-memory collection used by tests and embedders.

pub mod fs;
pub mod memory;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use fs::FsCollection;
pub use memory::MemoryCollection;

/// Identifier of a source document, unique across collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable topic identifier. At most one canonical document exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicKey(String);

impl TopicKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a topic key from free text (a file stem, a heading).
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self(slugify(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Metadata for a listed document, without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: DocId,
    /// Source collection (tier) the document belongs to.
    pub collection: String,
    pub topic_key: TopicKey,
    pub modified: DateTime<Utc>,
}

/// A source document with its raw content.
///
/// Immutable once read: a new content version arrives as a new `Document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub collection: String,
    pub topic_key: TopicKey,
    /// Raw content, including any frontmatter block.
    pub content: String,
    pub modified: DateTime<Utc>,
}

impl Document {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        topic_key: impl Into<String>,
        content: impl Into<String>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocId::new(id),
            collection: collection.into(),
            topic_key: TopicKey::new(topic_key),
            content: content.into(),
            modified,
        }
    }

    /// Assemble a document from listing metadata and freshly read content.
    #[must_use]
    pub fn from_entry(entry: SourceEntry, content: String) -> Self {
        Self {
            id: entry.id,
            collection: entry.collection,
            topic_key: entry.topic_key,
            content,
            modified: entry.modified,
        }
    }

    /// Content without the leading frontmatter block.
    #[must_use]
    pub fn body(&self) -> &str {
        split_frontmatter(&self.content).1
    }

    #[must_use]
    pub fn entry(&self) -> SourceEntry {
        SourceEntry {
            id: self.id.clone(),
            collection: self.collection.clone(),
            topic_key: self.topic_key.clone(),
            modified: self.modified,
        }
    }
}

/// Errors that abort listing a collection.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// A collection root does not exist.
    #[error("Collection root not found: {0}")]
    RootNotFound(PathBuf),

    /// The collection could not be enumerated.
    #[error("Failed to list collection {collection}: {message}")]
    ListFailed {
        /// Collection name
        collection: String,
        /// Error message
        message: String,
    },
}

/// Errors reading a single document. Never fatal for a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The document disappeared between listing and reading.
    #[error("Document not found: {0}")]
    NotFound(DocId),

    /// The read did not complete in time.
    #[error("Timed out reading {0}")]
    Timeout(DocId),

    /// Any other I/O failure.
    #[error("I/O error for {id}: {message}")]
    Io {
        /// Document that failed
        id: DocId,
        /// Error message
        message: String,
    },
}

/// External, read-only document source.
pub trait SourceCollection: Send + Sync {
    /// List documents modified at or after `since` (all documents when `None`).
    fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceEntry>, SourceError>;

    /// Read the raw content of one document.
    fn read(&self, id: &DocId) -> Result<String, ReadError>;
}

/// Split a leading `---` frontmatter block from the body.
///
/// Returns `(frontmatter, body)`; the frontmatter excludes the fence lines.
#[must_use]
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    (None, content)
}

/// Look up a `key: value` line in a frontmatter block.
#[must_use]
pub fn frontmatter_value<'a>(front: &'a str, key: &str) -> Option<&'a str> {
    front.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() == key {
            let v = v.trim().trim_matches(|c| c == '"' || c == '\'');
            (!v.is_empty()).then_some(v)
        } else {
            None
        }
    })
}

/// Lowercase, alphanumeric-and-dash form of `text`.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
