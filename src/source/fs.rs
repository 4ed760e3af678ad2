//! Markdown files under named directory roots.
//!
//! Each root is one source collection (e.g. `action=kb/action`,
//! `research=kb/research`). Document ids are `<collection>/<relative path>`
//! with forward slashes on every platform.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{
    frontmatter_value, split_frontmatter, DocId, ReadError, SourceCollection, SourceEntry,
    SourceError, TopicKey,
};

/// How much of a file is inspected for frontmatter while listing.
const FRONTMATTER_PROBE: u64 = 4096;

/// Filesystem-backed source collection.
#[derive(Debug, Clone, Default)]
pub struct FsCollection {
    roots: Vec<(String, PathBuf)>,
}

impl FsCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named root directory.
    #[must_use]
    pub fn with_root(mut self, collection: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.roots.push((collection.into(), path.into()));
        self
    }

    /// Parse a `name=path` root argument.
    pub fn parse_root(arg: &str) -> Option<(String, PathBuf)> {
        let (name, path) = arg.split_once('=')?;
        let name = name.trim();
        if name.is_empty() || path.is_empty() {
            return None;
        }
        Some((name.to_string(), PathBuf::from(path)))
    }

    fn resolve(&self, id: &DocId) -> Option<PathBuf> {
        let (collection, relative) = id.as_str().split_once('/')?;
        self.roots
            .iter()
            .find(|(name, _)| name == collection)
            .map(|(_, root)| root.join(relative))
    }

    fn entry_for(collection: &str, root: &Path, path: &Path) -> Option<SourceEntry> {
        let relative = path.strip_prefix(root).ok()?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let modified: DateTime<Utc> = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|e| {
                log::warn!("No modification time for {}: {}", path.display(), e);
                DateTime::<Utc>::UNIX_EPOCH
            });

        let topic_key = probe_topic(path).unwrap_or_else(|| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            TopicKey::from_text(&stem)
        });

        Some(SourceEntry {
            id: DocId::new(format!("{collection}/{relative}")),
            collection: collection.to_string(),
            topic_key,
            modified,
        })
    }
}

/// Read the head of a file and pull `topic:` out of its frontmatter.
fn probe_topic(path: &Path) -> Option<TopicKey> {
    let file = fs::File::open(path).ok()?;
    let mut bytes = Vec::new();
    file.take(FRONTMATTER_PROBE).read_to_end(&mut bytes).ok()?;
    // The cut may land inside a multi-byte character.
    let head = String::from_utf8_lossy(&bytes);
    let (front, _) = split_frontmatter(&head);
    frontmatter_value(front?, "topic").map(TopicKey::from_text)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

impl SourceCollection for FsCollection {
    fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceEntry>, SourceError> {
        let mut entries = Vec::new();

        for (collection, root) in &self.roots {
            if !root.is_dir() {
                return Err(SourceError::RootNotFound(root.clone()));
            }

            for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => {
                        log::warn!("Skipping unreadable path in {}: {}", collection, e);
                        continue;
                    }
                };
                if !item.file_type().is_file() || !is_markdown(item.path()) {
                    continue;
                }
                let Some(entry) = Self::entry_for(collection, root, item.path()) else {
                    continue;
                };
                if since.is_some_and(|since| entry.modified < since) {
                    continue;
                }
                log::trace!("Listed {}", entry.id);
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn read(&self, id: &DocId) -> Result<String, ReadError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| ReadError::NotFound(id.clone()))?;
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ReadError::NotFound(id.clone()),
            std::io::ErrorKind::TimedOut => ReadError::Timeout(id.clone()),
            _ => ReadError::Io {
                id: id.clone(),
                message: e.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(
            FsCollection::parse_root("action=kb/action"),
            Some(("action".to_string(), PathBuf::from("kb/action")))
        );
        assert_eq!(FsCollection::parse_root("no-equals"), None);
        assert_eq!(FsCollection::parse_root("=path"), None);
    }

    #[test]
    fn test_list_markdown_only() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "03-attack-prevention/Reentrancy.md", "# Reentrancy");
        write(dir.path(), "notes.txt", "ignored");

        let collection = FsCollection::new().with_root("action", dir.path());
        let entries = collection.list(None).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].id.as_str(),
            "action/03-attack-prevention/Reentrancy.md"
        );
        assert_eq!(entries[0].collection, "action");
        assert_eq!(entries[0].topic_key.as_str(), "reentrancy");
    }

    #[test]
    fn test_topic_from_frontmatter() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "deep-dive.md",
            "---\ntopic: Flash Loans\n---\n# Deep dive\n",
        );

        let collection = FsCollection::new().with_root("research", dir.path());
        let entries = collection.list(None).unwrap();
        assert_eq!(entries[0].topic_key.as_str(), "flash-loans");
    }

    #[test]
    fn test_topic_survives_split_character_at_probe_limit() {
        let dir = TempDir::new().unwrap();
        let front = "---\ntopic: Flash Loans\n---\n";
        let padding = "a".repeat(FRONTMATTER_PROBE as usize - 1 - front.len());
        let content = format!("{front}{padding}\u{e9} and more text\n");
        assert!(!content.is_char_boundary(FRONTMATTER_PROBE as usize));
        write(dir.path(), "fl.md", &content);

        let collection = FsCollection::new().with_root("research", dir.path());
        let entries = collection.list(None).unwrap();
        assert_eq!(entries[0].topic_key.as_str(), "flash-loans");
    }

    #[test]
    fn test_read_round_trip_and_missing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "alpha");
        let collection = FsCollection::new().with_root("action", dir.path());

        assert_eq!(collection.read(&DocId::from("action/a.md")).unwrap(), "alpha");
        assert!(matches!(
            collection.read(&DocId::from("action/missing.md")),
            Err(ReadError::NotFound(_))
        ));
        assert!(matches!(
            collection.read(&DocId::from("unknown/a.md")),
            Err(ReadError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_root_fails_listing() {
        let collection = FsCollection::new().with_root("action", "/definitely/not/here");
        assert!(matches!(
            collection.list(None),
            Err(SourceError::RootNotFound(_))
        ));
    }
}
