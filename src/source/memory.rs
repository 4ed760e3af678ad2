//! In-memory source collection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{DocId, Document, ReadError, SourceCollection, SourceEntry, SourceError};

/// A mutable, thread-safe collection held in memory.
///
/// Reads for selected ids can be made to fail, which is how tests exercise
/// the skip-and-continue path.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    docs: RwLock<BTreeMap<DocId, Document>>,
    failing: RwLock<BTreeSet<DocId>>,
    reads: AtomicUsize,
}

impl MemoryCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from documents.
    #[must_use]
    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let collection = Self::new();
        for doc in docs {
            collection.insert(doc);
        }
        collection
    }

    /// Insert or replace a document.
    pub fn insert(&self, doc: Document) {
        if let Ok(mut docs) = self.docs.write() {
            docs.insert(doc.id.clone(), doc);
        }
    }

    /// Remove a document, returning it if present.
    pub fn remove(&self, id: &DocId) -> Option<Document> {
        self.docs.write().ok()?.remove(id)
    }

    /// Make every read of `id` fail with a timeout.
    pub fn fail_reads_for(&self, id: impl Into<DocId>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(id.into());
        }
    }

    /// Number of successful or failed `read` calls so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SourceCollection for MemoryCollection {
    fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<SourceEntry>, SourceError> {
        let docs = self.docs.read().map_err(|_| SourceError::ListFailed {
            collection: "memory".to_string(),
            message: "lock poisoned".to_string(),
        })?;
        Ok(docs
            .values()
            .filter(|d| since.is_none_or(|since| d.modified >= since))
            .map(Document::entry)
            .collect())
    }

    fn read(&self, id: &DocId) -> Result<String, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing.read().map_err(|_| ReadError::Io {
            id: id.clone(),
            message: "lock poisoned".to_string(),
        })?;
        if failing.contains(id) {
            return Err(ReadError::Timeout(id.clone()));
        }

        let docs = self.docs.read().map_err(|_| ReadError::Io {
            id: id.clone(),
            message: "lock poisoned".to_string(),
        })?;
        docs.get(id)
            .map(|d| d.content.clone())
            .ok_or_else(|| ReadError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(id: &str, day: u32) -> Document {
        Document::new(
            id,
            "action",
            id,
            format!("content of {id}"),
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_list_since_is_inclusive() {
        let collection = MemoryCollection::with_documents([doc("a", 1), doc("b", 2), doc("c", 3)]);
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let ids: Vec<_> = collection
            .list(Some(since))
            .unwrap()
            .into_iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_failing_reads() {
        let collection = MemoryCollection::with_documents([doc("a", 1)]);
        collection.fail_reads_for("a");
        assert_eq!(
            collection.read(&DocId::from("a")),
            Err(ReadError::Timeout(DocId::from("a")))
        );
        assert_eq!(collection.read_count(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let collection = MemoryCollection::new();
        collection.insert(doc("a", 1));
        let mut updated = doc("a", 2);
        updated.content = "new".to_string();
        collection.insert(updated);

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.read(&DocId::from("a")).unwrap(), "new");
    }
}
