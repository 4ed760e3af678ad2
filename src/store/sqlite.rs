//! SQLite-backed registry.
//!
//! Schema:
//!
//! | table       | key          | value                         |
//! |-------------|--------------|-------------------------------|
//! | `meta`      | `key`        | `version`, `watermark`        |
//! | `canonical` | `topic_key`  | `CanonicalDocument` as JSON   |
//! | `ledger`    | `doc_id`     | `LedgerEntry` as JSON         |
//! | `runs`      | `seq`        | `RunReport` as JSON           |
//!
//! Every commit runs in one `IMMEDIATE` transaction: the version check and
//! all writes either land together or not at all, and a second process
//! committing at the same time waits for the lock, then sees the new version.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{
    CanonicalStore, CommitBatch, LedgerEntry, LedgerUpdate, RegistrySnapshot, StoreError,
};
use crate::source::{DocId, TopicKey};
use crate::sync::RunReport;
use crate::synthesis::CanonicalDocument;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS canonical (
    topic_key TEXT PRIMARY KEY,
    document TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS ledger (
    doc_id TEXT PRIMARY KEY,
    entry TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    report TEXT NOT NULL
);
"#;

/// How long a writer waits for another process's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry persisted in a SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        log::debug!("Opening registry at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?)
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn read_version(conn: &Connection) -> Result<u64, StoreError> {
    match read_meta(conn, "version")? {
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("version '{v}' is not a number"))),
        None => Ok(0),
    }
}

fn read_watermark(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
    read_meta(conn, "watermark")?
        .map(|w| {
            DateTime::parse_from_rfc3339(&w)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| StoreError::Corrupt(format!("watermark '{w}' is not RFC 3339")))
        })
        .transpose()
}

fn write_document(conn: &Connection, doc: &CanonicalDocument) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO canonical (topic_key, document) VALUES (?1, ?2)
         ON CONFLICT(topic_key) DO UPDATE SET document = excluded.document",
        params![doc.topic_key.as_str(), serde_json::to_string(doc)?],
    )?;
    Ok(())
}

fn write_ledger_entry(conn: &Connection, id: &DocId, entry: &LedgerEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ledger (doc_id, entry) VALUES (?1, ?2)
         ON CONFLICT(doc_id) DO UPDATE SET entry = excluded.entry",
        params![id.as_str(), serde_json::to_string(entry)?],
    )?;
    Ok(())
}

fn read_pairs(conn: &Connection, sql: &str) -> Result<Vec<(String, String)>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn read_snapshot(conn: &Connection) -> Result<RegistrySnapshot, StoreError> {
    let mut snapshot = RegistrySnapshot {
        version: read_version(conn)?,
        watermark: read_watermark(conn)?,
        ..RegistrySnapshot::default()
    };
    for (topic, json) in read_pairs(conn, "SELECT topic_key, document FROM canonical")? {
        snapshot
            .entries
            .insert(TopicKey::new(topic), serde_json::from_str(&json)?);
    }
    for (id, json) in read_pairs(conn, "SELECT doc_id, entry FROM ledger")? {
        snapshot.ledger.insert(DocId::new(id), serde_json::from_str(&json)?);
    }
    Ok(snapshot)
}

impl CanonicalStore for SqliteStore {
    fn get(&self, topic: &TopicKey) -> Result<Option<CanonicalDocument>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT document FROM canonical WHERE topic_key = ?1",
                params![topic.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    fn upsert(&self, doc: CanonicalDocument) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let version = read_version(&tx)? + 1;
        write_document(&tx, &doc)?;
        write_meta(&tx, "version", &version.to_string())?;
        tx.commit()?;
        Ok(version)
    }

    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError> {
        let mut conn = self.lock()?;
        // A read transaction keeps the snapshot consistent across tables.
        let tx = conn.transaction()?;
        let snapshot = read_snapshot(&tx)?;
        tx.finish()?;
        Ok(snapshot)
    }

    fn commit(&self, batch: CommitBatch) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual = read_version(&tx)?;
        if actual != batch.base_version {
            // Dropping the transaction rolls it back.
            return Err(StoreError::VersionConflict {
                expected: batch.base_version,
                actual,
            });
        }

        for doc in &batch.changes {
            write_document(&tx, doc)?;
        }
        let ledger_len = match &batch.ledger {
            LedgerUpdate::Replace(ledger) => {
                tx.execute("DELETE FROM ledger", [])?;
                for (id, entry) in ledger {
                    write_ledger_entry(&tx, id, entry)?;
                }
                ledger.len()
            }
            LedgerUpdate::Merge(updates) => {
                for (id, entry) in updates {
                    write_ledger_entry(&tx, id, entry)?;
                }
                updates.len()
            }
        };

        let watermark = read_watermark(&tx)?.max(batch.watermark);
        if let Some(watermark) = watermark {
            write_meta(&tx, "watermark", &watermark.to_rfc3339())?;
        }
        let version = actual + 1;
        write_meta(&tx, "version", &version.to_string())?;
        tx.commit()?;

        log::debug!(
            "Committed {} change(s) ({} ledger) at version {version}",
            batch.changes.len(),
            ledger_len
        );
        Ok(version)
    }

    fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, report) VALUES (?1, ?2)",
            params![report.run_id, serde_json::to_string(report)?],
        )?;
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunReport>, StoreError> {
        let conn = self.lock()?;
        read_pairs(&conn, "SELECT run_id, report FROM runs ORDER BY seq")?
            .into_iter()
            .map(|(_, json)| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }
}
