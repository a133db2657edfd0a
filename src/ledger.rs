//! Persistent hash ledger with change-history semantics.
//!
//! The ledger owns record storage exclusively: one row per tracked file,
//! keyed by canonical path. Every observation flows through [`HashLedger::reconcile`],
//! which compares the observed digest against the stored one and yields a
//! [`Transition`]. The shift of `current_hash` into `previous_hash` is a
//! compare-and-swap against the digest that was read, so two concurrent
//! observations of the same path serialize cleanly instead of losing an
//! update.
//!
//! Storage is SQLite via sqlx, WAL journal mode, with a busy timeout to ride
//! out writer contention.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

use crate::hasher::Digest;

/// Maximum pooled connections against the ledger database.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during ledger operations.
///
/// A ledger error is fatal to the affected operation only; callers log it and
/// rely on the next scan or event to repair the record.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The storage backend failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored digest could not be decoded.
    #[error("corrupt digest in ledger for {path}: {value}")]
    CorruptDigest { path: String, value: String },
}

/// One row per monitored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Base name of the file. Not assumed unique on its own.
    pub filename: String,

    /// Canonical absolute path; the identity key.
    pub path: String,

    /// Digest of the most recently observed content.
    pub current_hash: Digest,

    /// Digest observed immediately before `current_hash`; `None` until the
    /// file has been observed with two different contents.
    pub previous_hash: Option<Digest>,

    /// Timestamp of the most recent reconciliation that mutated this record.
    pub last_observed_at: DateTime<Utc>,
}

/// The outcome of reconciling an observed digest against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The path was previously unknown; a record was inserted.
    Created,

    /// The observed digest matches the stored one; nothing was mutated.
    Unchanged,

    /// The content changed; `current_hash` was shifted into `previous_hash`.
    Modified {
        /// Digest the ledger held before this observation.
        old: Digest,
        /// Digest now stored as current.
        new: Digest,
    },
}

/// Persistent store of one [`FileRecord`] per tracked file.
///
/// Cheap to clone; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct HashLedger {
    pool: SqlitePool,
}

impl HashLedger {
    /// Opens (creating if missing) the ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the database cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;

        info!(path = %path.display(), "Hash ledger opened");
        Ok(ledger)
    }

    /// Opens an in-memory ledger, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the in-memory database cannot be
    /// initialized.
    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        // A single connection keeps every operation on the same in-memory
        // database.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                current_hash TEXT NOT NULL,
                previous_hash TEXT,
                last_observed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_files_last_observed_at
             ON files (last_observed_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks up the record for a canonical path.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or a corrupt stored digest.
    pub async fn lookup(&self, path: &str) -> Result<Option<FileRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT filename, path, current_hash, previous_hash, last_observed_at
             FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Reconciles an observed digest against the stored record for `path`.
    ///
    /// - No record: inserts one with `previous_hash = NULL`, returns
    ///   [`Transition::Created`].
    /// - Digest matches the stored `current_hash`: returns
    ///   [`Transition::Unchanged`] without mutating anything.
    /// - Digest differs: shifts `current_hash` into `previous_hash`, stores
    ///   the new digest, refreshes the timestamp, returns
    ///   [`Transition::Modified`].
    ///
    /// Concurrent reconciliations of the same path serialize through a
    /// compare-and-swap on `current_hash`: the shift into `previous_hash`
    /// only lands when the stored digest is still the one that was read, so
    /// interleaved writers retry instead of losing an update. Duplicate
    /// deliveries of an unchanged observation are absorbed as `Unchanged`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or a corrupt stored digest.
    pub async fn reconcile(
        &self,
        filename: &str,
        path: &str,
        observed: &Digest,
    ) -> Result<Transition, LedgerError> {
        let observed_hex = observed.to_hex();

        loop {
            let now = Utc::now();

            let inserted = sqlx::query(
                "INSERT INTO files (path, filename, current_hash, previous_hash, last_observed_at)
                 VALUES (?, ?, ?, NULL, ?)
                 ON CONFLICT(path) DO NOTHING",
            )
            .bind(path)
            .bind(filename)
            .bind(&observed_hex)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                debug!(path, hash = %observed.short(), "Ledger record created");
                return Ok(Transition::Created);
            }

            let Some(stored_hex) = sqlx::query_scalar::<_, String>(
                "SELECT current_hash FROM files WHERE path = ?",
            )
            .bind(path)
            .fetch_optional(&self.pool)
            .await?
            else {
                // Removed between the insert attempt and the read; retry.
                continue;
            };

            if stored_hex == observed_hex {
                // No-op observation: leave previous_hash and the timestamp
                // alone.
                return Ok(Transition::Unchanged);
            }

            let updated = sqlx::query(
                "UPDATE files
                 SET previous_hash = current_hash,
                     current_hash = ?,
                     filename = ?,
                     last_observed_at = ?
                 WHERE path = ? AND current_hash = ?",
            )
            .bind(&observed_hex)
            .bind(filename)
            .bind(now)
            .bind(path)
            .bind(&stored_hex)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                // Another observation won the slot since the read; retry
                // against the fresh state.
                continue;
            }

            let old = Digest::from_hex(&stored_hex).map_err(|_| LedgerError::CorruptDigest {
                path: path.to_string(),
                value: stored_hex,
            })?;

            debug!(path, old = %old.short(), new = %observed.short(), "Ledger record updated");
            return Ok(Transition::Modified {
                old,
                new: *observed,
            });
        }
    }

    /// Deletes the record for `path`, returning the record that existed.
    ///
    /// A no-op returning `None` when the path has no record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or a corrupt stored digest.
    pub async fn remove(&self, path: &str) -> Result<Option<FileRecord>, LedgerError> {
        let row = sqlx::query(
            "DELETE FROM files WHERE path = ?
             RETURNING filename, path, current_hash, previous_hash, last_observed_at",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Returns every record, most recently observed first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure or a corrupt stored digest.
    pub async fn list_all(&self) -> Result<Vec<FileRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT filename, path, current_hash, previous_hash, last_observed_at
             FROM files ORDER BY last_observed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Returns every tracked path, used by the scanner's deletion sweep.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] on storage failure.
    pub async fn list_paths(&self) -> Result<Vec<String>, LedgerError> {
        let paths = sqlx::query_scalar("SELECT path FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord, LedgerError> {
    let path: String = row.try_get("path")?;

    let current_raw: String = row.try_get("current_hash")?;
    let current_hash = parse_digest(&path, current_raw)?;

    let previous_hash = row
        .try_get::<Option<String>, _>("previous_hash")?
        .map(|raw| parse_digest(&path, raw))
        .transpose()?;

    Ok(FileRecord {
        filename: row.try_get("filename")?,
        path,
        current_hash,
        previous_hash,
        last_observed_at: row.try_get("last_observed_at")?,
    })
}

fn parse_digest(path: &str, raw: String) -> Result<Digest, LedgerError> {
    Digest::from_hex(&raw).map_err(|_| LedgerError::CorruptDigest {
        path: path.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::from_hex(&hex::encode([byte; 32])).unwrap()
    }

    #[tokio::test]
    async fn first_reconcile_creates_record() {
        let ledger = HashLedger::open_in_memory().await.unwrap();
        let d = digest(1);

        let transition = ledger.reconcile("a.txt", "/data/a.txt", &d).await.unwrap();
        assert_eq!(transition, Transition::Created);

        let record = ledger.lookup("/data/a.txt").await.unwrap().unwrap();
        assert_eq!(record.filename, "a.txt");
        assert_eq!(record.current_hash, d);
        assert_eq!(record.previous_hash, None);
    }

    #[tokio::test]
    async fn unchanged_observation_mutates_nothing() {
        let ledger = HashLedger::open_in_memory().await.unwrap();
        let d = digest(1);

        ledger.reconcile("a.txt", "/data/a.txt", &d).await.unwrap();
        let before = ledger.lookup("/data/a.txt").await.unwrap().unwrap();

        let transition = ledger.reconcile("a.txt", "/data/a.txt", &d).await.unwrap();
        assert_eq!(transition, Transition::Unchanged);

        let after = ledger.lookup("/data/a.txt").await.unwrap().unwrap();
        assert_eq!(after.previous_hash, None);
        assert_eq!(after.last_observed_at, before.last_observed_at);
    }

    #[tokio::test]
    async fn modified_observation_shifts_history() {
        let ledger = HashLedger::open_in_memory().await.unwrap();
        let d1 = digest(1);
        let d2 = digest(2);

        ledger.reconcile("a.txt", "/data/a.txt", &d1).await.unwrap();
        let transition = ledger.reconcile("a.txt", "/data/a.txt", &d2).await.unwrap();

        assert_eq!(transition, Transition::Modified { old: d1, new: d2 });

        let record = ledger.lookup("/data/a.txt").await.unwrap().unwrap();
        assert_eq!(record.current_hash, d2);
        assert_eq!(record.previous_hash, Some(d1));
    }

    #[tokio::test]
    async fn modified_refreshes_timestamp() {
        let ledger = HashLedger::open_in_memory().await.unwrap();

        ledger
            .reconcile("a.txt", "/data/a.txt", &digest(1))
            .await
            .unwrap();
        let before = ledger.lookup("/data/a.txt").await.unwrap().unwrap();

        ledger
            .reconcile("a.txt", "/data/a.txt", &digest(2))
            .await
            .unwrap();
        let after = ledger.lookup("/data/a.txt").await.unwrap().unwrap();

        assert!(after.last_observed_at >= before.last_observed_at);
    }

    #[tokio::test]
    async fn remove_absent_path_is_noop() {
        let ledger = HashLedger::open_in_memory().await.unwrap();
        assert!(ledger.remove("/data/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_returns_last_state() {
        let ledger = HashLedger::open_in_memory().await.unwrap();
        let d = digest(7);

        ledger.reconcile("a.txt", "/data/a.txt", &d).await.unwrap();
        let removed = ledger.remove("/data/a.txt").await.unwrap().unwrap();

        assert_eq!(removed.current_hash, d);
        assert!(ledger.lookup("/data/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_orders_by_recency() {
        let ledger = HashLedger::open_in_memory().await.unwrap();

        ledger
            .reconcile("a.txt", "/data/a.txt", &digest(1))
            .await
            .unwrap();
        ledger
            .reconcile("b.txt", "/data/b.txt", &digest(2))
            .await
            .unwrap();
        // Touching a.txt again makes it the most recently observed.
        ledger
            .reconcile("a.txt", "/data/a.txt", &digest(3))
            .await
            .unwrap();

        let records = ledger.list_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "/data/a.txt");
        assert_eq!(records[1].path, "/data/b.txt");
    }

    #[tokio::test]
    async fn list_paths_covers_every_record() {
        let ledger = HashLedger::open_in_memory().await.unwrap();

        ledger
            .reconcile("a.txt", "/data/a.txt", &digest(1))
            .await
            .unwrap();
        ledger
            .reconcile("b.txt", "/data/b.txt", &digest(2))
            .await
            .unwrap();

        let mut paths = ledger.list_paths().await.unwrap();
        paths.sort();
        assert_eq!(paths, vec!["/data/a.txt", "/data/b.txt"]);
    }

    #[tokio::test]
    async fn concurrent_reconciles_never_lose_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = HashLedger::open(&dir.path().join("ledger.db")).await.unwrap();

        let d0 = digest(0);
        let d1 = digest(1);
        let d2 = digest(2);

        ledger.reconcile("a.txt", "/data/a.txt", &d0).await.unwrap();

        let l1 = ledger.clone();
        let l2 = ledger.clone();
        let t1 = tokio::spawn(async move { l1.reconcile("a.txt", "/data/a.txt", &d1).await });
        let t2 = tokio::spawn(async move { l2.reconcile("a.txt", "/data/a.txt", &d2).await });

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();

        // Exactly one digest wins the current slot and the loser sits in
        // previous_hash: a valid serialization of the two writes.
        let record = ledger.lookup("/data/a.txt").await.unwrap().unwrap();
        let current = record.current_hash;
        let previous = record.previous_hash.unwrap();
        assert!(current == d1 || current == d2);
        assert!(previous == d1 || previous == d2);
        assert_ne!(current, previous);
    }
}
