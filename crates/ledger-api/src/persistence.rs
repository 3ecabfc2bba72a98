use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use contracts::{DecorationPatch, LedgerEntry};
use ledger_core::store::{apply_patch, new_entry_id};
use ledger_core::{LedgerStore, LedgerTx, StoreError};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use thiserror::Error;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1_500);

const ENTRY_COLUMNS: &str = "id, identity, display_name, total_amount, contribution_count,
    decoration_image, decoration_message, source_transaction_id, created_at, updated_at";

const RANK_ORDER: &str = "ORDER BY total_amount DESC, created_at ASC, seq ASC";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("sqlite connection mutex poisoned")]
    Poisoned,
    #[error("ledger entry not found: {0}")]
    NotFound(String),
    #[error("total overflows for entry {0}")]
    Overflow(String),
}

impl From<PersistenceError> for StoreError {
    fn from(value: PersistenceError) -> Self {
        match value {
            PersistenceError::Sqlite(rusqlite::Error::SqliteFailure(failure, detail))
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Conflict(detail.unwrap_or_else(|| failure.to_string()))
            }
            PersistenceError::NotFound(id) => StoreError::NotFound(id),
            PersistenceError::Overflow(id) => StoreError::Overflow(id),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Ledger store on a single SQLite file.
///
/// Writes run in `BEGIN IMMEDIATE` transactions, so writers are serialized across every
/// process that opens the same file. File-backed stores keep a second, read-only connection
/// so ranked reads see the last committed state through WAL without queueing behind a
/// writer that is waiting on the file lock.
#[derive(Debug)]
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl SqliteLedgerStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let mut store = Self {
            conn: Mutex::new(Connection::open(path)?),
            reader: None,
        };
        store.configure(busy_timeout, true)?;
        store.migrate()?;

        // Opened after migration so the schema and WAL mode already exist.
        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;
        store.reader = Some(Mutex::new(reader));
        Ok(store)
    }

    /// Single connection; reads share it with writes.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            reader: None,
        };
        store.configure(DEFAULT_BUSY_TIMEOUT, false)?;
        store.migrate()?;
        Ok(store)
    }

    pub fn consumed_transaction_count(&self) -> Result<u64, PersistenceError> {
        let conn = self.read()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM consumed_transactions", [], |row| {
                row.get(0)
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    fn read(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        match &self.reader {
            Some(reader) => reader.lock().map_err(|_| PersistenceError::Poisoned),
            None => self.lock(),
        }
    }

    fn configure(&self, busy_timeout: Duration, wal: bool) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.busy_timeout(busy_timeout)?;
        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                identity TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                total_amount INTEGER NOT NULL CHECK (total_amount >= 0),
                contribution_count INTEGER NOT NULL CHECK (contribution_count >= 0),
                decoration_image TEXT,
                decoration_message TEXT,
                source_transaction_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS consumed_transactions (
                external_transaction_id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                amount INTEGER NOT NULL,
                consumed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_entries_rank
                ON ledger_entries(total_amount DESC, created_at ASC, seq ASC);
            ",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![timestamp(Utc::now())],
        )?;

        Ok(())
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl SqliteTx<'_> {
    fn entry_by_identity(&self, identity: &str) -> Result<Option<LedgerEntry>, PersistenceError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE identity = ?1"),
                params![identity],
                row_to_entry,
            )
            .optional()?)
    }
}

impl LedgerTx for SqliteTx<'_> {
    fn consume_transaction(
        &mut self,
        external_id: &str,
        identity: &str,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO consumed_transactions (
                    external_transaction_id,
                    identity,
                    amount,
                    consumed_at
                 ) VALUES (?1, ?2, ?3, ?4)",
                params![external_id, identity, to_sql_amount(amount)?, timestamp(at)],
            )
            .map_err(PersistenceError::from)?;
        Ok(inserted == 1)
    }

    fn find_by_identity(&mut self, identity: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.entry_by_identity(identity)?)
    }

    fn upsert_accumulate(
        &mut self,
        identity: &str,
        delta: u64,
        display_name: &str,
        source_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        match self.entry_by_identity(identity)? {
            Some(existing) => {
                let total = existing
                    .total_amount
                    .checked_add(delta)
                    .ok_or_else(|| PersistenceError::Overflow(existing.id.clone()))?;
                self.conn
                    .execute(
                        "UPDATE ledger_entries
                         SET total_amount = ?2,
                             contribution_count = contribution_count + 1,
                             display_name = ?3,
                             source_transaction_id = ?4,
                             updated_at = ?5
                         WHERE id = ?1",
                        params![
                            existing.id,
                            to_sql_amount(total).map_err(|_| {
                                PersistenceError::Overflow(existing.id.clone())
                            })?,
                            display_name,
                            source_transaction_id,
                            timestamp(at),
                        ],
                    )
                    .map_err(PersistenceError::from)?;
            }
            None => {
                self.conn
                    .execute(
                        "INSERT INTO ledger_entries (
                            id,
                            identity,
                            display_name,
                            total_amount,
                            contribution_count,
                            source_transaction_id,
                            created_at,
                            updated_at
                         ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
                        params![
                            new_entry_id(),
                            identity,
                            display_name,
                            to_sql_amount(delta)?,
                            source_transaction_id,
                            timestamp(at),
                        ],
                    )
                    .map_err(PersistenceError::from)?;
            }
        }

        self.entry_by_identity(identity)?
            .ok_or_else(|| StoreError::NotFound(identity.to_string()))
    }

    fn find_max(&mut self) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries {RANK_ORDER} LIMIT 1"),
                [],
                row_to_entry,
            )
            .optional()
            .map_err(PersistenceError::from)?)
    }

    fn set_decoration(
        &mut self,
        entry_id: &str,
        image: Option<&str>,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self
            .conn
            .execute(
                "UPDATE ledger_entries
                 SET decoration_image = ?2, decoration_message = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![entry_id, image, message, timestamp(at)],
            )
            .map_err(PersistenceError::from)?;
        if updated == 0 {
            return Err(StoreError::NotFound(entry_id.to_string()));
        }
        Ok(())
    }

    fn clear_decoration_except(&mut self, entry_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute(
                "UPDATE ledger_entries
                 SET decoration_image = NULL, decoration_message = NULL
                 WHERE id != ?1
                   AND (decoration_image IS NOT NULL OR decoration_message IS NOT NULL)",
                params![entry_id],
            )
            .map_err(PersistenceError::from)?)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn transact<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistenceError::from)?;
        // Dropping `tx` on the error path rolls back.
        let result = f(&mut SqliteTx { conn: &tx })?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(result)
    }

    fn list_ranked(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let conn = self.read()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries {RANK_ORDER}"
            ))
            .map_err(PersistenceError::from)?;
        let rows = stmt
            .query_map([], row_to_entry)
            .map_err(PersistenceError::from)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(PersistenceError::from)?);
        }
        Ok(entries)
    }

    fn find_entry(&self, entry_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let conn = self.read()?;
        Ok(conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?1"),
                params![entry_id],
                row_to_entry,
            )
            .optional()
            .map_err(PersistenceError::from)?)
    }

    fn update_decoration(
        &self,
        entry_id: &str,
        patch: &DecorationPatch,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistenceError::from)?;
        let mut entry = tx
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?1"),
                params![entry_id],
                row_to_entry,
            )
            .optional()
            .map_err(PersistenceError::from)?
            .ok_or_else(|| PersistenceError::NotFound(entry_id.to_string()))?;

        apply_patch(&mut entry, patch, at);
        tx.execute(
            "UPDATE ledger_entries
             SET decoration_image = ?2, decoration_message = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                entry.id,
                entry.decoration_image,
                entry.decoration_message,
                timestamp(at),
            ],
        )
        .map_err(PersistenceError::from)?;
        tx.commit().map_err(PersistenceError::from)?;

        // Re-read so the returned timestamps carry the stored precision.
        drop(conn);
        self.find_entry(entry_id)?
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    fn clear_all(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistenceError::from)?;
        let removed = tx
            .execute("DELETE FROM ledger_entries", [])
            .map_err(PersistenceError::from)?;
        tx.execute("DELETE FROM consumed_transactions", [])
            .map_err(PersistenceError::from)?;
        tx.commit().map_err(PersistenceError::from)?;
        Ok(removed)
    }

    fn insert_entries(&self, entries: &[LedgerEntry]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistenceError::from)?;
        for entry in entries {
            tx.execute(
                "INSERT INTO ledger_entries (
                    id,
                    identity,
                    display_name,
                    total_amount,
                    contribution_count,
                    decoration_image,
                    decoration_message,
                    source_transaction_id,
                    created_at,
                    updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.id,
                    entry.identity,
                    entry.display_name,
                    to_sql_amount(entry.total_amount)?,
                    to_sql_amount(entry.contribution_count)?,
                    entry.decoration_image,
                    entry.decoration_message,
                    entry.source_transaction_id,
                    timestamp(entry.created_at),
                    timestamp(entry.updated_at),
                ],
            )
            .map_err(PersistenceError::from)?;
        }
        tx.commit().map_err(PersistenceError::from)?;
        Ok(entries.len())
    }
}

fn to_sql_amount(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Overflow(value.to_string()))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn to_u64(idx: usize, value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err)))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        identity: row.get(1)?,
        display_name: row.get(2)?,
        total_amount: to_u64(3, row.get(3)?)?,
        contribution_count: to_u64(4, row.get(4)?)?,
        decoration_image: row.get(5)?,
        decoration_message: row.get(6)?,
        source_transaction_id: row.get(7)?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}
