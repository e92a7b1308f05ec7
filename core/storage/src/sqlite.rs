//! SQLite-backed store for records and the freshness ledger.
//!
//! The connection is wrapped in a `Mutex` because `rusqlite::Connection` is
//! not `Sync`; every statement runs on `spawn_blocking`. Transactions buffer
//! their operations and execute them inside one `BEGIN IMMEDIATE` on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use kanisync_common::{Error, FreshnessRecord, Record, ResourceType, Result, Timestamp};

use crate::store::{FreshnessLedger, TransactionalWriter, WriteTransaction};

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resource_last_update (
    resource_type TEXT PRIMARY KEY,
    data_updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS resource_records (
    resource_type TEXT NOT NULL,
    id INTEGER NOT NULL,
    updated_at INTEGER,
    payload TEXT NOT NULL,
    PRIMARY KEY (resource_type, id)
);
"#;

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn persistence(e: impl std::fmt::Display) -> Error {
    Error::Persistence(e.to_string())
}

fn from_millis(ms: i64) -> Result<Timestamp> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| Error::StoreUnavailable(format!("Corrupt timestamp in store: {}", ms)))
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(unavailable)?;

    if version > SCHEMA_VERSION {
        return Err(Error::StoreUnavailable(format!(
            "Database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(SCHEMA).map_err(unavailable)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(unavailable)?;
    Ok(())
}

/// SQLite implementation of the store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    /// Path to the database file (for log messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| {
                Error::StoreUnavailable(format!(
                    "Failed to open database at {}: {}",
                    path_clone.display(),
                    e
                ))
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(unavailable)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(unavailable)?;

            migrate(&conn)?;
            Ok::<_, Error>(conn)
        })
        .await
        .map_err(unavailable)??;

        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a stored record.
    pub async fn record(&self, resource_type: ResourceType, id: i64) -> Result<Option<Record>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, updated_at, payload FROM resource_records
                 WHERE resource_type = ?1 AND id = ?2",
                params![resource_type.as_str(), id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(unavailable)?
            .map(|(id, updated_at, payload)| decode_row(id, updated_at, &payload))
            .transpose()
        })
        .await
    }

    /// Number of stored records of a type.
    pub async fn record_count(&self, resource_type: ResourceType) -> Result<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM resource_records WHERE resource_type = ?1",
                    [resource_type.as_str()],
                    |row| row.get(0),
                )
                .map_err(unavailable)?;
            Ok(count as u64)
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(unavailable)?
    }
}

fn decode_row(id: i64, updated_at: Option<i64>, payload: &str) -> Result<Record> {
    let payload = serde_json::from_str(payload).map_err(unavailable)?;
    Ok(Record {
        id,
        updated_at: updated_at.map(from_millis).transpose()?,
        hidden: false,
        payload,
    })
}

#[async_trait]
impl FreshnessLedger for SqliteStore {
    async fn last_sync(&self, resource_type: ResourceType) -> Result<Option<Timestamp>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT data_updated_at FROM resource_last_update WHERE resource_type = ?1",
                [resource_type.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(unavailable)?
            .map(from_millis)
            .transpose()
        })
        .await
    }

    async fn set_last_sync(&self, resource_type: ResourceType, at: Timestamp) -> Result<()> {
        self.with_conn(move |conn| {
            upsert_last_sync(conn, resource_type, at).map_err(unavailable)?;
            Ok(())
        })
        .await
    }

    async fn ledger_snapshot(&self) -> Result<Vec<FreshnessRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT resource_type, data_updated_at FROM resource_last_update")
                .map_err(unavailable)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(unavailable)?;

            let mut result = Vec::new();
            for row in rows {
                let (key, ms) = row.map_err(unavailable)?;
                match key.parse::<ResourceType>() {
                    Ok(resource_type) => result.push(FreshnessRecord {
                        resource_type,
                        last_synced_at: from_millis(ms)?,
                    }),
                    Err(_) => warn!("Ignoring ledger row for unknown resource type {}", key),
                }
            }
            result.sort_by_key(|row| row.resource_type);
            Ok(result)
        })
        .await
    }
}

fn upsert_last_sync(
    conn: &Connection,
    resource_type: ResourceType,
    at: Timestamp,
) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO resource_last_update (resource_type, data_updated_at)
        VALUES (?1, ?2)
        ON CONFLICT(resource_type) DO UPDATE SET
            data_updated_at = MAX(data_updated_at, excluded.data_updated_at)
        "#,
        params![resource_type.as_str(), at.timestamp_millis()],
    )
}

fn write_records(
    conn: &Connection,
    resource_type: ResourceType,
    records: &[Record],
) -> Result<()> {
    let mut upsert = conn
        .prepare_cached(
            r#"
            INSERT OR REPLACE INTO resource_records (resource_type, id, updated_at, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .map_err(persistence)?;
    let mut delete = conn
        .prepare_cached("DELETE FROM resource_records WHERE resource_type = ?1 AND id = ?2")
        .map_err(persistence)?;

    for record in records {
        if record.hidden {
            delete
                .execute(params![resource_type.as_str(), record.id])
                .map_err(persistence)?;
            continue;
        }
        let payload = serde_json::to_string(&record.payload).map_err(persistence)?;
        upsert
            .execute(params![
                resource_type.as_str(),
                record.id,
                record.updated_at.map(|at| at.timestamp_millis()),
                payload,
            ])
            .map_err(persistence)?;
    }
    Ok(())
}

#[async_trait]
impl TransactionalWriter for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        Ok(Box::new(SqliteTransaction {
            conn: self.conn.clone(),
            ops: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum PendingOp {
    Write(ResourceType, Vec<Record>),
    Ledger(ResourceType, Timestamp),
}

/// Transaction handle for [`SqliteStore`].
pub struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
    ops: Vec<PendingOp>,
}

#[async_trait]
impl WriteTransaction for SqliteTransaction {
    async fn write_batch(&mut self, resource_type: ResourceType, records: &[Record]) -> Result<()> {
        self.ops.push(PendingOp::Write(resource_type, records.to_vec()));
        Ok(())
    }

    async fn set_last_sync(&mut self, resource_type: ResourceType, at: Timestamp) -> Result<()> {
        self.ops.push(PendingOp::Ledger(resource_type, at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { conn, ops } = *self;

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))?;
            // Dropping `tx` on an early return rolls back.
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(unavailable)?;

            for op in &ops {
                match op {
                    PendingOp::Write(resource_type, records) => {
                        debug!("Writing {} {} record(s)", records.len(), resource_type);
                        write_records(&tx, *resource_type, records)?;
                    }
                    PendingOp::Ledger(resource_type, at) => {
                        upsert_last_sync(&tx, *resource_type, *at).map_err(persistence)?;
                    }
                }
            }

            tx.commit().map_err(persistence)
        })
        .await
        .map_err(unavailable)?
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Discarding {} buffered operation(s)", self.ops.len());
        Ok(())
    }
}
