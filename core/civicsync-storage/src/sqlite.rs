//! SQLite-backed bounded store.

use crate::error::{StorageError, StorageResult};
use crate::store::{BoundedStore, StoreConfig, UpsertReport};
use async_trait::async_trait;
use civicsync_types::{EntityId, ObservedAt, StoreRecord};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RESOURCE_NAME_LEN: usize = 48;

/// Returns the table name used for a resource, validating the name.
///
/// Resource names become SQL identifiers, so only `[a-z0-9_]` is accepted.
pub fn table_name_for(resource: &str) -> StorageResult<String> {
    if resource.is_empty() || resource.len() > MAX_RESOURCE_NAME_LEN {
        return Err(StorageError::InvalidData(format!(
            "resource name must be 1..={MAX_RESOURCE_NAME_LEN} characters"
        )));
    }
    if !resource
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(StorageError::InvalidData(format!(
            "resource name `{resource}` may only contain a-z, 0-9 and _"
        )));
    }
    Ok(format!("records_{resource}"))
}

/// Bounded store for one resource, backed by a SQLite table.
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    config: StoreConfig,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("table", &self.table)
            .field("config", &self.config)
            .finish()
    }
}

impl SqliteRecordStore {
    /// Opens (or creates) a store for `resource` in the database at `path`.
    pub fn open(path: impl AsRef<Path>, resource: &str, config: StoreConfig) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, resource, config)
    }

    /// Opens an in-memory store (for testing and ephemeral hosts).
    pub fn open_in_memory(resource: &str, config: StoreConfig) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, resource, config)
    }

    fn from_connection(conn: Connection, resource: &str, config: StoreConfig) -> StorageResult<Self> {
        config.validate()?;
        let table = table_name_for(resource)?;
        init_schema(&conn, &table)?;
        debug!(%table, capacity = config.capacity, "opened record store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table,
            config,
        })
    }

    /// The table backing this store.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The store configuration.
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str, StoreConfig) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let config = self.config;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::unavailable("connection lock poisoned"))?;
            f(&mut guard, &table, config)
        })
        .await
        .map_err(|e| StorageError::unavailable(format!("storage worker failed: {e}")))?
    }
}

#[async_trait]
impl BoundedStore for SqliteRecordStore {
    fn capacity(&self) -> usize {
        self.config.capacity
    }

    async fn upsert_many(&self, records: Vec<StoreRecord>) -> StorageResult<UpsertReport> {
        if records.is_empty() {
            return Ok(UpsertReport::default());
        }
        self.with_conn(move |conn, table, config| upsert_chunked(conn, table, config, &records))
            .await
    }

    async fn get_all(&self) -> StorageResult<Vec<StoreRecord>> {
        self.with_conn(|conn, table, _| load_all(conn, table)).await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.with_conn(|conn, table, _| count_rows(conn, table)).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_conn(|conn, table, _| {
            let removed = conn.execute(&format!("DELETE FROM {table}"), [])?;
            debug!(%table, removed, "cleared record store");
            Ok(())
        })
        .await
    }
}

fn init_schema(conn: &Connection, table: &str) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY CHECK (length(id) > 0),
            payload TEXT NOT NULL,
            observed_wall INTEGER NOT NULL,
            observed_logical INTEGER NOT NULL,
            ordinal INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS {table}_observed
            ON {table} (observed_wall, observed_logical, ordinal);
        "
    ))?;
    Ok(())
}

fn upsert_chunked(
    conn: &mut Connection,
    table: &str,
    config: StoreConfig,
    records: &[StoreRecord],
) -> StorageResult<UpsertReport> {
    let mut written = 0;
    let mut failure = None;

    for (index, chunk) in records.chunks(config.chunk_size).enumerate() {
        let base = index * config.chunk_size;
        match write_chunk(conn, table, base, chunk) {
            Ok(n) => written += n,
            Err(e) => {
                warn!(%table, chunk = index, "chunk rolled back: {e}");
                failure = Some(e);
                break;
            }
        }
    }

    let evicted = match evict_overflow(conn, table, config.capacity) {
        Ok(n) => n,
        Err(e) => match failure {
            Some(first) => {
                warn!(%table, "eviction after failed chunk also failed: {e}");
                return Err(first);
            }
            None => return Err(e),
        },
    };

    match failure {
        Some(e) => Err(e),
        None => {
            debug!(%table, written, evicted, "upsert applied");
            Ok(UpsertReport { written, evicted })
        }
    }
}

/// Writes one chunk in its own transaction. `base` is the batch position of
/// the chunk's first record.
fn write_chunk(
    conn: &mut Connection,
    table: &str,
    base: usize,
    chunk: &[StoreRecord],
) -> StorageResult<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {table} (id, payload, observed_wall, observed_logical, ordinal)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                observed_wall = excluded.observed_wall,
                observed_logical = excluded.observed_logical,
                ordinal = excluded.ordinal"
        ))?;
        for (offset, record) in chunk.iter().enumerate() {
            let payload = serde_json::to_string(&record.payload)?;
            let wall = i64::try_from(record.observed_at.wall_time()).map_err(|_| {
                StorageError::InvalidData(format!(
                    "record `{}` has out-of-range stamp {}",
                    record.id,
                    record.observed_at.wall_time()
                ))
            })?;
            stmt.execute(params![
                record.id.as_str(),
                payload,
                wall,
                i64::from(record.observed_at.logical()),
                (base + offset) as i64,
            ])?;
        }
    }
    tx.commit()?;
    Ok(chunk.len())
}

/// Deletes the oldest records until at most `capacity` remain.
///
/// Among records sharing a stamp, the later batch position goes first.
fn evict_overflow(conn: &Connection, table: &str, capacity: usize) -> StorageResult<usize> {
    let count = count_rows(conn, table)?;
    if count <= capacity {
        return Ok(0);
    }
    let excess = count - capacity;
    let deleted = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE id IN (
                SELECT id FROM {table}
                ORDER BY observed_wall ASC, observed_logical ASC, ordinal DESC
                LIMIT ?1
            )"
        ),
        params![excess as i64],
    )?;
    debug!(%table, deleted, "evicted oldest records");
    Ok(deleted)
}

fn count_rows(conn: &Connection, table: &str) -> StorageResult<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

fn load_all(conn: &Connection, table: &str) -> StorageResult<Vec<StoreRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, payload, observed_wall, observed_logical FROM {table}
         ORDER BY observed_wall ASC, observed_logical ASC, ordinal ASC"
    ))?;
    let rows = stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let wall: i64 = row.get(2)?;
        let logical: i64 = row.get(3)?;
        Ok((id, payload, wall, logical))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, payload, wall, logical) = row?;
        records.push(StoreRecord {
            id: EntityId::new(id),
            payload: serde_json::from_str(&payload)?,
            observed_at: ObservedAt::new(
                u64::try_from(wall).map_err(|_| {
                    StorageError::InvalidData(format!("stored stamp {wall} is negative"))
                })?,
                u32::try_from(logical).map_err(|_| {
                    StorageError::InvalidData(format!("stored logical clock {logical} overflows"))
                })?,
            ),
        });
    }
    Ok(records)
}
