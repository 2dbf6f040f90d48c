//! SQLite implementation of the storage engine
//!
//! One writer connection serialises every write transaction behind a mutex.
//! File databases run in WAL mode and serve reads from a small pool of
//! reader connections, each read transaction pinned to one snapshot.
//! In-memory databases are private to a single connection, so reads share
//! the writer connection.

use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection};

use super::datum::Datum;
use super::error::StorageResult;
use super::record::Record;
use super::traits::{ColumnInfo, ObjectKind, StorageEngine, Transaction};

/// SQLite engine configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, `None` for a private in-memory database
    pub path: Option<PathBuf>,
    /// Reader connections kept open for file databases
    pub reader_pool_size: usize,
    /// How long a connection waits on a lock held by another connection
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            reader_pool_size: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// Configuration for a private in-memory database
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a database file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

fn connect(config: &SqliteConfig) -> StorageResult<Connection> {
    let conn = match &config.path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    conn.busy_timeout(config.busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    if config.path.is_some() {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "Opened SQLite connection");
    }
    Ok(conn)
}

/// Pool of reader connections for file databases
struct ReaderPool {
    idle: Mutex<Vec<Connection>>,
    size: usize,
    config: SqliteConfig,
}

impl ReaderPool {
    fn new(config: &SqliteConfig) -> StorageResult<Self> {
        let size = config.reader_pool_size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(connect(config)?);
        }
        Ok(Self {
            idle: Mutex::new(idle),
            size,
            config: config.clone(),
        })
    }

    fn get(&self) -> StorageResult<PooledConnection<'_>> {
        let pooled = self.idle.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => connect(&self.config)?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
        })
    }
}

/// A reader connection that returns itself to the pool when dropped
struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a ReaderPool,
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = self.pool.idle.lock();
            if idle.len() < self.pool.size {
                idle.push(conn);
            }
        }
    }
}

enum ConnGuard<'a> {
    Writer(MutexGuard<'a, Connection>),
    Reader(PooledConnection<'a>),
}

impl Deref for ConnGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            ConnGuard::Writer(guard) => &**guard,
            ConnGuard::Reader(pooled) => pooled
                .conn
                .as_ref()
                .expect("Reader connection already returned to pool"),
        }
    }
}

/// SQLite-backed storage engine
pub struct SqliteEngine {
    writer: Mutex<Connection>,
    readers: Option<ReaderPool>,
}

impl SqliteEngine {
    /// Open an engine with the given configuration
    pub fn open(config: &SqliteConfig) -> StorageResult<Self> {
        let writer = connect(config)?;
        let readers = match config.path {
            Some(_) => Some(ReaderPool::new(config)?),
            None => None,
        };
        tracing::info!(path = ?config.path, "SQLite storage opened");
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
        })
    }

    /// Open a private in-memory engine
    pub fn in_memory() -> StorageResult<Self> {
        Self::open(&SqliteConfig::in_memory())
    }
}

impl StorageEngine for SqliteEngine {
    fn begin_write(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        let conn = ConnGuard::Writer(self.writer.lock());
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn, done: false }))
    }

    fn begin_read(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        let conn = match &self.readers {
            Some(pool) => ConnGuard::Reader(pool.get()?),
            None => ConnGuard::Writer(self.writer.lock()),
        };
        conn.execute_batch("BEGIN")?;
        Ok(Box::new(SqliteTransaction { conn, done: false }))
    }
}

/// A transaction bound to one connection
pub struct SqliteTransaction<'a> {
    conn: ConnGuard<'a>,
    done: bool,
}

impl Transaction for SqliteTransaction<'_> {
    fn execute(&self, sql: &str, params: &[Datum]) -> StorageResult<usize> {
        tracing::trace!(sql, "execute");
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn query(&self, sql: &str, params: &[Datum]) -> StorageResult<Vec<Record>> {
        tracing::trace!(sql, "query");
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let mut fields = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                fields.push((name.clone(), row.get::<_, Datum>(i)?));
            }
            Ok(Record::from(fields))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn columns(&self, table: &str) -> StorageResult<Vec<ColumnInfo>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT info.cid, info.name, info.type, info."notnull", info.pk,
                      info.dflt_value, fk."table"
               FROM pragma_table_info(?1) AS info
               LEFT JOIN pragma_foreign_key_list(?1) AS fk ON info.name = fk."from"
               ORDER BY info.cid"#,
        )?;
        let rows = stmt.query_map(params![table], |row| {
            Ok(ColumnInfo {
                cid: row.get(0)?,
                name: row.get(1)?,
                data_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                primary_key: row.get::<_, i64>(4)? != 0,
                default: row.get(5)?,
                reference: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn object_exists(&self, kind: ObjectKind, name: &str) -> StorageResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
            params![kind.as_str(), name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn indexes(&self, table: &str) -> StorageResult<Vec<String>> {
        // Auto-indexes backing UNIQUE/PRIMARY KEY have no SQL text
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Rollback failed");
            }
        }
    }
}
