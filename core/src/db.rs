//! Database handle, connection pool, and the cursor provider.
//!
//! A `Cursor` is either a caller's connection handed straight back
//! (`Cursor::Reused`, no transaction boundary) or a pooled connection with
//! an open transaction that is rolled back on drop unless committed.

use crate::{
    config::DbConfig,
    error::{LedgerError, LedgerResult},
    self_check,
    store::LedgerStore,
};
use log::{debug, warn};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::ops::Deref;
use std::time::Duration;
use tempfile::TempDir;

/// How the transaction of a fresh cursor is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBehavior {
    Deferred,
    Immediate,
    Exclusive,
}

impl TxBehavior {
    fn begin_sql(&self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Per-cursor overrides. All `None` means "defaults".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions {
    pub behavior: Option<TxBehavior>,
    pub read_only: Option<bool>,
}

impl CursorOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: Some(true),
            ..Self::default()
        }
    }

    pub fn is_default(&self) -> bool {
        self.behavior.is_none() && self.read_only.is_none()
    }
}

type SqlitePool = Pool<SqliteConnectionManager>;

fn build_pool(target: &str, config: &DbConfig) -> LedgerResult<SqlitePool> {
    if config.max_size == 0 || config.min_idle.is_some_and(|n| n > config.max_size) {
        return Err(LedgerError::Configuration(format!(
            "pool needs max_size > 0 and min_idle <= max_size, got min_idle={:?} max_size={}",
            config.min_idle, config.max_size
        )));
    }
    if config.connection_timeout_ms == 0 {
        return Err(LedgerError::Configuration(
            "connection_timeout_ms must be positive".into(),
        ));
    }
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    let manager = SqliteConnectionManager::file(target).with_init(move |conn| {
        // Before the pragmas: pooled connections are opened in parallel
        // and switching to WAL needs a brief exclusive lock.
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
    });
    let pool = Pool::builder()
        .max_size(config.max_size)
        .min_idle(config.min_idle)
        .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
        .build(manager)?;
    debug!("opened pool of {} connection(s) to {target}", config.max_size);
    Ok(pool)
}

pub struct Db {
    // Declared before `_scratch` so connections close before the directory
    // is removed.
    pool: SqlitePool,
    _scratch: Option<TempDir>,
}

impl Db {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, config: &DbConfig) -> LedgerResult<Self> {
        Ok(Self {
            pool: build_pool(path, config)?,
            _scratch: None,
        })
    }

    /// Throwaway database in a private temp directory, removed on drop.
    /// It is a real WAL file, so readers never wait on an open writer.
    pub fn temporary() -> LedgerResult<Self> {
        Self::temporary_with(&DbConfig::default())
    }

    pub fn temporary_with(config: &DbConfig) -> LedgerResult<Self> {
        let dir = tempfile::Builder::new().prefix("ledger-").tempdir()?;
        let path = dir.path().join("ledger.db");
        let path = path.to_str().ok_or_else(|| {
            LedgerError::Configuration(format!("temp path {} is not UTF-8", path.display()))
        })?;
        Ok(Self {
            pool: build_pool(path, config)?,
            _scratch: Some(dir),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a cursor.
    ///
    /// With `existing`, that connection is handed back untouched and no
    /// option may be set. Otherwise a pooled connection is opened in a new
    /// transaction honoring `options`.
    pub fn get_cursor<'a>(
        &'a self,
        existing: Option<&'a Connection>,
        options: CursorOptions,
    ) -> LedgerResult<Cursor<'a>> {
        if let Some(conn) = existing {
            if !options.is_default() {
                return Err(LedgerError::Configuration(
                    "cannot change options when reusing a cursor".into(),
                ));
            }
            return Ok(Cursor::Reused(conn));
        }

        let read_only = options.read_only.unwrap_or(false);
        let begin = options.behavior.unwrap_or(TxBehavior::Deferred).begin_sql();
        let cursor = PooledCursor {
            conn: self.pool.get()?,
            read_only,
            finished: false,
        };
        // Set both ways: a connection may come back from a failed reset.
        // On error the guard is dropped here and cleans up.
        cursor.conn.execute_batch(if read_only {
            "PRAGMA query_only = ON;"
        } else {
            "PRAGMA query_only = OFF;"
        })?;
        cursor.conn.execute_batch(begin)?;
        debug!("cursor acquired ({begin}, read_only={read_only})");
        Ok(Cursor::Pooled(cursor))
    }

    /// Run `f` on a fresh cursor: commit on `Ok`, roll back on `Err`.
    pub fn with_cursor<T, F>(&self, options: CursorOptions, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection) -> LedgerResult<T>,
    {
        let cursor = self.get_cursor(None, options)?;
        let out = f(&cursor)?;
        cursor.commit()?;
        Ok(out)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.with_cursor(CursorOptions::default(), |conn| {
            LedgerStore::new(conn).migrate()
        })
    }

    /// Run every self-check on one fresh cursor.
    pub fn self_check(&self) -> LedgerResult<()> {
        self.with_cursor(CursorOptions::default(), self_check::check_db)
    }

    /// Run every self-check and collect all violations.
    pub fn audit(&self) -> LedgerResult<Vec<self_check::Violation>> {
        self.with_cursor(CursorOptions::default(), self_check::audit_db)
    }
}

pub enum Cursor<'a> {
    Reused(&'a Connection),
    Pooled(PooledCursor),
}

impl Cursor<'_> {
    /// Commit a pooled cursor's transaction. No-op for a reused cursor,
    /// whose owner controls the transaction.
    pub fn commit(self) -> LedgerResult<()> {
        match self {
            Cursor::Reused(_) => Ok(()),
            Cursor::Pooled(mut cursor) => cursor.finish("COMMIT"),
        }
    }

    pub fn rollback(self) -> LedgerResult<()> {
        match self {
            Cursor::Reused(_) => Ok(()),
            Cursor::Pooled(mut cursor) => cursor.finish("ROLLBACK"),
        }
    }

    pub fn store(&self) -> LedgerStore<'_> {
        LedgerStore::new(self)
    }
}

impl Deref for Cursor<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Cursor::Reused(conn) => *conn,
            Cursor::Pooled(cursor) => &*cursor.conn,
        }
    }
}

/// A pooled connection inside an open transaction. Returned to the pool
/// on drop, after a rollback if it was never committed.
pub struct PooledCursor {
    conn: PooledConnection<SqliteConnectionManager>,
    read_only: bool,
    finished: bool,
}

impl PooledCursor {
    fn finish(&mut self, sql: &str) -> LedgerResult<()> {
        self.conn.execute_batch(sql)?;
        self.finished = true;
        debug!("cursor {sql}");
        Ok(())
    }
}

impl Drop for PooledCursor {
    fn drop(&mut self) {
        if !self.finished && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback on cursor release failed: {e}");
            } else {
                debug!("cursor rolled back on release");
            }
        }
        if self.read_only {
            if let Err(e) = self.conn.execute_batch("PRAGMA query_only = OFF;") {
                warn!("connection returned to the pool still query_only: {e}");
            }
        }
    }
}
