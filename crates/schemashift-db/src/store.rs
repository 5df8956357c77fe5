use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use schemashift_common::{Error, Result};
use schemashift_config::DatabaseConfig;
use tracing::{debug, info, warn};

use crate::schema::{self, ColumnInfo};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// A single connection to the SQLite database being migrated.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::init(conn, DEFAULT_BUSY_TIMEOUT)
    }

    /// Build a store from per-environment connection parameters.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        if !config.dialect.eq_ignore_ascii_case("sqlite") {
            return Err(Error::Config(format!(
                "unsupported database dialect: {}",
                config.dialect
            )));
        }

        let path = storage_path(config)?;
        let timeout = Duration::from_millis(config.busy_timeout_ms);
        if path.as_os_str() == ":memory:" {
            let conn = Connection::open_in_memory().map_err(|e| {
                Error::Database(format!("failed to open in-memory database: {e}"))
            })?;
            return Self::init(conn, timeout);
        }
        Self::open_with_timeout(&path, timeout)
    }

    fn open_with_timeout(db_path: &Path, timeout: Duration) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::init(conn, timeout)
    }

    fn init(conn: Connection, timeout: Duration) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        conn.busy_timeout(timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Open an IMMEDIATE transaction. The write lock is taken up front, so a
    /// second runner on the same file waits (or times out) instead of
    /// interleaving its DDL with ours.
    pub(crate) fn begin(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))
    }

    /// Run `work` with foreign key enforcement switched off. SQLite ignores
    /// the pragma inside a transaction, so it is flipped before the caller
    /// opens one and switched back on once `work` returns. Callers are
    /// expected to run `foreign_key_check` before committing.
    pub(crate) fn with_foreign_keys_suspended<T>(
        &mut self,
        work: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.set_foreign_keys(false)?;
        let result = work(self);
        if let Err(e) = self.set_foreign_keys(true) {
            warn!("could not re-enable foreign keys: {e}");
            return result.and_then(|_| Err(e));
        }
        result
    }

    pub fn foreign_keys_enabled(&self) -> Result<bool> {
        self.conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .map(|on| on != 0)
            .map_err(|e| Error::Database(format!("failed to read foreign_keys: {e}")))
    }

    fn set_foreign_keys(&self, on: bool) -> Result<()> {
        let value = if on { "ON" } else { "OFF" };
        self.conn
            .execute_batch(&format!("PRAGMA foreign_keys = {value}"))
            .map_err(|e| Error::Database(format!("failed to set foreign_keys {value}: {e}")))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        schema::table_exists(&self.conn, table)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        schema::table_columns(&self.conn, table)
    }

    pub fn comment(&self, table: &str, column: &str) -> Result<Option<String>> {
        schema::column_comment(&self.conn, table, column)
    }
}

fn storage_path(config: &DatabaseConfig) -> Result<PathBuf> {
    if let Some(var) = &config.use_env_variable {
        let value = std::env::var(var).map_err(|_| {
            Error::Config(format!("environment variable {var} is not set"))
        })?;
        debug!("database storage taken from ${var}");
        return Ok(PathBuf::from(value));
    }

    if let Some(storage) = &config.storage {
        return Ok(storage.clone());
    }

    match &config.database {
        Some(name) => Ok(PathBuf::from(format!("{name}.sqlite3"))),
        None => Err(Error::Config(
            "database config needs one of storage, database or use_env_variable".into(),
        )),
    }
}
