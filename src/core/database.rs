//! Pooled SQLite handle shared by the store and both indexes
//!
//! Every service holds a cheap clone of [`Database`]. Each store access checks
//! out its own connection, so the two halves of a hybrid search read in parallel.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Result, SearchError};

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 1;

const DEFAULT_POOL_SIZE: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

const TEMPORARY_FILE_NAME: &str = "catalog.sqlite";

pub type Connection = PooledConnection<SqliteConnectionManager>;

/// Connection pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: u32,
    /// How long a checkout waits before the store counts as unreachable.
    pub checkout_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    location: String,
    // Declared after `pool` so connections close before the directory is removed.
    _scratch: Option<Arc<TempDir>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("connections", &self.pool.state().connections)
            .field("temporary", &self._scratch.is_some())
            .finish()
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with(db_path, PoolOptions::default())
    }

    pub fn open_with(db_path: &Path, options: PoolOptions) -> Result<Self> {
        let db = Self::open_file(db_path, options, None)?;
        db.migrate()?;
        Ok(db)
    }

    /// Open a private catalog that is deleted when the last handle drops
    /// (for testing and ephemeral catalogs)
    ///
    /// Backed by a WAL file in a temporary directory rather than a shared-cache
    /// in-memory database, so readers see the last committed state while a
    /// write transaction is open instead of failing on table locks.
    pub fn open_temporary() -> Result<Self> {
        Self::open_temporary_with(PoolOptions::default())
    }

    pub fn open_temporary_with(options: PoolOptions) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("catalog-").tempdir()?;
        let path = scratch.path().join(TEMPORARY_FILE_NAME);
        let db = Self::open_file(&path, options, Some(Arc::new(scratch)))?;
        db.migrate()?;
        Ok(db)
    }

    fn open_file(
        db_path: &Path,
        options: PoolOptions,
        scratch: Option<Arc<TempDir>>,
    ) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(options.max_size.max(1))
            .connection_timeout(options.checkout_timeout)
            .build(manager)?;

        let location = db_path.display().to_string();
        debug!(location = %location, pool_size = options.max_size, "database pool ready");
        let db = Self {
            pool,
            location,
            _scratch: scratch,
        };

        // WAL lets readers proceed while the store writes.
        db.connection()?.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(db)
    }

    /// Path of the SQLite file.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Check out a connection, failing with [`SearchError::Unavailable`].
    pub fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .map_err(|e| SearchError::Unavailable(e.to_string()))
    }

    /// Check out a connection for a read path.
    ///
    /// Read paths degrade to empty results when the store is unreachable,
    /// so the failure is logged here and reported as `None`.
    pub fn reader(&self) -> Option<Connection> {
        match self.pool.get() {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(location = %self.location, "store unreachable: {e}");
                None
            }
        }
    }

    /// Check out a connection for a setup path, mapping failure to `SetupFailed`.
    pub fn setup_connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .map_err(|e| SearchError::setup(format!("database not available: {e}")))
    }

    /// Set index metadata
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.connection()?.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get index metadata
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let Some(conn) = self.reader() else {
            return Ok(None);
        };
        conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.into())
    }

    /// Apply all pending migrations.
    ///
    /// Tables are created with `IF NOT EXISTS` and `meta` tracks the applied
    /// version, so this is safe to run on every open.
    fn migrate(&self) -> Result<()> {
        let conn = self.setup_connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let current_version = get_schema_version(&conn);
        if current_version >= SCHEMA_VERSION {
            debug!(version = current_version, "catalog schema up to date");
            return Ok(());
        }

        if current_version < 1 {
            migrate_v1(&conn)?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )?;
        debug!(version = SCHEMA_VERSION, "catalog schema migrated");
        Ok(())
    }
}

fn init_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // item_vectors relies on ON DELETE CASCADE
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

// v1: catalog items
fn migrate_v1(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            sku         TEXT NOT NULL UNIQUE,
            description TEXT,
            category    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_items_sku ON items(sku);
        CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);
        CREATE INDEX IF NOT EXISTS idx_items_name ON items(name);
        "#,
    )?;
    Ok(())
}

fn get_schema_version(conn: &rusqlite::Connection) -> u32 {
    conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<u32>().unwrap_or(0))
        },
    )
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_connections_share_tables() -> Result<()> {
        let db = Database::open_temporary()?;

        let first = db.connection()?;
        first.execute(
            "INSERT INTO items (name, sku) VALUES ('Bolt', 'B-1')",
            [],
        )?;

        let second = db.connection()?;
        let count: i64 = second.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_temporary_databases_are_isolated() -> Result<()> {
        let a = Database::open_temporary()?;
        let b = Database::open_temporary()?;

        a.connection()?
            .execute("INSERT INTO items (name, sku) VALUES ('Bolt', 'B-1')", [])?;

        let count: i64 =
            b.connection()?
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[test]
    fn test_meta_roundtrip() -> Result<()> {
        let db = Database::open_temporary()?;
        assert_eq!(db.get_meta("last_full_index")?, None);

        db.set_meta("last_full_index", "100")?;
        db.set_meta("last_full_index", "200")?;
        assert_eq!(db.get_meta("last_full_index")?, Some("200".to_string()));
        assert_eq!(db.get_meta("schema_version")?, Some(SCHEMA_VERSION.to_string()));
        Ok(())
    }

    #[test]
    fn test_file_database_reopens() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalog.sqlite");

        {
            let db = Database::open(&path)?;
            db.connection()?
                .execute("INSERT INTO items (name, sku) VALUES ('Bolt', 'B-1')", [])?;
        }

        let db = Database::open(&path)?;
        let count: i64 =
            db.connection()?
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_temporary_file_removed_on_drop() -> Result<()> {
        let db = Database::open_temporary()?;
        let path = std::path::PathBuf::from(db.location());
        assert!(path.exists());

        let clone = db.clone();
        drop(db);
        assert!(path.exists());

        drop(clone);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_reads_see_committed_state_during_write() -> Result<()> {
        let db = Database::open_temporary()?;
        db.connection()?
            .execute("INSERT INTO items (name, sku) VALUES ('Bolt', 'B-1')", [])?;

        let mut writer = db.connection()?;
        let tx = writer.transaction()?;
        tx.execute("INSERT INTO items (name, sku) VALUES ('Nut', 'N-1')", [])?;

        let count: i64 =
            db.connection()?
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        assert_eq!(count, 1);

        tx.commit()?;
        let count: i64 =
            db.connection()?
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        assert_eq!(count, 2);
        Ok(())
    }

    #[test]
    fn test_exhausted_pool_is_unreachable() -> Result<()> {
        let db = Database::open_temporary_with(PoolOptions {
            max_size: 1,
            checkout_timeout: Duration::from_millis(50),
        })?;
        let _held = db.connection()?;

        assert!(db.reader().is_none());
        assert!(matches!(db.connection(), Err(SearchError::Unavailable(_))));
        assert!(matches!(
            db.setup_connection(),
            Err(SearchError::SetupFailed(_))
        ));
        assert_eq!(db.get_meta("schema_version")?, None);
        Ok(())
    }
}
