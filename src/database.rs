//! Database module for embedded SQLite storage
//!
//! Separates functional core (configuration validation, connection string
//! generation) from imperative shell (file system operations, SQLite
//! connections), the same split the teacher's storage modules use.

use std::path::{Path, PathBuf};

use nutype::nutype;
use sqlx::{migrate::Migrator, Pool, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain_types::ConnectionPoolSize;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Persistence-layer failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Error from `SQLx` against the zones table.
    #[error("database error: {message}")]
    Database {
        /// Error message from the database driver.
        message: String,
    },

    /// File system I/O error preparing the database file's directory.
    #[error("file system error: {message}")]
    FileSystem {
        /// Error message from the file system operation.
        message: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {field} - {reason}")]
    Configuration {
        /// Name of the offending configuration field.
        field: String,
        /// Reason the value was rejected.
        reason: String,
    },

    /// Connection pool could not be established.
    #[error("connection pool error: {message}")]
    ConnectionPool {
        /// Error message from pool creation.
        message: String,
    },

    /// Embedded migration failed to apply.
    #[error("migration failed: {message}")]
    Migration {
        /// Error message from the migrator.
        message: String,
    },

    /// A stored row could not be decoded into domain types.
    #[error("row decode error: {message}")]
    Decode {
        /// Error message describing the decode failure.
        message: String,
    },

    /// The requested row was not present.
    #[error("not found")]
    NotFound,
}

/// Result type for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A validated path to a `.db` file.
#[nutype(
    sanitize(with = |path: PathBuf| path),
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Validates `path` as a database file path.
    ///
    /// # Errors
    /// Returns [`StorageError::Configuration`] if the path is empty or
    /// lacks a `.db` extension.
    pub fn new<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::try_new(path.as_ref().to_path_buf()).map_err(|_| StorageError::Configuration {
            field: "database_path".to_string(),
            reason: "path is empty or missing a .db extension".to_string(),
        })
    }

    /// The path as a `PathBuf`.
    #[must_use]
    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }

    /// The SQLite connection string for this path, creating the file if
    /// missing.
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.as_path().display())
    }

    fn parent_directory(&self) -> Option<PathBuf> {
        self.as_path().parent().map(Path::to_path_buf)
    }
}

impl std::fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_path().display())
    }
}

/// Connection settings for the zones database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    path: DatabasePath,
    pool_size: ConnectionPoolSize,
    enable_wal_mode: bool,
    enable_foreign_keys: bool,
}

impl DatabaseConfig {
    /// Default settings suited to a long-running deployment: the pool is
    /// sized at twice the available CPU cores, the same ratio the teacher's
    /// own worker-pool sizing uses, falling back to the flat default if that
    /// ever lands outside the valid range.
    #[must_use]
    pub fn new(path: DatabasePath) -> Self {
        let sized = ConnectionPoolSize::try_new(num_cpus::get().max(1) * 2).unwrap_or_default();
        Self {
            path,
            pool_size: sized,
            enable_wal_mode: true,
            enable_foreign_keys: true,
        }
    }

    /// Minimal settings suited to a short-lived test process.
    ///
    /// # Panics
    /// Panics if pool size 1 is somehow out of range (never happens).
    #[must_use]
    pub fn for_testing(path: DatabasePath) -> Self {
        Self {
            path,
            pool_size: ConnectionPoolSize::try_new(1).expect("1 is always a valid pool size"),
            enable_wal_mode: false,
            enable_foreign_keys: false,
        }
    }

    /// Overrides the connection pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: ConnectionPoolSize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// The configured database path.
    #[must_use]
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// The configured connection pool size.
    #[must_use]
    pub fn pool_size(&self) -> ConnectionPoolSize {
        self.pool_size
    }

    fn validate(&self) -> StorageResult<()> {
        if self.pool_size.as_usize() == 0 {
            return Err(StorageError::Configuration {
                field: "pool_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn connect_options(&self) -> sqlx::sqlite::SqliteConnectOptions {
        use sqlx::sqlite::SqliteConnectOptions;
        use sqlx::ConnectOptions;

        let mut options = SqliteConnectOptions::new()
            .filename(self.path().as_path())
            .create_if_missing(true);

        if self.enable_wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }
        if self.enable_foreign_keys {
            options = options.pragma("foreign_keys", "ON");
        }

        options.disable_statement_logging()
    }
}

/// An open connection pool against the zones database, with migrations
/// already applied.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

impl DatabaseConnection {
    /// Opens (creating if necessary) the configured database, applies
    /// embedded migrations, and returns a ready connection pool.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the configuration is invalid, the
    /// parent directory cannot be created, the pool cannot connect, or
    /// migrations fail.
    pub async fn initialize(config: DatabaseConfig) -> StorageResult<Self> {
        config.validate()?;

        if let Some(parent) = config.path().parent_directory() {
            tokio::fs::create_dir_all(&parent).await.map_err(|e| StorageError::FileSystem {
                message: format!("failed to create directory {}: {e}", parent.display()),
            })?;
        }

        let pool = SqlitePool::connect_with(config.connect_options()).await.map_err(|e| {
            StorageError::ConnectionPool { message: format!("failed to create connection pool: {e}") }
        })?;

        info!(path = %config.path(), "running embedded zone database migrations");
        if let Err(e) = MIGRATOR.run(&pool).await {
            warn!(error = %e, "zone database migration failed");
            return Err(StorageError::Migration { message: e.to_string() });
        }

        Ok(Self { pool, config })
    }

    /// Access to the underlying pool for queries.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// The configuration this connection was opened with.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn database_path_rejects_non_db_extension() {
        assert!(DatabasePath::new("test.txt").is_err());
    }

    #[test]
    fn database_path_generates_connection_string() {
        let path = DatabasePath::new("/tmp/zones.db").unwrap();
        let conn_str = path.to_connection_string();
        assert!(conn_str.starts_with("sqlite://"));
        assert!(conn_str.contains("mode=rwc"));
    }

    #[test]
    fn testing_config_uses_minimal_pool() {
        let path = DatabasePath::new("zones.db").unwrap();
        let config = DatabaseConfig::for_testing(path);
        assert_eq!(config.pool_size().as_usize(), 1);
    }

    #[test]
    fn new_config_sizes_the_pool_from_available_cpus() {
        let path = DatabasePath::new("zones.db").unwrap();
        let config = DatabaseConfig::new(path);
        assert_eq!(config.pool_size().as_usize(), num_cpus::get().max(1) * 2);
    }

    #[tokio::test]
    async fn initialize_creates_file_and_runs_migrations() {
        let dir = tempdir().unwrap();
        let path = DatabasePath::new(dir.path().join("zones.db")).unwrap();
        let config = DatabaseConfig::for_testing(path);

        let connection = DatabaseConnection::initialize(config).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(connection.pool())
            .await
            .unwrap();
        assert!(count >= 1);
    }
}
