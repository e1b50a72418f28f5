//! Zone row persistence
//!
//! Stores the neighbour rows the topology cache reconciles against:
//! functional core for SQL text and row mapping, imperative shell for the
//! actual `SQLx` I/O, the same split the teacher's storage module uses.

use sqlx::Row;

use crate::database::DatabaseConnection;
use crate::domain_types::ZoneName;
use crate::fabric::topology::{ZoneDbInfo, ZoneRow, ZoneRowSource, TopologyError};

pub use crate::database::{StorageError, StorageResult};

mod sql {
    pub(super) fn select_all_zones() -> &'static str {
        "SELECT name, is_parent, weight_scale, weight_offset, username, password, host, port, virtual_host FROM zones"
    }

    pub(super) fn select_zone_by_name() -> &'static str {
        "SELECT name, is_parent, weight_scale, weight_offset, username, password, host, port, virtual_host FROM zones WHERE name = ?"
    }

    pub(super) fn upsert_zone() -> &'static str {
        "INSERT INTO zones (name, is_parent, weight_scale, weight_offset, username, password, host, port, virtual_host)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
           is_parent = excluded.is_parent,
           weight_scale = excluded.weight_scale,
           weight_offset = excluded.weight_offset,
           username = excluded.username,
           password = excluded.password,
           host = excluded.host,
           port = excluded.port,
           virtual_host = excluded.virtual_host"
    }

    pub(super) fn delete_zone_by_name() -> &'static str {
        "DELETE FROM zones WHERE name = ?"
    }
}

fn row_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ZoneRow> {
    let name: String = row.try_get("name").map_err(|e| StorageError::Decode { message: e.to_string() })?;
    let name = ZoneName::try_new(name).map_err(|e| StorageError::Decode { message: e.to_string() })?;
    let is_parent: i64 = row.try_get("is_parent").map_err(|e| StorageError::Decode { message: e.to_string() })?;
    let port: i64 = row.try_get("port").map_err(|e| StorageError::Decode { message: e.to_string() })?;

    Ok(ZoneRow {
        name,
        is_parent: is_parent != 0,
        db_info: ZoneDbInfo {
            weight_scale: row.try_get("weight_scale").map_err(|e| StorageError::Decode { message: e.to_string() })?,
            weight_offset: row.try_get("weight_offset").map_err(|e| StorageError::Decode { message: e.to_string() })?,
            username: row.try_get("username").map_err(|e| StorageError::Decode { message: e.to_string() })?,
            password: row.try_get("password").map_err(|e| StorageError::Decode { message: e.to_string() })?,
            host: row.try_get("host").map_err(|e| StorageError::Decode { message: e.to_string() })?,
            port: u16::try_from(port).unwrap_or(0),
            virtual_host: row.try_get("virtual_host").map_err(|e| StorageError::Decode { message: e.to_string() })?,
        },
    })
}

/// SQLite-backed store of the `zones` table.
pub struct ZoneRowStore {
    connection: DatabaseConnection,
}

impl ZoneRowStore {
    /// Wraps an already-initialized database connection.
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Reads a single zone row by name.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if no row exists, or a database
    /// error if the query fails.
    pub async fn get(&self, name: &ZoneName) -> StorageResult<ZoneRow> {
        let row = sqlx::query(sql::select_zone_by_name())
            .bind(name.as_ref())
            .fetch_optional(self.connection.pool())
            .await
            .map_err(|e| StorageError::Database { message: e.to_string() })?
            .ok_or(StorageError::NotFound)?;
        row_from_sqlite(&row)
    }

    /// Inserts or replaces a zone row.
    ///
    /// # Errors
    /// Returns a database error if the write fails.
    pub async fn upsert(&self, row: &ZoneRow) -> StorageResult<()> {
        sqlx::query(sql::upsert_zone())
            .bind(row.name.as_ref())
            .bind(i64::from(row.is_parent))
            .bind(row.db_info.weight_scale)
            .bind(row.db_info.weight_offset)
            .bind(&row.db_info.username)
            .bind(&row.db_info.password)
            .bind(&row.db_info.host)
            .bind(i64::from(row.db_info.port))
            .bind(&row.db_info.virtual_host)
            .execute(self.connection.pool())
            .await
            .map_err(|e| StorageError::Database { message: e.to_string() })?;
        Ok(())
    }

    /// Deletes a zone row by name. Not an error if it never existed.
    ///
    /// # Errors
    /// Returns a database error if the delete fails.
    pub async fn delete(&self, name: &ZoneName) -> StorageResult<()> {
        sqlx::query(sql::delete_zone_by_name())
            .bind(name.as_ref())
            .execute(self.connection.pool())
            .await
            .map_err(|e| StorageError::Database { message: e.to_string() })?;
        Ok(())
    }

    /// Reads every persisted zone row.
    ///
    /// # Errors
    /// Returns a database error if the query fails.
    pub async fn list(&self) -> StorageResult<Vec<ZoneRow>> {
        let rows = sqlx::query(sql::select_all_zones())
            .fetch_all(self.connection.pool())
            .await
            .map_err(|e| StorageError::Database { message: e.to_string() })?;
        rows.iter().map(row_from_sqlite).collect()
    }
}

#[async_trait::async_trait]
impl ZoneRowSource for ZoneRowStore {
    async fn list_zone_rows(&self) -> Result<Vec<ZoneRow>, TopologyError> {
        self.list().await.map_err(|e| TopologyError::Store(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConfig, DatabasePath};
    use tempfile::tempdir;

    fn db_info() -> ZoneDbInfo {
        ZoneDbInfo {
            weight_scale: 1.0,
            weight_offset: 0.0,
            username: "guest".to_string(),
            password: "guest".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
        }
    }

    async fn store() -> ZoneRowStore {
        let dir = tempdir().unwrap();
        let path = DatabasePath::new(dir.path().join("zones.db")).unwrap();
        let config = DatabaseConfig::for_testing(path);
        let connection = DatabaseConnection::initialize(config).await.unwrap();
        // keep the temp dir alive for the duration of the store's use by
        // leaking it; acceptable for a short-lived test database.
        std::mem::forget(dir);
        ZoneRowStore::new(connection)
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips_a_row() {
        let store = store().await;
        let name = ZoneName::try_new("child".to_string()).unwrap();
        let row = ZoneRow { name: name.clone(), is_parent: false, db_info: db_info() };

        store.upsert(&row).await.unwrap();
        let fetched = store.get(&name).await.unwrap();
        assert_eq!(fetched, row);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = store().await;
        let name = ZoneName::try_new("child".to_string()).unwrap();
        store.upsert(&ZoneRow { name: name.clone(), is_parent: false, db_info: db_info() }).await.unwrap();

        let mut updated_info = db_info();
        updated_info.host = "otherhost".to_string();
        store.upsert(&ZoneRow { name: name.clone(), is_parent: true, db_info: updated_info.clone() }).await.unwrap();

        let fetched = store.get(&name).await.unwrap();
        assert!(fetched.is_parent);
        assert_eq!(fetched.db_info.host, "otherhost");
    }

    #[tokio::test]
    async fn get_missing_row_is_not_found() {
        let store = store().await;
        let name = ZoneName::try_new("nobody".to_string()).unwrap();
        assert!(matches!(store.get(&name).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let store = store().await;
        let name = ZoneName::try_new("child".to_string()).unwrap();
        store.upsert(&ZoneRow { name: name.clone(), is_parent: false, db_info: db_info() }).await.unwrap();

        store.delete(&name).await.unwrap();
        assert!(matches!(store.get(&name).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn list_returns_every_row() {
        let store = store().await;
        store
            .upsert(&ZoneRow { name: ZoneName::try_new("p".to_string()).unwrap(), is_parent: true, db_info: db_info() })
            .await
            .unwrap();
        store
            .upsert(&ZoneRow { name: ZoneName::try_new("c".to_string()).unwrap(), is_parent: false, db_info: db_info() })
            .await
            .unwrap();

        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn list_zone_rows_satisfies_the_topology_source_trait() {
        let store = store().await;
        store
            .upsert(&ZoneRow { name: ZoneName::try_new("p".to_string()).unwrap(), is_parent: true, db_info: db_info() })
            .await
            .unwrap();

        let rows: Vec<ZoneRow> = ZoneRowSource::list_zone_rows(&store).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
