//! Local Store (§4.2): durable, transactional storage of configuration,
//! per-tag last-value/history, buffered upload records, and the audit trail.
//!
//! A single SQLite database (`rusqlite`, bundled) backs every table. SQLite
//! connections are `!Sync`, so every operation runs inside
//! `tokio::task::spawn_blocking` holding a `std::sync::Mutex<Connection>` --
//! the single-writer discipline §4.2/§5 require, without ever holding the
//! lock across a suspension point.

pub mod audit;
pub mod buffer;
pub mod compactor;
pub mod devices;
pub mod export;
pub mod schema;

use crate::error::{GatewayError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| GatewayError::Fatal(crate::error::FatalError::StorageCorrupt(e.to_string())))?;
        schema::apply_schema(&conn)
            .map_err(|e| GatewayError::Fatal(crate::error::FatalError::StorageCorrupt(e.to_string())))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on a blocking thread. Every store
    /// query/mutation goes through this so no async task ever blocks on
    /// SQLite I/O directly.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("store mutex poisoned");
            f(&mut guard)
        })
        .await
        .map_err(|e| GatewayError::Decode(format!("store task panicked: {e}")))?
        .map_err(GatewayError::from)
    }

    /// Reads the current `config_version` (0 if never synced).
    pub async fn get_config_version(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM gateway_config WHERE key = 'config_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .map(|v| v.parse::<i64>().unwrap_or(0))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(0),
                other => Err(other),
            })
        })
        .await
    }

    /// Applies a new config version. Callers MUST ensure strict
    /// monotonicity (§3 invariant 6); this only persists the value.
    pub async fn set_config_version(&self, version: i64) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO gateway_config(key, value) VALUES ('config_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [version.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Reads an arbitrary gateway-config value by key (e.g. `last_sync`,
    /// `identity`, `settings`), stored as opaque JSON text.
    pub async fn get_gateway_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM gateway_config WHERE key = ?1",
                [&key],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
        .await
    }

    pub async fn put_gateway_config(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO gateway_config(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_version_starts_at_zero_and_persists() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_config_version().await.unwrap(), 0);
        store.set_config_version(1).await.unwrap();
        store.set_config_version(2).await.unwrap();
        assert_eq!(store.get_config_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn gateway_config_round_trips_arbitrary_keys() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_gateway_config("last_sync").await.unwrap(), None);
        store.put_gateway_config("last_sync", "12345").await.unwrap();
        assert_eq!(
            store.get_gateway_config("last_sync").await.unwrap().as_deref(),
            Some("12345")
        );
    }
}
