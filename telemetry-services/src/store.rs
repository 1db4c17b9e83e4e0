//! Durable key/value storage
//!
//! Process-wide, last-writer-wins string storage backing the TTL caches.
//! [`SqliteStore`] persists to disk; [`MemoryStore`] is used in tests and as
//! a fallback when the database cannot be opened.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use telemetry_core::TelemetryError;
use tracing::info;

/// Errors from storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for TelemetryError {
    fn from(e: StoreError) -> Self {
        TelemetryError::storage(e.to_string())
    }
}

/// String key/value store
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite-backed store with a single `kv` table
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!("Initialized key/value store at: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.db.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.db.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("holiday_cache_expiry", "1700000000000").unwrap();
        assert_eq!(
            store.get("holiday_cache_expiry").unwrap().as_deref(),
            Some("1700000000000")
        );

        // Last writer wins
        store.set("holiday_cache_expiry", "1800000000000").unwrap();
        assert_eq!(
            store.get("holiday_cache_expiry").unwrap().as_deref(),
            Some("1800000000000")
        );

        store.remove("holiday_cache_expiry").unwrap();
        assert_eq!(store.get("holiday_cache_expiry").unwrap(), None);

        // Removing twice is fine
        store.remove("holiday_cache_expiry").unwrap();
    }

    #[test]
    fn test_sqlite_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }
}
