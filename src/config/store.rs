//! Key-value settings store
//!
//! The controller only needs `load(key)` / `save(key, blob)`. Load failures
//! are never user visible: `load_config` falls back to defaults.

use super::SessionConfig;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Key the serialized `SessionConfig` lives under
pub const CONFIG_KEY: &str = "config";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Settings store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Capability for persisting opaque blobs by key
pub trait ConfigStore: Send + Sync {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    fn save(&self, key: &str, blob: &[u8]) -> StoreResult<()>;
}

impl<T: ConfigStore + ?Sized> ConfigStore for Arc<T> {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, blob: &[u8]) -> StoreResult<()> {
        (**self).save(key, blob)
    }
}

/// Load the persisted configuration, or the default on any failure.
pub fn load_config(store: &dyn ConfigStore) -> SessionConfig {
    match store.load(CONFIG_KEY) {
        Ok(Some(blob)) => match serde_json::from_slice(&blob) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Stored config is unreadable, using defaults");
                SessionConfig::default()
            }
        },
        Ok(None) => SessionConfig::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            SessionConfig::default()
        }
    }
}

pub fn save_config(store: &dyn ConfigStore, config: &SessionConfig) -> StoreResult<()> {
    let blob = serde_json::to_vec(config)?;
    store.save(CONFIG_KEY, &blob)
}

/// Thread-safe sqlite-backed store
#[derive(Clone)]
pub struct SqliteConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConfigStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl ConfigStore for SqliteConfigStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let blob = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn save(&self, key: &str, blob: &[u8]) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, blob, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// In-process store, used by tests and when no database path is usable
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, blob: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), blob.to_vec());
        Ok(())
    }
}
