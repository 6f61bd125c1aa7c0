use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Persistent key/value store holding JSON documents, scoped to one profile
/// (one database file). Survives restarts the way browser local storage
/// survives page reloads.
#[derive(Clone)]
pub struct LocalStorage {
    db: Database,
}

impl LocalStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Read and decode the value stored under `key`, if any.
    #[instrument(skip(self))]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM local_storage WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replace the value stored under `key`.
    #[instrument(skip(self, value))]
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, json, now],
            )?;
            Ok(())
        })
    }

    /// Remove `key`. Returns whether anything was stored.
    #[instrument(skip(self))]
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
            Ok(changed > 0)
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }
}
