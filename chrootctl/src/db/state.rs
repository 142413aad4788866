//! Key-value access on top of [`Database`].

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Database, db_err};
use chrootctl_shared::errors::{ChrootError, ChrootResult};

/// String-keyed durable store.
///
/// The `try_*` methods surface errors. The plain accessors never fail: reads
/// degrade to `None`/the default and write failures are logged and dropped,
/// since every caller treats persistence as best-effort.
#[derive(Clone)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store backed by a fresh in-memory database.
    pub fn in_memory() -> ChrootResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn try_get(&self, key: &str) -> ChrootResult<Option<String>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        )
    }

    pub fn try_set(&self, key: &str, value: &str) -> ChrootResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        ))?;
        Ok(())
    }

    pub fn try_remove(&self, key: &str) -> ChrootResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute("DELETE FROM kv WHERE key = ?1", [key]))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "State read failed");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.try_set(key, value) {
            tracing::warn!(key, error = %e, "State write failed");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key) {
            tracing::warn!(key, error = %e, "State remove failed");
        }
    }

    /// Read a boolean stored as `"true"`/`"false"` (`"1"`/`"0"` also accepted).
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    pub fn try_get_json<T: DeserializeOwned>(&self, key: &str) -> ChrootResult<Option<T>> {
        match self.try_get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ChrootError::Storage(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get_json(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored JSON unreadable, ignoring");
                None
            }
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => tracing::warn!(key, error = %e, "Failed to encode state value"),
        }
    }
}
