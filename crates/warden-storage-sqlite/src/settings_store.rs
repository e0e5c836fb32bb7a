//! Key/value settings persistence

use crate::retry::with_retry;
use crate::{Database, Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use warden_core::AutoLockSettings;

const AUTO_LOCK_KEY: &str = "auto_lock";
const LAST_ACTIVE_KEY: &str = "last_active";

/// Settings storage operations
pub struct SettingsStore<'a> {
    db: &'a Database,
}

impl<'a> SettingsStore<'a> {
    /// Create new settings store
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Raw value for `key`
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        with_retry(|| {
            Ok(self
                .db
                .conn()
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    /// Store raw value for `key`
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        with_retry(|| {
            self.db.conn().execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Persisted auto-lock settings, if any were saved
    pub fn load_auto_lock(&self) -> Result<Option<AutoLockSettings>> {
        match self.get(AUTO_LOCK_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Persist auto-lock settings
    pub fn save_auto_lock(&self, settings: &AutoLockSettings) -> Result<()> {
        self.set(AUTO_LOCK_KEY, &serde_json::to_string(settings)?)
    }

    /// Last recorded user activity
    pub fn last_active(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.get(LAST_ACTIVE_KEY)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| Error::Corrupt(format!("{}: {}", LAST_ACTIVE_KEY, e)))
    }

    /// Record user activity
    pub fn set_last_active(&self, at: DateTime<Utc>) -> Result<()> {
        self.set(LAST_ACTIVE_KEY, &at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_lock_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let store = SettingsStore::new(&db);
        assert!(store.load_auto_lock().unwrap().is_none());

        let settings = AutoLockSettings {
            time_auto_lock: 5,
            always_lock: true,
        };
        store.save_auto_lock(&settings).unwrap();
        assert_eq!(store.load_auto_lock().unwrap(), Some(settings));
    }

    #[test]
    fn test_last_active() {
        let db = Database::open_in_memory().unwrap();
        let store = SettingsStore::new(&db);
        assert!(store.last_active().unwrap().is_none());

        let now = Utc::now();
        store.set_last_active(now).unwrap();
        assert_eq!(store.last_active().unwrap(), Some(now));

        store.set(LAST_ACTIVE_KEY, "yesterday").unwrap();
        assert!(matches!(store.last_active(), Err(Error::Corrupt(_))));
    }
}
