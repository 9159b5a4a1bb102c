//! Durable scoped storage
//!
//! String keys mapped to JSON text. Survives restarts and is cleared only by
//! explicit removal.

use sqlx::{Pool, Sqlite};
use tawo_common::{Error, Result};

/// Key of the persisted dataset blob
pub const DATASET_KEY: &str = "tawo_review_data";

/// Key prefix shared by every per-fingerprint matching key
pub const MATCHING_PREFIX: &str = "tawo_matching_";

/// Key-value store over the `scoped_storage` table
#[derive(Debug, Clone)]
pub struct ScopedStore {
    db: Pool<Sqlite>,
}

impl ScopedStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Read a value (None if the key was never set)
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM scoped_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|(value,)| value))
    }

    /// Insert or replace a value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO scoped_storage (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Remove a single key
    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM scoped_storage WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }
}
