//! # Settings Repository
//!
//! Flat key→value settings. The engine only reads (building a typed
//! [`Settings`] with defaults for absent keys); writes come from the
//! external configuration surface and from tests.

use sqlx::SqlitePool;

use crate::error::DbResult;
use turnstile_core::Settings;

/// Repository for the settings table.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Loads the typed settings, falling back to defaults for absent or
    /// unparseable keys.
    pub async fn load(&self) -> DbResult<Settings> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings")
                .fetch_all(&self.pool)
                .await?;

        Ok(Settings::from_pairs(
            rows.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ))
    }

    /// Stores one key, replacing any previous value.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reads one raw value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }
}

// =============================================================================
// Tests
// =============================================================================
