//! # User Repository
//!
//! Enrolled users, one row per (machine, business user id).
//!
//! Fetch upserts rows as the device reports them; the upsert overwrites
//! `device_uid` and `name` but leaves `synced_at` alone, so a user that
//! was already pushed remotely is not pushed again just because its name
//! was re-read.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use turnstile_core::MachineUser;

/// Repository for enrolled users.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

/// An unsynced user joined with its machine's remote linkage, ready for
/// the sync pass.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingUser {
    pub id: i64,
    pub machine_id: i64,
    pub device_uid: i64,
    pub user_id: String,
    pub name: String,
    /// Remote-system id of the owning machine.
    pub remote_machine_id: i64,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Upserts a user as enrolled on the device, preserving `synced_at`.
    pub async fn upsert_enrolled(
        &self,
        machine_id: i64,
        device_uid: i64,
        user_id: &str,
        name: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (machine_id, device_uid, user_id, name)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (machine_id, user_id)
            DO UPDATE SET device_uid = excluded.device_uid, name = excluded.name
            "#,
        )
        .bind(machine_id)
        .bind(device_uid)
        .bind(user_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns all unsynced users whose machine is linked to a remote
    /// entity, in insertion order.
    pub async fn pending_linked(&self) -> DbResult<Vec<PendingUser>> {
        let pending = sqlx::query_as::<_, PendingUser>(
            r#"
            SELECT u.id, u.machine_id, u.device_uid, u.user_id, u.name,
                   m.remote_id AS remote_machine_id
            FROM users u
            JOIN machines m ON u.machine_id = m.id
            WHERE u.synced_at IS NULL AND m.remote_id IS NOT NULL
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pending)
    }

    /// Advances one user's push watermark.
    pub async fn mark_synced(&self, id: i64, at: DateTime<Utc>) -> DbResult<()> {
        debug!(user_row = id, "marking user synced");
        sqlx::query("UPDATE users SET synced_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetches one user by its uniqueness key.
    pub async fn get_by_key(
        &self,
        machine_id: i64,
        user_id: &str,
    ) -> DbResult<Option<MachineUser>> {
        let user = sqlx::query_as::<_, MachineUser>(
            r#"
            SELECT id, machine_id, device_uid, user_id, name, synced_at
            FROM users
            WHERE machine_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(machine_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Returns all users enrolled on one machine.
    pub async fn for_machine(&self, machine_id: i64) -> DbResult<Vec<MachineUser>> {
        let users = sqlx::query_as::<_, MachineUser>(
            r#"
            SELECT id, machine_id, device_uid, user_id, name, synced_at
            FROM users
            WHERE machine_id = ?1
            ORDER BY user_id
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

// =============================================================================
// Tests
// =============================================================================
