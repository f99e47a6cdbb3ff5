//! # Machine Repository
//!
//! Registered terminals. The engine reads these rows and writes back only
//! the derived fields: last successful connection, serial number and the
//! remote linkage.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use turnstile_core::{Machine, NewMachine};

const MACHINE_COLUMNS: &str = "id, name, address, port, passcode, serial_number, \
     last_connected, remote_name, remote_id, timezone";

/// Repository for machine registrations.
#[derive(Debug, Clone)]
pub struct MachineRepository {
    pool: SqlitePool,
}

impl MachineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MachineRepository { pool }
    }

    /// Returns all registered machines, ordered by display name.
    pub async fn all(&self) -> DbResult<Vec<Machine>> {
        let sql = format!("SELECT {MACHINE_COLUMNS} FROM machines ORDER BY name, id");
        let machines = sqlx::query_as::<_, Machine>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(machines)
    }

    /// Fetches one machine by id.
    pub async fn get(&self, id: i64) -> DbResult<Machine> {
        let sql = format!("SELECT {MACHINE_COLUMNS} FROM machines WHERE id = ?1");
        sqlx::query_as::<_, Machine>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("machine", id))
    }

    /// Registers a machine and returns the stored row.
    pub async fn insert(&self, new: NewMachine) -> DbResult<Machine> {
        debug!(name = %new.name, address = %new.address, "registering machine");

        let result = sqlx::query(
            r#"
            INSERT INTO machines (name, address, port, passcode, remote_name, timezone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&new.name)
        .bind(&new.address)
        .bind(new.port)
        .bind(&new.passcode)
        .bind(&new.remote_name)
        .bind(&new.timezone)
        .execute(&self.pool)
        .await?;

        self.get(result.last_insert_rowid()).await
    }

    /// Removes a machine. Users, attendance and audit entries cascade.
    pub async fn delete(&self, id: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM machines WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Writes back the derived connection fields after a successful
    /// device session.
    pub async fn record_connection(
        &self,
        id: i64,
        at: DateTime<Utc>,
        serial_number: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE machines SET last_connected = ?2, serial_number = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(at)
        .bind(serial_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores the remote linkage resolved by the link operation.
    pub async fn set_remote_link(
        &self,
        id: i64,
        remote_id: i64,
        timezone: Option<&str>,
    ) -> DbResult<()> {
        debug!(machine_id = id, remote_id, ?timezone, "linking machine");

        sqlx::query("UPDATE machines SET remote_id = ?2, timezone = ?3 WHERE id = ?1")
            .bind(id)
            .bind(remote_id)
            .bind(timezone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
