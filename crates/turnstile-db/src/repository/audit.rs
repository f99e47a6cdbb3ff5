//! # Audit Repository
//!
//! The append-only audit log, the only operator-facing log surface.
//! Entries are inserted by every component and pruned by retention;
//! nothing ever mutates one.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use turnstile_core::{AuditEntry, AuditOp};

/// Repository for audit log entries.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Appends one entry. `machine_id` is `None` for system-wide entries
    /// (scheduler lifecycle, sync passes).
    pub async fn append(
        &self,
        machine_id: Option<i64>,
        operation: AuditOp,
        message: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (machine_id, timestamp, operation, message)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(machine_id)
        .bind(Utc::now())
        .bind(operation.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the newest entries, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, machine_id, timestamp, operation, message
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Returns entries written at or after `since`, oldest first: the
    /// "entries of this run" view.
    pub async fn since(&self, since: DateTime<Utc>) -> DbResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, machine_id, timestamp, operation, message
            FROM audit_log
            WHERE timestamp >= ?1
            ORDER BY id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Deletes entries strictly older than `cutoff`. Returns the number
    /// of rows removed.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM audit_log WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Total entry count, for diagnostics and tests.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================
