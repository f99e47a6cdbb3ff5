//! # Attendance Repository
//!
//! Clock events staged for delivery.
//!
//! ## Watermark Columns
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  attendance                                                         │
//! │                                                                     │
//! │  id | machine_id | user_id | event_uid | timestamp | synced_at      │
//! │  ───┼────────────┼─────────┼───────────┼───────────┼───────────     │
//! │  1  │ 3          │ 1042    │ 3-1042-…  │ 08:30:00  │ 2024-…    ✓   │
//! │  2  │ 3          │ 1042    │ 3-1042-…  │ 17:01:12  │ NULL      ←   │
//! │                                                                     │
//! │  MAX(timestamp) per machine  → fetch watermark                      │
//! │  synced_at IS NULL           → rows the next sync pass picks up     │
//! │  UNIQUE(machine,user,ts)     → re-fetch inserts are absorbed        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use turnstile_core::AttendanceRecord;

/// Repository for attendance records.
#[derive(Debug, Clone)]
pub struct AttendanceRepository {
    pool: SqlitePool,
}

/// An unsynced record joined with its machine's remote linkage and
/// timezone, ready for the sync pass.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingAttendance {
    pub id: i64,
    pub machine_id: i64,
    pub user_id: String,
    pub event_uid: String,
    pub timestamp: NaiveDateTime,
    /// Remote-system id of the owning machine.
    pub remote_machine_id: i64,
    /// IANA zone of the owning machine, if configured.
    pub timezone: Option<String>,
}

impl AttendanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AttendanceRepository { pool }
    }

    /// Returns the newest stored device timestamp for a machine, the
    /// fetch watermark base.
    pub async fn latest_timestamp(&self, machine_id: i64) -> DbResult<Option<NaiveDateTime>> {
        let latest: Option<NaiveDateTime> =
            sqlx::query_scalar("SELECT MAX(timestamp) FROM attendance WHERE machine_id = ?1")
                .bind(machine_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    /// Inserts a record unless its (machine, user, timestamp) key already
    /// exists. Returns true if a row was actually inserted.
    pub async fn insert_if_absent(
        &self,
        machine_id: i64,
        user_id: &str,
        event_uid: &str,
        timestamp: NaiveDateTime,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance (machine_id, user_id, event_uid, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (machine_id, user_id, timestamp) DO NOTHING
            "#,
        )
        .bind(machine_id)
        .bind(user_id)
        .bind(event_uid)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns all unsynced records whose machine is linked to a remote
    /// entity, in insertion order for stable batching.
    pub async fn pending_linked(&self) -> DbResult<Vec<PendingAttendance>> {
        let pending = sqlx::query_as::<_, PendingAttendance>(
            r#"
            SELECT a.id, a.machine_id, a.user_id, a.event_uid, a.timestamp,
                   m.remote_id AS remote_machine_id, m.timezone
            FROM attendance a
            JOIN machines m ON a.machine_id = m.id
            WHERE a.synced_at IS NULL AND m.remote_id IS NOT NULL
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pending)
    }

    /// Advances the push watermark for a whole chunk in one statement.
    pub async fn mark_synced(&self, ids: &[i64], at: DateTime<Utc>) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        debug!(count = ids.len(), "marking attendance chunk synced");

        // sqlite has no array binds; build the placeholder list.
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE attendance SET synced_at = ? WHERE id IN ({placeholders})");

        let mut query = sqlx::query(&sql).bind(at);
        for id in ids {
            query = query.bind(*id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Deletes records strictly older than `cutoff`, regardless of sync
    /// state. Returns the number of rows removed.
    pub async fn delete_older_than(&self, cutoff: NaiveDateTime) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM attendance WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Returns all records for one machine, newest first.
    pub async fn for_machine(&self, machine_id: i64) -> DbResult<Vec<AttendanceRecord>> {
        let records = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, machine_id, user_id, event_uid, timestamp, synced_at
            FROM attendance
            WHERE machine_id = ?1
            ORDER BY timestamp DESC
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Counts rows still awaiting delivery.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE synced_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use turnstile_core::{time, NewMachine};

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    async fn machine(db: &Database) -> i64 {
        db.machines()
            .insert(NewMachine::new("Lobby", "10.0.0.15"))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn duplicate_key_is_absorbed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let machine_id = machine(&db).await;
        let repo = db.attendance();

        let when = ts(15, 8, 30);
        let uid = time::event_uid(machine_id, "1042", when);
        assert!(repo.insert_if_absent(machine_id, "1042", &uid, when).await.unwrap());
        assert!(!repo.insert_if_absent(machine_id, "1042", &uid, when).await.unwrap());

        assert_eq!(repo.for_machine(machine_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_timestamp_tracks_maximum() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let machine_id = machine(&db).await;
        let repo = db.attendance();

        assert_eq!(repo.latest_timestamp(machine_id).await.unwrap(), None);

        for when in [ts(15, 8, 30), ts(16, 9, 0), ts(14, 23, 59)] {
            let uid = time::event_uid(machine_id, "1042", when);
            repo.insert_if_absent(machine_id, "1042", &uid, when).await.unwrap();
        }

        assert_eq!(
            repo.latest_timestamp(machine_id).await.unwrap(),
            Some(ts(16, 9, 0))
        );
    }

    #[tokio::test]
    async fn mark_synced_updates_whole_chunk() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let machine_id = machine(&db).await;
        db.machines().set_remote_link(machine_id, 9, None).await.unwrap();
        let repo = db.attendance();

        for (i, when) in [ts(15, 8, 0), ts(15, 9, 0), ts(15, 10, 0)].iter().enumerate() {
            let user = format!("u{i}");
            let uid = time::event_uid(machine_id, &user, *when);
            repo.insert_if_absent(machine_id, &user, &uid, *when).await.unwrap();
        }

        let pending = repo.pending_linked().await.unwrap();
        assert_eq!(pending.len(), 3);

        let ids: Vec<i64> = pending.iter().take(2).map(|p| p.id).collect();
        assert_eq!(repo.mark_synced(&ids, Utc::now()).await.unwrap(), 2);
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retention_is_strictly_older_than() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let machine_id = machine(&db).await;
        let repo = db.attendance();

        let cutoff = ts(15, 0, 0);
        for when in [ts(14, 23, 59), ts(15, 0, 0), ts(15, 0, 1)] {
            let uid = time::event_uid(machine_id, "1042", when);
            repo.insert_if_absent(machine_id, "1042", &uid, when).await.unwrap();
        }

        assert_eq!(repo.delete_older_than(cutoff).await.unwrap(), 1);
        let left = repo.for_machine(machine_id).await.unwrap();
        assert_eq!(left.len(), 2, "boundary row must be retained");
    }
}
