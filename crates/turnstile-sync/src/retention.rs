//! # Retention Component
//!
//! Two independent age-based deletions, each driven by a day count from
//! settings. Deletion ignores sync state on purpose: the staging store
//! is a buffer, not the system of record, so a row may be purged before
//! or after it was pushed.

use chrono::{Duration as TimeDelta, Local, Utc};
use tracing::info;

use crate::audit::audit;
use crate::error::SyncResult;
use turnstile_core::{AuditOp, Settings};
use turnstile_db::Database;

/// Rows removed by one retention sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub audit_pruned: u64,
    pub attendance_pruned: u64,
}

/// Prunes audit entries and attendance strictly older than their
/// configured windows. Rows exactly at a cutoff are retained.
pub async fn run(db: &Database, settings: &Settings) -> SyncResult<RetentionOutcome> {
    let log_cutoff = Utc::now() - TimeDelta::days(i64::from(settings.clean_logs_days));
    let audit_pruned = db.audit().delete_older_than(log_cutoff).await?;
    audit(
        db,
        None,
        AuditOp::Retention,
        &format!(
            "pruned {audit_pruned} audit entries older than {} days",
            settings.clean_logs_days
        ),
    )
    .await;

    // Attendance timestamps are naive device wall clock; the cutoff is
    // computed on the host wall clock to match.
    let attendance_cutoff = Local::now().naive_local()
        - TimeDelta::days(i64::from(settings.delete_attendance_days));
    let attendance_pruned = db.attendance().delete_older_than(attendance_cutoff).await?;
    audit(
        db,
        None,
        AuditOp::Retention,
        &format!(
            "pruned {attendance_pruned} attendance records older than {} days",
            settings.delete_attendance_days
        ),
    )
    .await;

    info!(audit_pruned, attendance_pruned, "retention sweep finished");

    Ok(RetentionOutcome {
        audit_pruned,
        attendance_pruned,
    })
}
