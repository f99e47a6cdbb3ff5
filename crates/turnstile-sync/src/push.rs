//! # Sync Component
//!
//! One global pass propagating unsynced rows to the remote system. The
//! remote endpoint is a shared, rate-limited resource, so the pass is a
//! single sequential task: all eligible users first, then attendance in
//! chunks.
//!
//! ## Chunk Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  for each pending record (insertion order):                         │
//! │                                                                     │
//! │    resolve wire timestamp (machine zone → UTC, else naive)          │
//! │    remote-latest cache miss? ──► search_read latest for the user    │
//! │                                                                     │
//! │    newer than remote-latest ──► outgoing payload batch              │
//! │    not newer                ──► excluded (already delivered by a    │
//! │                                 pass whose watermark write failed)  │
//! │    either way               ──► to-mark batch                       │
//! │                                                                     │
//! │    to-mark batch full? ──► one create call for the payload batch    │
//! │        success ──► mark every to-mark id synced (one statement)     │
//! │        failure ──► drop both batches, continue from next record;    │
//! │                    the untouched rows retry next pass               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A create failure therefore causes no local state change, while a
//! success durably advances the watermark for every id in the chunk,
//! including the dedup-excluded ones.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::audit;
use crate::error::{SyncError, SyncResult};
use crate::remote::{self, models, RemoteClient};
use turnstile_core::{time, AuditOp, Settings};
use turnstile_db::{Database, PendingAttendance};

/// Counts reported by one sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Users created remotely.
    pub users_synced: usize,
    /// Attendance records carried in successful create calls.
    pub attendance_synced: usize,
}

/// Pushes all unsynced users and attendance of linked machines to the
/// remote system.
///
/// Authentication failure aborts the pass; chunk and per-record failures
/// are isolated and retried on the next pass by virtue of unchanged
/// local state.
pub async fn sync_all(
    db: &Database,
    remote: &dyn RemoteClient,
    settings: &Settings,
) -> SyncResult<SyncOutcome> {
    audit(db, None, AuditOp::Sync, "starting sync pass").await;

    match sync_inner(db, remote, settings).await {
        Ok(outcome) => {
            info!(
                users = outcome.users_synced,
                attendance = outcome.attendance_synced,
                "sync pass finished"
            );
            audit(
                db,
                None,
                AuditOp::Sync,
                &format!(
                    "sync pass finished; users: {}, attendance: {}",
                    outcome.users_synced, outcome.attendance_synced
                ),
            )
            .await;
            Ok(outcome)
        }
        Err(e) => {
            warn!(error = %e, "sync pass failed");
            audit(db, None, AuditOp::Error, &format!("sync pass failed: {e}")).await;
            Err(e)
        }
    }
}

async fn sync_inner(
    db: &Database,
    remote: &dyn RemoteClient,
    settings: &Settings,
) -> SyncResult<SyncOutcome> {
    remote
        .authenticate()
        .await
        .map_err(|e| SyncError::RemoteAuth(e.to_string()))?;

    let users_synced = sync_users(db, remote).await?;
    let attendance_synced = sync_attendance(db, remote, settings).await?;

    Ok(SyncOutcome {
        users_synced,
        attendance_synced,
    })
}

/// Pushes users one by one. Low volume, and a failing record must not
/// block its siblings, so there is no batching here.
async fn sync_users(db: &Database, remote: &dyn RemoteClient) -> SyncResult<usize> {
    let pending = db.users().pending_linked().await?;
    if pending.is_empty() {
        debug!("no users to synchronize");
        return Ok(0);
    }

    info!(count = pending.len(), "synchronizing users");
    let mut synced = 0;

    for user in pending {
        let payload = remote::user_payload(&user);
        match remote.create(models::USER, vec![payload]).await {
            Ok(_) => {
                db.users().mark_synced(user.id, Utc::now()).await?;
                synced += 1;
            }
            Err(e) => {
                warn!(user = %user.user_id, error = %e, "user create failed");
                audit(
                    db,
                    Some(user.machine_id),
                    AuditOp::Error,
                    &format!("failed to create user {}: {e}", user.user_id),
                )
                .await;
            }
        }
    }

    Ok(synced)
}

async fn sync_attendance(
    db: &Database,
    remote: &dyn RemoteClient,
    settings: &Settings,
) -> SyncResult<usize> {
    let pending = db.attendance().pending_linked().await?;
    if pending.is_empty() {
        debug!("no attendance to synchronize");
        return Ok(0);
    }

    let total = pending.len();
    info!(count = total, batch_size = settings.batch_size, "synchronizing attendance");

    // Most recent timestamp already present remotely, per business user
    // id, populated lazily. Scoped to this pass and never persisted.
    let mut remote_latest: HashMap<String, Option<NaiveDateTime>> = HashMap::new();

    let mut payload_batch = Vec::new();
    let mut mark_batch: Vec<i64> = Vec::new();
    let mut synced = 0;

    for record in pending {
        let wire_ts = resolve_wire_timestamp(db, &record).await;

        if !remote_latest.contains_key(&record.user_id) {
            let latest = lookup_remote_latest(remote, &record).await;
            remote_latest.insert(record.user_id.clone(), latest);
        }

        let already_remote = matches!(
            remote_latest.get(&record.user_id),
            Some(Some(latest)) if *latest >= wire_ts
        );

        if already_remote {
            // A previous pass delivered this record but died before the
            // watermark write; marking it locally is all that is left.
            debug!(record = record.id, user = %record.user_id, "already on remote, excluded from payload");
        } else {
            payload_batch.push(remote::attendance_payload(&record, wire_ts));
        }
        mark_batch.push(record.id);

        if mark_batch.len() >= settings.batch_size {
            let sent = flush_chunk(db, remote, &mut payload_batch, &mut mark_batch).await?;
            synced += sent;
            if sent > 0 {
                audit(
                    db,
                    None,
                    AuditOp::Sync,
                    &format!("uploaded {synced} of {total} attendance records so far"),
                )
                .await;
            }
        }
    }

    synced += flush_chunk(db, remote, &mut payload_batch, &mut mark_batch).await?;

    Ok(synced)
}

/// Converts the stored naive device time into the wire timestamp.
///
/// With a configured zone the naive value is interpreted as wall-clock
/// time there and converted to UTC, resolving DST ambiguity with the
/// later offset. Without a zone (or when resolution fails) the naive
/// value goes out unchanged, as a logged degraded case.
async fn resolve_wire_timestamp(db: &Database, record: &PendingAttendance) -> NaiveDateTime {
    match record.timezone.as_deref() {
        Some(zone) => match time::localize_to_utc(record.timestamp, zone) {
            Ok(utc) => utc,
            Err(e) => {
                warn!(record = record.id, error = %e, "timezone resolution failed, sending naive time");
                audit(
                    db,
                    Some(record.machine_id),
                    AuditOp::Error,
                    &format!("could not resolve timezone for record {}: {e}; sending naive time", record.event_uid),
                )
                .await;
                record.timestamp
            }
        },
        None => {
            debug!(record = record.id, "machine has no timezone, sending naive time");
            record.timestamp
        }
    }
}

/// Reads the most recent remote timestamp for the record's user on its
/// machine. A read failure is conservatively treated as "nothing remote
/// yet", so the record stays in the outgoing batch.
async fn lookup_remote_latest(
    remote: &dyn RemoteClient,
    record: &PendingAttendance,
) -> Option<NaiveDateTime> {
    let domain = json!([
        ["user_id", "=", record.user_id],
        ["machine_id", "=", record.remote_machine_id],
    ]);

    match remote
        .search_read(
            models::ATTENDANCE,
            domain,
            &["timestamp"],
            Some("timestamp desc"),
            Some(1),
        )
        .await
    {
        Ok(rows) => rows
            .first()
            .and_then(|row| row.get("timestamp"))
            .and_then(|v| v.as_str())
            .and_then(remote::parse_wire_time),
        Err(e) => {
            warn!(user = %record.user_id, error = %e, "remote latest lookup failed, treating as absent");
            None
        }
    }
}

/// Sends the payload batch (if any) and, only on success, marks the whole
/// to-mark batch synced in one statement. On failure both batches are
/// dropped so the untouched rows retry next pass.
async fn flush_chunk(
    db: &Database,
    remote: &dyn RemoteClient,
    payload_batch: &mut Vec<serde_json::Value>,
    mark_batch: &mut Vec<i64>,
) -> SyncResult<usize> {
    if mark_batch.is_empty() {
        return Ok(0);
    }

    if !payload_batch.is_empty() {
        if let Err(e) = remote.create(models::ATTENDANCE, payload_batch.clone()).await {
            warn!(size = payload_batch.len(), error = %e, "attendance chunk create failed");
            audit(
                db,
                None,
                AuditOp::Error,
                &format!("failed to create attendance chunk: {e}"),
            )
            .await;
            payload_batch.clear();
            mark_batch.clear();
            return Ok(0);
        }
    }

    let sent = payload_batch.len();
    db.attendance().mark_synced(mark_batch, Utc::now()).await?;

    payload_batch.clear();
    mark_batch.clear();
    Ok(sent)
}
