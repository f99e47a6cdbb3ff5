//! # Fetch Component
//!
//! Per-machine incremental ingestion from a terminal into the staging
//! store. One fetch is fully independent of every other machine's fetch;
//! the scheduler spawns one task per machine and a hung device stalls
//! only its own task.
//!
//! ## Watermark Rule
//! The fetch lower bound is the newest stored device timestamp for the
//! machine (or `now − days_back` on first contact), truncated to the
//! start of that calendar day so a partial day is always re-read in
//! full. Re-read events are absorbed by the (machine, user, timestamp)
//! uniqueness key.

use std::time::Duration;

use chrono::{Duration as TimeDelta, Local, Utc};
use tracing::{debug, info, warn};

use crate::audit::audit;
use crate::device::{DeviceClient, DeviceSession};
use crate::error::SyncResult;
use turnstile_core::{time, AuditOp, Machine, Settings};
use turnstile_db::Database;

/// Device timeout for a full fetch session.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(15);

/// Counts reported by one fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Users enrolled on the device (all upserted).
    pub users_seen: usize,
    /// Attendance rows actually inserted (duplicates excluded).
    pub attendance_inserted: usize,
}

/// Fetches users and new attendance from one machine.
///
/// Failures are audited and returned; the caller decides whether other
/// machines keep going (the scheduler always does).
pub async fn fetch_machine(
    db: &Database,
    device: &dyn DeviceClient,
    machine: &Machine,
    settings: &Settings,
) -> SyncResult<FetchOutcome> {
    audit(db, Some(machine.id), AuditOp::Fetch, "starting data fetch").await;

    match fetch_inner(db, device, machine, settings).await {
        Ok(outcome) => {
            info!(
                machine = machine.id,
                users = outcome.users_seen,
                inserted = outcome.attendance_inserted,
                "fetch complete"
            );
            audit(
                db,
                Some(machine.id),
                AuditOp::Fetch,
                &format!(
                    "fetch complete; users: {}, new records: {}",
                    outcome.users_seen, outcome.attendance_inserted
                ),
            )
            .await;
            Ok(outcome)
        }
        Err(e) => {
            warn!(machine = machine.id, error = %e, "fetch failed");
            audit(
                db,
                Some(machine.id),
                AuditOp::Error,
                &format!("fetch failed: {e}"),
            )
            .await;
            Err(e)
        }
    }
}

async fn fetch_inner(
    db: &Database,
    device: &dyn DeviceClient,
    machine: &Machine,
    settings: &Settings,
) -> SyncResult<FetchOutcome> {
    // Events carry the device's naive wall clock, so the bounds are
    // computed on the host wall clock rather than UTC.
    let fetch_start = time::truncate_to_seconds(Local::now().naive_local());

    let watermark = match db.attendance().latest_timestamp(machine.id).await? {
        Some(latest) => {
            audit(
                db,
                Some(machine.id),
                AuditOp::Fetch,
                &format!("last stored record at {latest}; fetching newer"),
            )
            .await;
            latest
        }
        None => {
            audit(
                db,
                Some(machine.id),
                AuditOp::Fetch,
                &format!(
                    "no stored records; fetching the last {} days",
                    settings.days_back
                ),
            )
            .await;
            fetch_start - TimeDelta::days(i64::from(settings.days_back))
        }
    };
    // Always re-read the watermark's day in full.
    let watermark = time::start_of_day(watermark);

    debug!(machine = machine.id, %watermark, %fetch_start, "fetch window");

    let mut session = device
        .connect(&machine.address, machine.port, &machine.passcode, DEVICE_TIMEOUT)
        .await?;

    // The session is released on every exit path below.
    let result = ingest(db, machine, session.as_mut(), watermark, fetch_start).await;
    session.disconnect().await;
    result
}

async fn ingest(
    db: &Database,
    machine: &Machine,
    session: &mut dyn DeviceSession,
    watermark: chrono::NaiveDateTime,
    fetch_start: chrono::NaiveDateTime,
) -> SyncResult<FetchOutcome> {
    let serial = session.serial_number().await?;
    db.machines()
        .record_connection(machine.id, Utc::now(), &serial)
        .await?;

    // Users first, so attendance never references a user the store has
    // not seen.
    let users = session.users().await?;
    for user in &users {
        db.users()
            .upsert_enrolled(machine.id, user.device_uid, &user.user_id, &user.name)
            .await?;
    }
    audit(
        db,
        Some(machine.id),
        AuditOp::Fetch,
        &format!("users synchronized: {}", users.len()),
    )
    .await;

    let events = session.attendance().await?;
    let mut inserted = 0;
    for event in &events {
        let ts = time::truncate_to_seconds(event.timestamp);

        // Events ahead of the fetch start are clock-skew noise; events at
        // or before the watermark were ingested by an earlier fetch.
        if ts <= watermark || ts > fetch_start {
            continue;
        }

        let uid = time::event_uid(machine.id, &event.user_id, ts);
        if db
            .attendance()
            .insert_if_absent(machine.id, &event.user_id, &uid, ts)
            .await?
        {
            inserted += 1;
        }
    }

    Ok(FetchOutcome {
        users_seen: users.len(),
        attendance_inserted: inserted,
    })
}
