//! # Manual Operations
//!
//! One-shot operations outside the scheduled cycle: probing a terminal
//! and linking a machine to its remote counterpart. Both write back the
//! derived machine fields the rest of the engine relies on.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::audit;
use crate::device::DeviceClient;
use crate::error::{SyncError, SyncResult};
use crate::remote::{models, RemoteClient};
use turnstile_core::{AuditOp, Machine};
use turnstile_db::Database;

/// Short device timeout for connectivity probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes a terminal: connect, read the serial number, write back
/// `last_connected` and `serial_number`. Returns the serial.
pub async fn test_connection(
    db: &Database,
    device: &dyn DeviceClient,
    machine: &Machine,
) -> SyncResult<String> {
    audit(
        db,
        Some(machine.id),
        AuditOp::TestConnection,
        &format!("connecting to {}:{}", machine.address, machine.port),
    )
    .await;

    let mut session = match device
        .connect(&machine.address, machine.port, &machine.passcode, PROBE_TIMEOUT)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(machine = machine.id, error = %e, "connection test failed");
            audit(
                db,
                Some(machine.id),
                AuditOp::Error,
                &format!("connection test failed: {e}"),
            )
            .await;
            return Err(e.into());
        }
    };

    let serial = session.serial_number().await;
    session.disconnect().await;

    match serial {
        Ok(serial) => {
            db.machines()
                .record_connection(machine.id, Utc::now(), &serial)
                .await?;
            info!(machine = machine.id, %serial, "connection test succeeded");
            audit(
                db,
                Some(machine.id),
                AuditOp::TestConnection,
                &format!("connected; serial {serial}"),
            )
            .await;
            Ok(serial)
        }
        Err(e) => {
            audit(
                db,
                Some(machine.id),
                AuditOp::Error,
                &format!("connection test failed: {e}"),
            )
            .await;
            Err(e.into())
        }
    }
}

/// Looks up the machine's configured `remote_name` on the remote system
/// and stores the resulting linkage (remote id + timezone). Returns the
/// remote id.
pub async fn link_machine(
    db: &Database,
    remote: &dyn RemoteClient,
    machine: &Machine,
) -> SyncResult<i64> {
    let name = machine
        .remote_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(SyncError::MissingRemoteName(machine.id))?;

    audit(
        db,
        Some(machine.id),
        AuditOp::LinkMachine,
        &format!("searching remote system for '{name}'"),
    )
    .await;

    let result = link_inner(db, remote, machine, name).await;
    if let Err(e) = &result {
        warn!(machine = machine.id, error = %e, "link failed");
        audit(
            db,
            Some(machine.id),
            AuditOp::Error,
            &format!("link failed: {e}"),
        )
        .await;
    }
    result
}

async fn link_inner(
    db: &Database,
    remote: &dyn RemoteClient,
    machine: &Machine,
    name: &str,
) -> SyncResult<i64> {
    remote
        .authenticate()
        .await
        .map_err(|e| SyncError::RemoteAuth(e.to_string()))?;

    let matches = remote
        .search_read(
            models::MACHINE,
            json!([["name", "=", name]]),
            &["id", "timezone"],
            None,
            Some(2),
        )
        .await
        .map_err(|e| SyncError::RemoteWrite(e.to_string()))?;

    let entity = match matches.len() {
        0 => return Err(SyncError::RemoteEntityNotFound(name.to_string())),
        1 => &matches[0],
        _ => return Err(SyncError::AmbiguousRemoteEntity(name.to_string())),
    };

    let remote_id = entity
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| SyncError::RemoteWrite("remote machine record has no id".into()))?;

    // The remote reports an unset selection field as boolean false;
    // only a non-empty string counts as a timezone.
    let timezone = entity
        .get("timezone")
        .and_then(|v| v.as_str())
        .filter(|z| !z.is_empty());

    db.machines()
        .set_remote_link(machine.id, remote_id, timezone)
        .await?;

    info!(machine = machine.id, remote_id, ?timezone, "machine linked");
    audit(
        db,
        Some(machine.id),
        AuditOp::LinkMachine,
        &format!(
            "linked to remote id {remote_id}, timezone {}",
            timezone.unwrap_or("none")
        ),
    )
    .await;

    Ok(remote_id)
}
