//! # Domain Types
//!
//! Core entities for the Turnstile relay.
//!
//! ## Entity Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Entities                                   │
//! │                                                                     │
//! │  ┌──────────────┐ 1     n ┌──────────────┐                         │
//! │  │   Machine    │─────────│ MachineUser  │                         │
//! │  │ ──────────── │         │ ──────────── │                         │
//! │  │ address:port │ 1     n │ user_id      │  UNIQUE per machine     │
//! │  │ remote_id?   │─────────│ synced_at?   │  ← push watermark       │
//! │  │ timezone?    │         └──────────────┘                         │
//! │  └──────┬───────┘                                                   │
//! │         │ 1              ┌──────────────────┐                       │
//! │         └────────────────│ AttendanceRecord │                       │
//! │         │              n │ ──────────────── │                       │
//! │         │                │ timestamp (naive)│  UNIQUE               │
//! │         │                │ synced_at?       │  (machine,user,ts)    │
//! │         │ 1              └──────────────────┘                       │
//! │         └────────────────┌──────────────┐                           │
//! │                        n │  AuditEntry  │  append-only              │
//! │                          └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deleting a machine cascades to its users, attendance and audit rows.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Machine
// =============================================================================

/// A registered attendance terminal.
///
/// Owned by configuration; the engine only reads it, except for three
/// derived fields it writes back: `last_connected`, `serial_number` and
/// the remote linkage (`remote_id` + `timezone`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Machine {
    /// Local identifier.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Network address (IP or hostname).
    pub address: String,

    /// Device port.
    pub port: u16,

    /// Device communication passcode.
    pub passcode: String,

    /// Serial number read from the device, once connected at least once.
    pub serial_number: Option<String>,

    /// Last successful device connection.
    pub last_connected: Option<DateTime<Utc>>,

    /// Name of the counterpart machine on the remote system.
    pub remote_name: Option<String>,

    /// Remote-system entity id, set by the link operation.
    pub remote_id: Option<i64>,

    /// IANA timezone the device clock runs in, set by the link operation.
    pub timezone: Option<String>,
}

impl Machine {
    /// Returns true if this machine is linked to a remote entity and its
    /// records are eligible for pushing.
    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Payload for registering a machine.
#[derive(Debug, Clone)]
pub struct NewMachine {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub passcode: String,
    pub remote_name: Option<String>,
    pub timezone: Option<String>,
}

impl NewMachine {
    /// Factory default port for the supported terminal family.
    pub const DEFAULT_PORT: u16 = 4370;

    /// Factory default communication passcode.
    pub const DEFAULT_PASSCODE: &'static str = "0";

    /// Creates a registration with factory-default port and passcode.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        NewMachine {
            name: name.into(),
            address: address.into(),
            port: Self::DEFAULT_PORT,
            passcode: Self::DEFAULT_PASSCODE.to_string(),
            remote_name: None,
            timezone: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = passcode.into();
        self
    }

    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    pub fn timezone(mut self, zone: impl Into<String>) -> Self {
        self.timezone = Some(zone.into());
        self
    }
}

// =============================================================================
// Machine User
// =============================================================================

/// A user enrolled on one machine.
///
/// One row per (machine, business user id). Fetch upserts these rows,
/// overwriting `device_uid`/`name` but preserving `synced_at`; Sync sets
/// `synced_at` once the user has been created remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MachineUser {
    /// Local identifier.
    pub id: i64,

    /// Owning machine.
    pub machine_id: i64,

    /// Device-internal numeric id.
    pub device_uid: i64,

    /// Business user id as enrolled on the device.
    pub user_id: String,

    /// Display name as enrolled on the device.
    pub name: String,

    /// When this user was pushed to the remote system. `None` = pending.
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Attendance Record
// =============================================================================

/// One clock event reported by a machine.
///
/// `timestamp` is naive: the wall-clock time the device reported, with no
/// embedded zone. The machine's configured timezone (if any) is applied
/// only when the record leaves for the remote system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AttendanceRecord {
    /// Local identifier.
    pub id: i64,

    /// Owning machine.
    pub machine_id: i64,

    /// Business user id.
    pub user_id: String,

    /// Deterministic event identifier, see [`crate::time::event_uid`].
    pub event_uid: String,

    /// Device wall-clock time of the event.
    pub timestamp: NaiveDateTime,

    /// When this record was covered by a successful push. `None` = pending.
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Audit Log
// =============================================================================

/// Operation tag for audit entries.
///
/// The audit log is the only operator-facing log surface, so tags are a
/// closed set rather than free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOp {
    /// Per-machine device ingestion.
    Fetch,
    /// Push pass to the remote system.
    Sync,
    /// Scheduler lifecycle and run dispatch.
    Scheduler,
    /// Age-based pruning.
    Retention,
    /// Manual connectivity check.
    TestConnection,
    /// Linking a machine to its remote counterpart.
    LinkMachine,
    /// Any failed operation.
    Error,
}

impl AuditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOp::Fetch => "fetch",
            AuditOp::Sync => "sync",
            AuditOp::Scheduler => "scheduler",
            AuditOp::Retention => "retention",
            AuditOp::TestConnection => "test_connection",
            AuditOp::LinkMachine => "link_machine",
            AuditOp::Error => "error",
        }
    }
}

impl std::fmt::Display for AuditOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only audit entry. Never mutated, only inserted and pruned
/// by age.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditEntry {
    /// Local identifier.
    pub id: i64,

    /// Machine the entry concerns, or `None` for system-wide entries.
    pub machine_id: Option<i64>,

    /// When the entry was written.
    pub timestamp: DateTime<Utc>,

    /// Operation tag, see [`AuditOp`].
    pub operation: String,

    /// Free-text message.
    pub message: String,
}

// =============================================================================
// Tests
// =============================================================================
