//! # Remote Capability Seam
//!
//! The remote business system is reached over a request/response RPC
//! channel modeled by [`RemoteClient`]. Calls are blocking round-trips;
//! the engine issues a single sequential stream of them.
//!
//! ## Wire Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  model                        used for                              │
//! │  ───────────────────────────  ────────────────────────────────────  │
//! │  azk.machine                  link lookup (fields: id, timezone)    │
//! │  azk.machine.proxy.users      user creates                          │
//! │  azk.machine.proxy.attendance latest-timestamp reads + batch        │
//! │                               creates                               │
//! │                                                                     │
//! │  user payload        {uid, user_id, name, machine_id, raw_data}     │
//! │  attendance payload  {user_id, timestamp, machine_id, att_id}       │
//! │  timestamps          "%Y-%m-%d %H:%M:%S", UTC once zone-converted   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use thiserror::Error;

use turnstile_db::{PendingAttendance, PendingUser};

/// Remote model names.
pub mod models {
    /// Machine registry on the remote system.
    pub const MACHINE: &str = "azk.machine";
    /// Staged users as the remote system ingests them.
    pub const USER: &str = "azk.machine.proxy.users";
    /// Staged attendance as the remote system ingests it.
    pub const ATTENDANCE: &str = "azk.machine.proxy.attendance";
}

/// Timestamp format on the wire.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a timestamp for the wire.
pub fn format_wire_time(ts: NaiveDateTime) -> String {
    ts.format(WIRE_TIME_FORMAT).to_string()
}

/// Parses a wire timestamp; `None` for anything malformed.
pub fn parse_wire_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, WIRE_TIME_FORMAT).ok()
}

/// Builds the create payload for one staged user.
pub fn user_payload(user: &PendingUser) -> Value {
    json!({
        "uid": user.device_uid,
        "user_id": user.user_id,
        "name": user.name,
        "machine_id": user.remote_machine_id,
        "raw_data": "",
    })
}

/// Builds the create payload for one attendance record. `timestamp` is
/// the already-resolved wire timestamp (UTC when the machine has a zone,
/// the naive device time otherwise).
pub fn attendance_payload(record: &PendingAttendance, timestamp: NaiveDateTime) -> Value {
    json!({
        "user_id": record.user_id,
        "timestamp": format_wire_time(timestamp),
        "machine_id": record.remote_machine_id,
        "att_id": record.event_uid,
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Remote RPC failures as the capability reports them.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials were rejected.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The endpoint was unreachable or the round-trip failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The endpoint answered with something the engine cannot use.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Capability
// =============================================================================

/// Capability to talk to the remote business system.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Authenticates and returns the remote session uid.
    async fn authenticate(&self) -> RemoteResult<i64>;

    /// Reads records of `model` matching `domain`, optionally ordered and
    /// limited. Each record is a JSON object holding `fields`.
    async fn search_read(
        &self,
        model: &str,
        domain: Value,
        fields: &[&str],
        order: Option<&str>,
        limit: Option<u32>,
    ) -> RemoteResult<Vec<Value>>;

    /// Creates `records` of `model` in one call, returning their ids.
    async fn create(&self, model: &str, records: Vec<Value>) -> RemoteResult<Vec<i64>>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pending_record() -> PendingAttendance {
        PendingAttendance {
            id: 1,
            machine_id: 3,
            user_id: "1042".into(),
            event_uid: "3-1042-20240615083000".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 6, 15)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            remote_machine_id: 77,
            timezone: None,
        }
    }

    #[test]
    fn wire_time_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(format_wire_time(ts), "2024-06-15 08:30:00");
        assert_eq!(parse_wire_time("2024-06-15 08:30:00"), Some(ts));
        assert_eq!(parse_wire_time("garbage"), None);
    }

    #[test]
    fn attendance_payload_shape() {
        let record = pending_record();
        let payload = attendance_payload(&record, record.timestamp);
        assert_eq!(payload["user_id"], "1042");
        assert_eq!(payload["machine_id"], 77);
        assert_eq!(payload["att_id"], "3-1042-20240615083000");
        assert_eq!(payload["timestamp"], "2024-06-15 08:30:00");
    }

    #[test]
    fn user_payload_shape() {
        let user = PendingUser {
            id: 9,
            machine_id: 3,
            device_uid: 12,
            user_id: "1042".into(),
            name: "Ada".into(),
            remote_machine_id: 77,
        };
        let payload = user_payload(&user);
        assert_eq!(payload["uid"], 12);
        assert_eq!(payload["machine_id"], 77);
        assert_eq!(payload["raw_data"], "");
    }
}
