//! # Device Capability Seam
//!
//! The terminal protocol client is an external collaborator; the engine
//! only needs the capability below. A session is a scoped resource:
//! acquired before any read, released on every exit path, never retried
//! within the same fetch attempt.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Device failures. All of these are transient from the engine's point
/// of view: the fetch that hit one is abandoned and the next scheduled
/// run tries again.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Could not establish a session.
    #[error("connect to {address}:{port} failed: {reason}")]
    Connect {
        address: String,
        port: u16,
        reason: String,
    },

    /// The device did not answer within the timeout.
    #[error("device timed out after {0:?}")]
    Timeout(Duration),

    /// A read on an established session failed.
    #[error("device read failed: {0}")]
    Read(String),
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// A user as enrolled on the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledUser {
    /// Device-internal numeric id.
    pub device_uid: i64,
    /// Business user id.
    pub user_id: String,
    /// Display name.
    pub name: String,
}

/// A clock event as reported by the terminal. The timestamp is the
/// device's naive wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEvent {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
}

/// An established device session.
#[async_trait]
pub trait DeviceSession: Send {
    /// Lists all enrolled users.
    async fn users(&mut self) -> DeviceResult<Vec<EnrolledUser>>;

    /// Lists all attendance events the device currently holds.
    async fn attendance(&mut self) -> DeviceResult<Vec<ClockEvent>>;

    /// Reads the device serial number.
    async fn serial_number(&mut self) -> DeviceResult<String>;

    /// Releases the connection. Infallible: implementations log and
    /// swallow transport errors on teardown.
    async fn disconnect(&mut self);
}

/// Capability to open sessions against terminals.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Opens a session to one terminal.
    async fn connect(
        &self,
        address: &str,
        port: u16,
        passcode: &str,
        timeout: Duration,
    ) -> DeviceResult<Box<dyn DeviceSession>>;
}
