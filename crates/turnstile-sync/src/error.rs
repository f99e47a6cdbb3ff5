//! # Engine Error Types
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Error                 Isolation boundary                           │
//! │  ────────────────────  ───────────────────────────────────────────  │
//! │  Device(..)            one machine's fetch; no intra-run retry,     │
//! │                        naturally retried next scheduled run         │
//! │  RemoteAuth(..)        aborts the entire sync pass                  │
//! │  RemoteWrite(..)       one chunk/record; local state unchanged so   │
//! │                        the next pass retries automatically          │
//! │  Db(..)                propagated to the caller                     │
//! │                                                                     │
//! │  Duplicate attendance keys are absorbed by insert-or-ignore and     │
//! │  never become errors. Nothing here stops the scheduler.             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::device::DeviceError;
use turnstile_db::DbError;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error covering fetch, push, retention and scheduling failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient device failure (connect or read). Isolated to the
    /// machine it occurred on.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Remote authentication failed; the sync pass is aborted.
    #[error("remote authentication failed: {0}")]
    RemoteAuth(String),

    /// A remote create call failed; isolated to its chunk or record.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// Local store failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The machine has no remote linkage yet.
    #[error("machine {0} is not linked to a remote entity")]
    NotLinked(i64),

    /// Linking was requested but no remote name is configured.
    #[error("machine {0} has no remote name configured")]
    MissingRemoteName(i64),

    /// Linking found no remote entity with the configured name.
    #[error("no remote machine named '{0}'")]
    RemoteEntityNotFound(String),

    /// Linking found more than one remote entity with the name.
    #[error("multiple remote machines named '{0}'")]
    AmbiguousRemoteEntity(String),
}

impl SyncError {
    /// Returns true if this error aborts an entire sync pass rather than
    /// a single chunk or record.
    pub fn aborts_pass(&self) -> bool {
        matches!(self, SyncError::RemoteAuth(_) | SyncError::Db(_))
    }
}
