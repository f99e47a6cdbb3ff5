//! # turnstile-sync: Synchronization Engine
//!
//! Moves attendance data from terminals, through the local staging store,
//! to the remote business system.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         One Scheduled Run                           │
//! │                                                                     │
//! │  ┌───────────┐   spawn per machine   ┌──────────────────────────┐  │
//! │  │ Scheduler │──────────────────────►│ Fetch (fetch.rs)         │  │
//! │  │           │                       │ device → staging store   │  │
//! │  │ Stopped ⇄ │   spawn once          └──────────────────────────┘  │
//! │  │ Running   │──────────────────────►┌──────────────────────────┐  │
//! │  │           │                       │ Sync (push.rs)           │  │
//! │  │           │   await               │ staging store → remote   │  │
//! │  │           │──────────────────────►└──────────────────────────┘  │
//! │  └───────────┘                       ┌──────────────────────────┐  │
//! │                                      │ Retention (retention.rs) │  │
//! │                                      └──────────────────────────┘  │
//! │                                                                     │
//! │  Machine failures are isolated per fetch task; a failed sync pass   │
//! │  leaves local watermarks untouched and is retried next run.         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`device`] / [`remote`] - black-box capability seams
//! - [`fetch`] - per-machine incremental ingestion
//! - [`push`] - the global sync pass with dedup and chunking
//! - [`retention`] - age-based pruning
//! - [`scheduler`] - the Stopped/Running driver
//! - [`ops`] - manual connectivity probe and remote linking
//! - [`testing`] - in-memory device/remote doubles

mod audit;

pub mod device;
pub mod error;
pub mod fetch;
pub mod ops;
pub mod push;
pub mod remote;
pub mod retention;
pub mod scheduler;
pub mod testing;

pub use device::{ClockEvent, DeviceClient, DeviceError, DeviceSession, EnrolledUser};
pub use error::{SyncError, SyncResult};
pub use fetch::{fetch_machine, FetchOutcome};
pub use ops::{link_machine, test_connection};
pub use push::{sync_all, SyncOutcome};
pub use remote::{RemoteClient, RemoteError};
pub use retention::RetentionOutcome;
pub use scheduler::{RunReport, Scheduler, SchedulerState, SchedulerStatus};
