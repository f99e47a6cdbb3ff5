//! # turnstile-db: Database Layer
//!
//! SQLite staging store for the Turnstile relay.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Turnstile Data Flow                            │
//! │                                                                     │
//! │  Device Client ──► Fetch ──► turnstile-db ──► Sync ──► Remote      │
//! │                               (THIS CRATE)                          │
//! │                                                                     │
//! │   ┌───────────────┐   ┌─────────────────┐   ┌──────────────┐       │
//! │   │   Database    │   │  Repositories   │   │  Migrations  │       │
//! │   │   (pool.rs)   │◄──│ machine / user  │   │  (embedded)  │       │
//! │   │   SqlitePool  │   │ attendance /    │   │  001_init    │       │
//! │   │   WAL mode    │   │ audit / settings│   │              │       │
//! │   └───────────────┘   └─────────────────┘   └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write issued here is a single atomic statement (upsert,
//! insert-or-ignore, batch update); concurrent fetch tasks and the sync
//! pass share the pool without cross-statement transactions.
//!
//! ## Usage
//! ```rust,ignore
//! use turnstile_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("relay.db")).await?;
//! let machines = db.machines().all().await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::attendance::{AttendanceRepository, PendingAttendance};
pub use repository::audit::AuditRepository;
pub use repository::machine::MachineRepository;
pub use repository::settings::SettingsRepository;
pub use repository::user::{PendingUser, UserRepository};
