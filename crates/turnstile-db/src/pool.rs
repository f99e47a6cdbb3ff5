//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! WAL journal mode is enabled so concurrent per-machine fetch tasks can
//! read while the sync pass writes, and foreign keys are switched on for
//! the machine → users/attendance/audit cascades.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::attendance::AttendanceRepository;
use crate::repository::audit::AuditRepository;
use crate::repository::machine::MachineRepository;
use crate::repository::settings::SettingsRepository;
use crate::repository::user::UserRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/turnstile/relay.db").max_connections(5);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Pool acquire timeout.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration with the given path. The file is created
    /// if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// In-memory SQLite is per-connection, so the pool is pinned to a
    /// single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cheap to clone; all clones share one pool. Components hold a
/// `Database` and reach tables through the accessor methods:
///
/// ```rust,ignore
/// let watermark = db.attendance().latest_timestamp(machine.id).await?;
/// db.audit().append(Some(machine.id), AuditOp::Fetch, "starting").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates the connection pool and, unless disabled, runs migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "initializing database connection"
        );

        // sqlite://path with mode=rwc creates the file if missing
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "database pool created");

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies all pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns a reference to the connection pool for queries not covered
    /// by the repositories.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the machine repository.
    pub fn machines(&self) -> MachineRepository {
        MachineRepository::new(self.pool.clone())
    }

    /// Returns the enrolled-user repository.
    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    /// Returns the attendance repository.
    pub fn attendance(&self) -> AttendanceRepository {
        AttendanceRepository::new(self.pool.clone())
    }

    /// Returns the audit log repository.
    pub fn audit(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }

    /// Returns the settings repository.
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    /// Closes the pool. Repository calls fail afterwards.
    pub async fn close(&self) {
        info!("closing database connection pool");
        self.pool.close().await;
    }

    /// Checks that the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
