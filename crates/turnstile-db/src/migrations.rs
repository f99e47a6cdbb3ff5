//! # Database Migrations
//!
//! Embedded SQL migrations from `migrations/sqlite/` at the workspace
//! root. Add new files as `NNN_description.sql`; never edit applied ones.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Migrations embedded into the binary at compile time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations in order. Idempotent; each migration is
/// tracked in `_sqlx_migrations` and applied in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("checking for pending migrations");
    MIGRATOR.run(pool).await?;
    info!("all migrations applied");
    Ok(())
}

/// Returns (total embedded, applied) migration counts, for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
