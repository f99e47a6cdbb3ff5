//! # Database Error Types

use thiserror::Error;

/// Database operation errors.
///
/// Wraps sqlx errors with enough categorization for the engine to tell
/// an absorbed duplicate from a real failure.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// Attendance inserts never surface this (they use insert-or-ignore);
    /// it exists for the remaining unique keys.
    #[error("duplicate {field}: already exists")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and id.
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite spells constraint failures out in the message:
                // "UNIQUE constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { field }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
