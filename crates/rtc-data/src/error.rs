//! Failures reported by the `PostgreSQL` access layer.

use thiserror::Error;

/// Result alias for data layer calls.
pub type Result<T> = std::result::Result<T, DataError>;

/// Why a migration or query did not complete.
#[derive(Debug, Error)]
pub enum DataError {
    /// Applying the embedded schema failed.
    #[error("migration failed")]
    MigrationFailed {
        /// Migrator error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A statement failed for any reason other than a duplicate key.
    #[error("database operation failed")]
    QueryFailed {
        /// Statement label.
        operation: &'static str,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },
    /// A duplicate name hit a unique index.
    ///
    /// Kept apart from [`DataError::QueryFailed`] so callers can answer
    /// "already exists" without inspecting driver codes.
    #[error("unique constraint violated")]
    UniqueViolation {
        /// Statement label.
        operation: &'static str,
        /// Index reported by the server.
        constraint: Option<String>,
    },
}

impl DataError {
    /// `true` for [`DataError::UniqueViolation`].
    #[must_use]
    pub const fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for DataError {
    fn from(source: sqlx::Error) -> Self {
        classify("sqlx operation", source)
    }
}

/// Label a driver error, splitting out duplicate-key failures.
pub(crate) fn classify(operation: &'static str, source: sqlx::Error) -> DataError {
    match &source {
        sqlx::Error::Database(db) if db.is_unique_violation() => DataError::UniqueViolation {
            operation,
            constraint: db.constraint().map(str::to_string),
        },
        _ => DataError::QueryFailed { operation, source },
    }
}
