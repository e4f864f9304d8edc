//! Error types for configuration operations.

use thiserror::Error;

use crate::store::ValuesError;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A referenced entity does not exist.
    #[error("entity not found")]
    NotFound {
        /// Entity kind (`project`, `config`, ...).
        entity: &'static str,
        /// Name of the missing entity.
        name: String,
    },
    /// A unique entity already exists.
    #[error("entity already exists")]
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// Conflicting name.
        name: String,
    },
    /// Input failed validation.
    #[error("validation failed")]
    NotValid {
        /// Field or key that failed.
        field: String,
        /// Machine-readable reason.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The metadata store failed.
    #[error("metadata store operation failed")]
    Metadata {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: rtc_data::DataError,
    },
    /// The values store failed.
    #[error("values store operation failed")]
    Values {
        /// Operation identifier.
        operation: &'static str,
        /// Source values-store error.
        source: ValuesError,
    },
    /// A JSON payload could not be encoded or decoded.
    #[error("payload encoding failed")]
    Encode {
        /// Operation identifier.
        operation: &'static str,
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// The task settling a transaction did not complete.
    #[error("transaction settlement was interrupted")]
    Interrupted {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

/// Coarse classification used by callers that only branch on the domain
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// See [`ConfigError::NotFound`].
    NotFound,
    /// See [`ConfigError::AlreadyExists`].
    AlreadyExists,
    /// See [`ConfigError::NotValid`].
    NotValid,
    /// Any infrastructure failure.
    Internal,
}

impl ConfigError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::NotFound { .. } => ConfigErrorKind::NotFound,
            Self::AlreadyExists { .. } => ConfigErrorKind::AlreadyExists,
            Self::NotValid { .. } => ConfigErrorKind::NotValid,
            Self::Metadata { .. }
            | Self::Values { .. }
            | Self::Encode { .. }
            | Self::Interrupted { .. } => ConfigErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(entity: &'static str, name: &str) -> Self {
        Self::NotFound {
            entity,
            name: name.to_string(),
        }
    }

    pub(crate) fn not_valid(field: &str, reason: &'static str, value: Option<String>) -> Self {
        Self::NotValid {
            field: field.to_string(),
            reason,
            value,
        }
    }

    pub(crate) fn metadata(operation: &'static str) -> impl FnOnce(rtc_data::DataError) -> Self {
        move |source| Self::Metadata { operation, source }
    }

    pub(crate) fn values(operation: &'static str) -> impl FnOnce(ValuesError) -> Self {
        move |source| Self::Values { operation, source }
    }

    pub(crate) fn encode(operation: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Encode { operation, source }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
