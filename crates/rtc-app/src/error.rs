//! Errors surfaced while loading settings and wiring the server.
//!
//! Display strings stay fixed; the fields say which setting, operation or
//! path was involved. Sources are chained, not logged here.

use std::io;
use std::path::PathBuf;

use rtc_config::{ConfigError, ValuesError};
use rtc_telemetry::TelemetryError;
use thiserror::Error;

/// Result alias for server bootstrap.
pub type AppResult<T> = Result<T, AppError>;

/// Failure while starting or running the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required setting was absent from both the file and the environment.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Variable that would have supplied it.
        name: &'static str,
    },
    /// The settings file is not valid YAML for [`crate::AppSettings`].
    #[error("settings file is malformed")]
    Settings {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser error.
        source: serde_yaml::Error,
    },
    /// A setting parsed but holds an unusable value.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Dotted setting name.
        field: &'static str,
        /// Short rejection reason.
        reason: &'static str,
        /// Offending value, when printable.
        value: Option<String>,
    },
    /// The configuration engine or metadata store failed.
    #[error("configuration operation failed")]
    Config {
        /// Step that failed.
        operation: &'static str,
        /// Engine error.
        source: ConfigError,
    },
    /// The values store could not be reached.
    #[error("values store operation failed")]
    Values {
        /// Step that failed.
        operation: &'static str,
        /// Values-store error.
        source: ValuesError,
    },
    /// Logging could not be installed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Step that failed.
        operation: &'static str,
        /// Telemetry error.
        source: TelemetryError,
    },
    /// Reading a file or waiting for a signal failed.
    #[error("io operation failed")]
    Io {
        /// Step that failed.
        operation: &'static str,
        /// File involved, if any.
        path: Option<PathBuf>,
        /// OS error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    #[cfg(feature = "etcd")]
    pub(crate) const fn values(operation: &'static str, source: ValuesError) -> Self {
        Self::Values { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: TelemetryError) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn engine_failures_keep_the_operation_and_source() {
        let err = AppError::config(
            "metadata_store.connect",
            ConfigError::NotFound {
                entity: "project",
                name: "billing".to_string(),
            },
        );
        assert!(matches!(
            err,
            AppError::Config {
                operation: "metadata_store.connect",
                ..
            }
        ));
        assert_eq!(err.to_string(), "configuration operation failed");
        assert!(err.source().is_some());
    }

    #[test]
    fn missing_settings_name_their_variable() {
        let err = AppError::MissingEnv {
            name: "DATABASE_URL",
        };
        assert_eq!(err.to_string(), "missing environment configuration");
        assert!(matches!(
            err,
            AppError::MissingEnv {
                name: "DATABASE_URL"
            }
        ));
    }
}
