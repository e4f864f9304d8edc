//! Failures while installing the global subscriber.

use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry setup.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Logging could not be set up.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Another global subscriber is already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Registry error.
        #[source]
        source: TryInitError,
    },
}
