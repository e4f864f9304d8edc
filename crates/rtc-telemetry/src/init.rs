//! Subscriber installation for RTC binaries.
//!
//! Events go to stdout as pretty lines or JSON objects. A `RUST_LOG`
//! directive replaces the configured level. The first build SHA handed to
//! [`init_logging`] sticks for the life of the process.

use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::{Span, span::Entered};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Level used when neither settings nor `RUST_LOG` name one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Install the process-wide subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] if a subscriber is already
/// in place.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    BUILD_SHA.get_or_init(|| config.build_sha.to_owned());

    let json = config.format == LogFormat::Json;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(false)))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })
}

/// SHA recorded by [`init_logging`], or `dev` before it runs.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Inputs to [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// `EnvFilter` directive such as `info` or `rtc_config=debug`.
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Identifier attached to the `app` span.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::default(),
            build_sha: build_sha(),
        }
    }
}

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Coloured text for terminals.
    Pretty,
}

impl Default for LogFormat {
    /// `Pretty` in debug builds and `Json` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Holds the root `app` span open until dropped.
pub struct AppSpanGuard {
    _entered: Entered<'static>,
}

impl AppSpanGuard {
    /// Open the root span for `service`, tagged with [`build_sha`].
    #[must_use]
    pub fn new(service: &str) -> Self {
        // Leaked so the guard can borrow it for 'static; one per process.
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "app",
            service = %service,
            build_sha = %build_sha()
        )));
        Self {
            _entered: span.enter(),
        }
    }
}

impl std::fmt::Debug for AppSpanGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSpanGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_deserialize_from_settings_labels() {
        let parsed: Vec<LogFormat> = serde_yaml::from_str("[json, pretty]").unwrap();
        assert_eq!(parsed, [LogFormat::Json, LogFormat::Pretty]);
        assert!(serde_yaml::from_str::<LogFormat>("xml").is_err());
    }

    #[test]
    fn only_the_first_install_succeeds() {
        let config = LoggingConfig {
            level: "debug",
            format: LogFormat::Json,
            build_sha: "abc123",
        };
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::SubscriberInstall { .. })
        ));
        assert_eq!(build_sha(), "abc123");
    }
}
