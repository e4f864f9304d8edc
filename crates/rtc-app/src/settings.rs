//! Server settings loaded from a YAML file with environment overrides.
//!
//! The file named by `RTC_CONFIG` (default `config.yaml`) is optional; a
//! missing file yields defaults. `DATABASE_URL` and `RTC_ETCD_ENDPOINTS`
//! override the corresponding file values. Values live in etcd unless
//! `values_storage.backend` is set to `memory`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rtc_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "RTC_CONFIG";
/// Settings file used when `RTC_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Environment variable overriding the metadata store DSN.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Environment variable overriding the etcd endpoints (comma separated).
pub const ETCD_ENDPOINTS_ENV: &str = "RTC_ETCD_ENDPOINTS";

/// Top-level server settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSettings {
    /// Log output.
    pub logging: LoggingSettings,
    /// Metadata store connection.
    pub storage: StorageSettings,
    /// Values store connection.
    pub values_storage: ValuesStorageSettings,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level directive; `RUST_LOG` still wins.
    pub level: String,
    /// Output format; inferred from the build profile when unset.
    pub format: Option<LogFormat>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

/// Metadata store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// `PostgreSQL` connection string.
    pub dsn: Option<String>,
    /// Pool size.
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dsn: None,
            max_connections: 8,
            acquire_timeout_secs: 10,
        }
    }
}

impl StorageSettings {
    /// Pool acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Where live values are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuesBackend {
    /// etcd cluster named by `endpoints`.
    #[default]
    Etcd,
    /// Process memory; values are lost on restart.
    Memory,
}

/// Values store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValuesStorageSettings {
    /// Store kind.
    pub backend: ValuesBackend,
    /// etcd endpoints; empty uses `localhost:2379`.
    pub endpoints: Vec<String>,
    /// Milliseconds to wait for the etcd connection.
    pub dial_timeout_ms: u64,
    /// Key prefix shared with clients.
    pub prefix: String,
}

impl Default for ValuesStorageSettings {
    fn default() -> Self {
        Self {
            backend: ValuesBackend::Etcd,
            endpoints: Vec::new(),
            dial_timeout_ms: 1_000,
            prefix: rtc_config::defaults::DEFAULT_VALUES_PREFIX.to_string(),
        }
    }
}

impl ValuesStorageSettings {
    /// etcd dial timeout.
    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

impl AppSettings {
    /// Load settings using the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings file cannot be read or parsed, or
    /// holds invalid values.
    pub fn load() -> AppResult<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load settings resolving environment variables through `env`.
    ///
    /// # Errors
    ///
    /// Returns an error when the settings file cannot be read or parsed, or
    /// holds invalid values.
    pub fn load_with<F>(env: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = env(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        let mut settings = Self::from_file(&path)?;
        settings.apply_env(&env);
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(AppError::Io {
                    operation: "settings.read",
                    path: Some(path.to_path_buf()),
                    source,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|source| AppError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dsn) = env(DATABASE_URL_ENV).filter(|dsn| !dsn.is_empty()) {
            self.storage.dsn = Some(dsn);
        }
        if let Some(endpoints) = env(ETCD_ENDPOINTS_ENV) {
            self.values_storage.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.storage.max_connections == 0 {
            return Err(AppError::InvalidConfig {
                field: "storage.max_connections",
                reason: "zero",
                value: Some("0".to_string()),
            });
        }
        Ok(())
    }

    /// Metadata store DSN.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MissingEnv`] when neither the file nor
    /// `DATABASE_URL` provides one.
    pub fn database_url(&self) -> AppResult<&str> {
        self.storage
            .dsn
            .as_deref()
            .filter(|dsn| !dsn.is_empty())
            .ok_or(AppError::MissingEnv {
                name: DATABASE_URL_ENV,
            })
    }

    /// Effective log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.logging.format.unwrap_or_default()
    }
}
