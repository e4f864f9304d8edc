use std::sync::Arc;

use rtc_config::{
    ConfigFacade, ConfigService, MemoryValuesStore, MetadataStore, PgMetadataStore,
    ProjectFilter, ValuesStore,
};
use rtc_telemetry::{AppSpanGuard, LoggingConfig};
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::settings::{AppSettings, ValuesBackend, ValuesStorageSettings};

/// Dependencies required to run the server.
pub struct BootstrapDependencies {
    config: ConfigService,
}

impl BootstrapDependencies {
    /// Connect both stores described by `settings` and build the engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the DSN is missing or either store cannot be
    /// reached.
    pub async fn from_settings(settings: &AppSettings) -> AppResult<Self> {
        let dsn = settings.database_url()?;
        let metadata = PgMetadataStore::connect(
            dsn,
            settings.storage.max_connections,
            settings.storage.acquire_timeout(),
        )
        .await
        .map_err(|err| AppError::config("metadata_store.connect", err))?;
        let values = connect_values(&settings.values_storage).await?;
        Ok(Self::from_stores(Arc::new(metadata), values))
    }

    /// Build the engine over already-connected stores.
    #[must_use]
    pub fn from_stores(metadata: Arc<dyn MetadataStore>, values: Arc<dyn ValuesStore>) -> Self {
        Self {
            config: ConfigService::new(metadata, values),
        }
    }

    /// Engine handle.
    #[must_use]
    pub const fn config(&self) -> &ConfigService {
        &self.config
    }
}

async fn connect_values(settings: &ValuesStorageSettings) -> AppResult<Arc<dyn ValuesStore>> {
    match settings.backend {
        ValuesBackend::Memory => {
            warn!(
                prefix = %settings.prefix,
                "values are kept in process memory and lost on restart"
            );
            Ok(Arc::new(MemoryValuesStore::new(&settings.prefix)))
        }
        ValuesBackend::Etcd => connect_etcd(settings).await,
    }
}

#[cfg(feature = "etcd")]
async fn connect_etcd(settings: &ValuesStorageSettings) -> AppResult<Arc<dyn ValuesStore>> {
    use rtc_config::{EtcdValuesConfig, EtcdValuesStore};

    let mut config = EtcdValuesConfig {
        prefix: settings.prefix.clone(),
        dial_timeout: settings.dial_timeout(),
        ..EtcdValuesConfig::default()
    };
    if !settings.endpoints.is_empty() {
        config.endpoints.clone_from(&settings.endpoints);
    }
    let store = EtcdValuesStore::connect(&config)
        .await
        .map_err(|err| AppError::values("values_store.connect", err))?;
    info!(endpoints = ?config.endpoints, prefix = %settings.prefix, "values store connected");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
#[allow(clippy::unused_async)]
async fn connect_etcd(_settings: &ValuesStorageSettings) -> AppResult<Arc<dyn ValuesStore>> {
    Err(AppError::InvalidConfig {
        field: "values_storage.backend",
        reason: "etcd support is not compiled in",
        value: Some("etcd".to_string()),
    })
}

/// Entry point for the server boot sequence.
///
/// # Errors
///
/// Returns an error if settings, logging or store connections fail.
pub async fn run_app() -> AppResult<()> {
    let settings = AppSettings::load()?;
    let logging = LoggingConfig {
        level: &settings.logging.level,
        format: settings.log_format(),
        build_sha: option_env!("RTC_BUILD_SHA").unwrap_or("dev"),
    };
    rtc_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = AppSpanGuard::new("rtc");

    info!("RTC bootstrap starting");
    let dependencies = match BootstrapDependencies::from_settings(&settings).await {
        Ok(dependencies) => dependencies,
        Err(err) => {
            error!(error = %err, "bootstrap failed");
            return Err(err);
        }
    };
    run_app_with(dependencies).await
}

/// Serve until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error when the startup project listing or the signal listener
/// fails.
pub async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let page = dependencies
        .config()
        .list_projects(&ProjectFilter::default())
        .await
        .map_err(|err| AppError::config("config_service.list_projects", err))?;
    info!(projects = page.total, "configuration engine ready");

    tokio::signal::ctrl_c()
        .await
        .map_err(|source| AppError::Io {
            operation: "signal.ctrl_c",
            path: None,
            source,
        })?;
    info!("shutdown signal received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_config::MemoryMetadataStore;

    #[tokio::test]
    async fn missing_dsn_fails_before_connecting() {
        let settings = AppSettings::default();
        let err = BootstrapDependencies::from_settings(&settings)
            .await
            .err()
            .map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("missing environment configuration"));
    }

    #[tokio::test]
    async fn stores_are_wired_into_the_engine() -> anyhow::Result<()> {
        let dependencies = BootstrapDependencies::from_stores(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryValuesStore::new("rtc")),
        );
        dependencies
            .config()
            .create_project("admin", "billing", "")
            .await?;
        let page = dependencies
            .config()
            .list_projects(&ProjectFilter::default())
            .await?;
        assert_eq!(page.total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn memory_values_backend_is_opt_in() -> anyhow::Result<()> {
        let settings = ValuesStorageSettings {
            backend: ValuesBackend::Memory,
            ..ValuesStorageSettings::default()
        };
        let store = connect_values(&settings).await?;
        assert!(store.entries_by_path("").await?.is_empty());
        Ok(())
    }

    #[cfg(not(feature = "etcd"))]
    #[tokio::test]
    async fn etcd_backend_without_etcd_support_is_rejected() {
        let err = connect_values(&ValuesStorageSettings::default()).await.err();
        assert!(matches!(
            err,
            Some(AppError::InvalidConfig {
                field: "values_storage.backend",
                ..
            })
        ));
    }
}
