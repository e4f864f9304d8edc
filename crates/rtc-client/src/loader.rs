//! Process-wide configuration access.
//!
//! [`Loader`] is an ordinary value that can be injected wherever configuration
//! is read. For call sites that prefer ambient access, a process-wide default
//! lives in a lock-guarded slot: it is seeded lazily from an [`EnvSource`]
//! named by `SERVICE_NAME` and replaced with [`set_default`]. Treat the slot
//! as process lifecycle state and swap it during startup.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::env::EnvSource;
use crate::error::SourceResult;
use crate::source::{ValueChangeCallback, ValueSource};
use crate::value::Value;

/// Variable naming the service for the default environment source.
pub const SERVICE_NAME_ENV: &str = "SERVICE_NAME";

static DEFAULT: Lazy<RwLock<Loader>> = Lazy::new(|| RwLock::new(Loader::from_env()));

/// Thin façade over one [`ValueSource`].
#[derive(Clone)]
pub struct Loader {
    source: Arc<dyn ValueSource>,
}

impl Loader {
    /// Wrap `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ValueSource>) -> Self {
        Self { source }
    }

    /// Environment-backed loader for the service named by `SERVICE_NAME`.
    #[must_use]
    pub fn from_env() -> Self {
        let service = std::env::var(SERVICE_NAME_ENV).unwrap_or_default();
        Self::new(Arc::new(EnvSource::new(&service)))
    }

    /// Underlying source.
    #[must_use]
    pub fn source(&self) -> Arc<dyn ValueSource> {
        Arc::clone(&self.source)
    }

    /// Resolve `key`, propagating errors.
    ///
    /// # Errors
    ///
    /// Returns the source's resolution error.
    pub async fn value(&self, key: &str) -> SourceResult<Value> {
        self.source.value(key).await
    }

    /// Resolve `key`, logging any error and returning the empty value.
    pub async fn get(&self, key: &str) -> Value {
        match self.source.value(key).await {
            Ok(value) => value,
            Err(err) => {
                error!(key, error = %err, "failed to resolve configuration value");
                Value::empty()
            }
        }
    }

    /// Register `callback` for changes of `key`.
    ///
    /// # Errors
    ///
    /// Returns the source's registration error.
    pub async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        self.source.watch_value(key, callback, cancel).await
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

/// Current process-wide loader.
#[must_use]
pub fn default_loader() -> Loader {
    match DEFAULT.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the process-wide loader.
pub fn set_default(loader: Loader) {
    match DEFAULT.write() {
        Ok(mut guard) => *guard = loader,
        Err(poisoned) => *poisoned.into_inner() = loader,
    }
}

/// Resolve `key` through the default loader.
///
/// # Errors
///
/// Returns the source's resolution error.
pub async fn value(key: &str) -> SourceResult<Value> {
    default_loader().value(key).await
}

/// Resolve `key` through the default loader, downgrading errors to the
/// empty value.
pub async fn get(key: &str) -> Value {
    default_loader().get(key).await
}

/// Watch `key` through the default loader.
///
/// # Errors
///
/// Returns the source's registration error.
pub async fn watch_value(
    key: &str,
    callback: ValueChangeCallback,
    cancel: CancellationToken,
) -> SourceResult<()> {
    default_loader()
        .watch_value(key, callback, cancel)
        .await
}
