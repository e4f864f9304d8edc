//! Remote watchable backend scoped to one release.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{SourceError, SourceResult};
use crate::source::{ValueChangeCallback, ValueSource};
use crate::value::Value;
use crate::watch::{WatchOptions, WatchQueue};

/// Default store-wide key prefix.
pub const DEFAULT_PREFIX: &str = "rtc";

/// A change observed on one remote key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteChange {
    /// Value before the change, empty when the key did not exist.
    pub previous: Value,
    /// Value after the change, empty when the key was deleted.
    pub current: Value,
}

/// Point reads and per-key change streams against a path-addressed store.
#[async_trait]
pub trait RemoteBackend: Send + Sync + 'static {
    /// Read the value stored at `path`.
    async fn get(&self, path: &str) -> SourceResult<Option<Value>>;

    /// Deliver every change of `path` into `queue` until `cancel` fires.
    ///
    /// Returns once the watch is established; delivery errors after that
    /// point are logged, not surfaced.
    async fn watch(&self, path: &str, queue: WatchQueue, cancel: CancellationToken)
    -> SourceResult<()>;

    /// Release backend resources.
    async fn close(&self) -> SourceResult<()>;
}

/// Scope addressed by a [`RemoteSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSourceConfig {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Release name.
    pub release: String,
    /// Store-wide prefix; empty for none.
    pub prefix: String,
    /// Watch queue tuning.
    pub watch: WatchOptions,
}

impl RemoteSourceConfig {
    /// Scope with the default prefix and watch options.
    #[must_use]
    pub fn new(project: &str, environment: &str, release: &str) -> Self {
        Self {
            project: project.to_string(),
            environment: environment.to_string(),
            release: release.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            watch: WatchOptions::default(),
        }
    }

    /// Override the store-wide prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn base_path(&self) -> String {
        [
            self.prefix.as_str(),
            self.project.as_str(),
            self.environment.as_str(),
            self.release.as_str(),
        ]
        .iter()
        .map(|segment| segment.trim_matches('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
    }
}

/// Value source reading `{prefix}/{project}/{env}/{release}/{key}` from a
/// [`RemoteBackend`].
pub struct RemoteSource<B: RemoteBackend> {
    backend: Arc<B>,
    base: String,
    options: WatchOptions,
}

impl<B: RemoteBackend> RemoteSource<B> {
    /// Bind `backend` to the scope described by `config`.
    #[must_use]
    pub fn new(backend: Arc<B>, config: &RemoteSourceConfig) -> Self {
        Self {
            backend,
            base: config.base_path(),
            options: config.watch,
        }
    }

    /// Full backend path for `key`.
    #[must_use]
    pub fn key_path(&self, key: &str) -> String {
        if self.base.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.base)
        }
    }

    /// Shared backend handle.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: RemoteBackend> fmt::Debug for RemoteSource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSource")
            .field("base", &self.base)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: RemoteBackend> ValueSource for RemoteSource<B> {
    async fn value(&self, key: &str) -> SourceResult<Value> {
        self.backend
            .get(&self.key_path(key))
            .await?
            .ok_or_else(|| SourceError::not_present(key))
    }

    async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        let queue = WatchQueue::spawn(key, callback, self.options, cancel.clone());
        self.backend.watch(&self.key_path(key), queue, cancel).await
    }

    async fn close(&self) -> SourceResult<()> {
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn source(backend: &MemoryBackend) -> RemoteSource<MemoryBackend> {
        RemoteSource::new(
            Arc::new(backend.clone()),
            &RemoteSourceConfig::new("billing", "prod", "v1"),
        )
    }

    #[test]
    fn key_paths_join_prefix_and_scope() {
        let backend = MemoryBackend::new();
        assert_eq!(source(&backend).key_path("timeout"), "rtc/billing/prod/v1/timeout");

        let bare = RemoteSource::new(
            Arc::new(backend),
            &RemoteSourceConfig::new("billing", "prod", "v1").with_prefix(""),
        );
        assert_eq!(bare.key_path("timeout"), "billing/prod/v1/timeout");
    }

    #[tokio::test]
    async fn value_reads_scoped_key_or_reports_not_present() {
        let backend = MemoryBackend::new();
        backend.put("rtc/billing/prod/v1/timeout", Value::from("30")).await;
        let source = source(&backend);

        assert_eq!(source.value("timeout").await.unwrap().int(), 30);
        assert!(source.value("missing").await.unwrap_err().is_not_present());
    }

    #[tokio::test]
    async fn watch_delivers_previous_and_current_values() {
        let backend = MemoryBackend::new();
        backend.put("rtc/billing/prod/v1/timeout", Value::from("30")).await;
        let source = source(&backend);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        source
            .watch_value(
                "timeout",
                Arc::new(move |previous: Value, current: Value| {
                    let _ = tx.send((previous.string(), current.string()));
                }),
                cancel.clone(),
            )
            .await
            .unwrap();

        backend.put("rtc/billing/prod/v1/other", Value::from("x")).await;
        backend.put("rtc/billing/prod/v1/timeout", Value::from("45")).await;
        backend.delete("rtc/billing/prod/v1/timeout").await;

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(("30".to_string(), "45".to_string())));
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(second, Some(("45".to_string(), String::new())));

        cancel.cancel();
        backend.put("rtc/billing/prod/v1/timeout", Value::from("60")).await;
        let after_cancel = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(after_cancel, Ok(Some(_))));
    }
}
