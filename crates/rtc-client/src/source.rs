//! The contract every value backend satisfies.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceResult;
use crate::value::Value;

/// Callback invoked with `(previous, current)` whenever a watched key changes.
pub type ValueChangeCallback = Arc<dyn Fn(Value, Value) + Send + Sync>;

/// Resolves keys to values and optionally delivers change notifications.
#[async_trait]
pub trait ValueSource: Send + Sync {
    /// Resolve `key` to its current value.
    async fn value(&self, key: &str) -> SourceResult<Value>;

    /// Register `callback` for changes of `key` until `cancel` fires.
    ///
    /// Registration returns as soon as the watch is established; delivery
    /// happens on a background task.
    async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()>;

    /// Release backend resources.
    async fn close(&self) -> SourceResult<()>;
}

#[async_trait]
impl<T: ValueSource + ?Sized> ValueSource for Arc<T> {
    async fn value(&self, key: &str) -> SourceResult<Value> {
        (**self).value(key).await
    }

    async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        (**self).watch_value(key, callback, cancel).await
    }

    async fn close(&self) -> SourceResult<()> {
        (**self).close().await
    }
}
