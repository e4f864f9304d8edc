//! In-process remote backend.
//!
//! Holds a sorted path → value table and publishes every mutation on a
//! broadcast channel so watches behave like a real watchable store. Batched
//! mutations are applied under one write lock and are never partially
//! visible.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SourceResult;
use crate::remote::{RemoteBackend, RemoteChange};
use crate::value::Value;
use crate::watch::WatchQueue;

const DEFAULT_CHANGE_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
struct PathChange {
    path: String,
    change: RemoteChange,
}

#[derive(Debug)]
struct Inner {
    entries: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<PathChange>,
}

/// Shared in-memory key/value store with change notification.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create an empty backend buffering `capacity` undelivered changes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(BTreeMap::new()),
                changes,
            }),
        }
    }

    /// Store `value` at `path`, returning the previous value.
    pub async fn put(&self, path: &str, value: Value) -> Option<Value> {
        let mut entries = self.inner.entries.write().await;
        self.write_entry(&mut entries, path, Some(value))
    }

    /// Remove `path`, returning the previous value.
    pub async fn delete(&self, path: &str) -> Option<Value> {
        let mut entries = self.inner.entries.write().await;
        self.write_entry(&mut entries, path, None)
    }

    /// Apply puts (`Some`) and deletes (`None`) atomically.
    pub async fn apply<I>(&self, batch: I)
    where
        I: IntoIterator<Item = (String, Option<Value>)>,
    {
        let mut entries = self.inner.entries.write().await;
        for (path, value) in batch {
            self.write_entry(&mut entries, &path, value);
        }
    }

    /// Remove every entry whose path starts with `prefix`, returning the
    /// removed paths.
    pub async fn delete_prefix(&self, prefix: &str) -> Vec<String> {
        let mut entries = self.inner.entries.write().await;
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &doomed {
            self.write_entry(&mut entries, path, None);
        }
        doomed
    }

    /// Point lookups; missing paths are omitted.
    pub async fn get_many(&self, paths: &[String]) -> Vec<(String, Value)> {
        let entries = self.inner.entries.read().await;
        paths
            .iter()
            .filter_map(|path| entries.get(path).map(|value| (path.clone(), value.clone())))
            .collect()
    }

    /// Every entry whose path starts with `prefix`, in path order.
    pub async fn scan(&self, prefix: &str) -> Vec<(String, Value)> {
        let entries = self.inner.entries.read().await;
        entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Whether the backend holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    fn write_entry(
        &self,
        entries: &mut BTreeMap<String, Value>,
        path: &str,
        value: Option<Value>,
    ) -> Option<Value> {
        let previous = match &value {
            Some(value) => entries.insert(path.to_string(), value.clone()),
            None => entries.remove(path),
        };
        if value.is_none() && previous.is_none() {
            return None;
        }
        let _ = self.inner.changes.send(PathChange {
            path: path.to_string(),
            change: RemoteChange {
                previous: previous.clone().unwrap_or_default(),
                current: value.unwrap_or_default(),
            },
        });
        previous
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn get(&self, path: &str) -> SourceResult<Option<Value>> {
        Ok(self.inner.entries.read().await.get(path).cloned())
    }

    async fn watch(
        &self,
        path: &str,
        queue: WatchQueue,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        let mut receiver = self.inner.changes.subscribe();
        let path = path.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) if event.path == path => {
                            queue.push(event.change.previous, event.change.current);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(path = %path, skipped, "memory backend watch lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_operations_respect_segment_boundaries() {
        let backend = MemoryBackend::new();
        backend
            .apply(vec![
                ("p/e/rel/a".to_string(), Some(Value::from("1"))),
                ("p/e/rel/b".to_string(), Some(Value::from("2"))),
                ("p/e/rel2/a".to_string(), Some(Value::from("3"))),
            ])
            .await;

        let scanned: Vec<String> = backend
            .scan("p/e/rel/")
            .await
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        assert_eq!(scanned, ["p/e/rel/a", "p/e/rel/b"]);

        let removed = backend.delete_prefix("p/e/rel/").await;
        assert_eq!(removed.len(), 2);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn get_many_omits_missing_paths() {
        let backend = MemoryBackend::new();
        assert!(backend.put("a", Value::from("1")).await.is_none());
        let previous = backend.put("a", Value::from("2")).await;
        assert_eq!(previous, Some(Value::from("1")));

        let found = backend
            .get_many(&["a".to_string(), "missing".to_string()])
            .await;
        assert_eq!(found, vec![("a".to_string(), Value::from("2"))]);
        assert_eq!(backend.delete("a").await, Some(Value::from("2")));
        assert!(backend.is_empty().await);
    }
}
