//! Ordered fallback over several sources.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::source::{ValueChangeCallback, ValueSource};
use crate::value::Value;

/// Tries each source in order.
///
/// `value` returns the first success and ignores individual failures.
/// `watch_value` registers with every source, skipping those that report
/// [`SourceError::NotPresent`] and failing on anything else.
#[derive(Clone, Default)]
pub struct ChainSource {
    sources: Vec<Arc<dyn ValueSource>>,
}

impl ChainSource {
    /// Build a chain from sources in priority order.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn ValueSource>>) -> Self {
        Self { sources }
    }

    /// Append a lower-priority source.
    #[must_use]
    pub fn with(mut self, source: Arc<dyn ValueSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Number of chained sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the chain has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl ValueSource for ChainSource {
    async fn value(&self, key: &str) -> SourceResult<Value> {
        for (position, source) in self.sources.iter().enumerate() {
            match source.value(key).await {
                Ok(value) => return Ok(value),
                Err(err) => debug!(key, position, error = %err, "chained source miss"),
            }
        }
        Err(SourceError::not_present(key))
    }

    async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        for source in &self.sources {
            match source
                .watch_value(key, Arc::clone(&callback), cancel.clone())
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_present() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        let mut first_error = None;
        for source in &self.sources {
            if let Err(err) = source.close().await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Missing,
        Hit(&'static str),
        WatchFails(fn() -> SourceError),
    }

    struct Stub {
        behavior: Behavior,
        watches: AtomicUsize,
    }

    fn stub(behavior: Behavior) -> Arc<Stub> {
        Arc::new(Stub {
            behavior,
            watches: AtomicUsize::new(0),
        })
    }

    fn chain(stubs: &[&Arc<Stub>]) -> ChainSource {
        ChainSource::new(
            stubs
                .iter()
                .map(|stub| Arc::clone(*stub) as Arc<dyn ValueSource>)
                .collect(),
        )
    }

    #[async_trait]
    impl ValueSource for Stub {
        async fn value(&self, key: &str) -> SourceResult<Value> {
            match self.behavior {
                Behavior::Hit(value) => Ok(Value::from(value)),
                _ => Err(SourceError::not_present(key)),
            }
        }

        async fn watch_value(
            &self,
            _key: &str,
            _callback: ValueChangeCallback,
            _cancel: CancellationToken,
        ) -> SourceResult<()> {
            self.watches.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::WatchFails(error) => Err(error()),
                _ => Ok(()),
            }
        }

        async fn close(&self) -> SourceResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn value_falls_back_to_next_source() {
        let chain = chain(&[&stub(Behavior::Missing), &stub(Behavior::Hit("x"))]);
        assert_eq!(chain.value("key").await.unwrap().string(), "x");
    }

    #[tokio::test]
    async fn value_is_not_present_when_every_source_fails() {
        let chain = chain(&[&stub(Behavior::Missing), &stub(Behavior::Missing)]);
        assert!(chain.value("key").await.unwrap_err().is_not_present());
        assert!(ChainSource::default().value("key").await.is_err());
    }

    #[tokio::test]
    async fn watch_skips_not_present_and_registers_the_rest() {
        let skipped = stub(Behavior::WatchFails(|| SourceError::not_present("key")));
        let registered = stub(Behavior::Hit("x"));
        let chain = chain(&[&skipped, &registered]);

        chain
            .watch_value("key", Arc::new(|_, _| {}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(skipped.watches.load(Ordering::SeqCst), 1);
        assert_eq!(registered.watches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watch_propagates_other_errors_immediately() {
        let failing = stub(Behavior::WatchFails(|| SourceError::NotImplemented {
            operation: "watch",
        }));
        let never_reached = stub(Behavior::Hit("x"));
        let chain = chain(&[&failing, &never_reached]).with(stub(Behavior::Missing));
        assert_eq!(chain.len(), 3);

        let err = chain
            .watch_value("key", Arc::new(|_, _| {}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_implemented());
        assert_eq!(never_reached.watches.load(Ordering::SeqCst), 0);
    }
}
