//! etcd-backed remote backend.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, WatchOptions as EtcdWatchOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::remote::RemoteBackend;
use crate::value::Value;
use crate::watch::WatchQueue;

/// Default timeout for establishing the etcd connection.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection parameters for [`EtcdBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdBackendConfig {
    /// Cluster endpoints.
    pub endpoints: Vec<String>,
    /// Connection timeout.
    pub dial_timeout: Duration,
}

impl Default for EtcdBackendConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

fn remote_error(operation: &'static str) -> impl FnOnce(etcd_client::Error) -> SourceError {
    move |source| SourceError::Remote {
        operation,
        source: Box::new(source),
    }
}

/// Remote backend talking to an etcd v3 cluster.
#[derive(Clone)]
pub struct EtcdBackend {
    client: Client,
}

impl EtcdBackend {
    /// Connect to the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be established.
    pub async fn connect(config: &EtcdBackendConfig) -> SourceResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(remote_error("etcd.connect"))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteBackend for EtcdBackend {
    async fn get(&self, path: &str) -> SourceResult<Option<Value>> {
        let response = self
            .client
            .clone()
            .get(path, None)
            .await
            .map_err(remote_error("etcd.get"))?;
        Ok(response.kvs().first().map(|kv| Value::new(kv.value())))
    }

    async fn watch(
        &self,
        path: &str,
        queue: WatchQueue,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        let (mut watcher, mut stream) = self
            .client
            .clone()
            .watch(path, Some(EtcdWatchOptions::new().with_prev_key()))
            .await
            .map_err(remote_error("etcd.watch"))?;
        let path = path.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        let _ = watcher.cancel().await;
                        break;
                    }
                    message = stream.message() => match message {
                        Ok(Some(response)) => {
                            for event in response.events() {
                                let previous = event
                                    .prev_kv()
                                    .map(|kv| Value::new(kv.value()))
                                    .unwrap_or_default();
                                let current = match event.event_type() {
                                    EventType::Put => event
                                        .kv()
                                        .map(|kv| Value::new(kv.value()))
                                        .unwrap_or_default(),
                                    EventType::Delete => Value::empty(),
                                };
                                queue.push(previous, current);
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(path = %path, error = %err, "etcd watch stream failed");
                            break;
                        }
                    },
                }
            }
            debug!(path = %path, "etcd watch stopped");
        });
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}
