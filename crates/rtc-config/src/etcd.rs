//! etcd v3 adapter for the values store.
//!
//! Batched reads and writes go through a single `Txn`, which etcd bounds at
//! [`MAX_BATCH_SIZE`] operations by default.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, DeleteOptions, GetOptions, KeyValue, Txn, TxnOp, TxnOpResponse,
};
use rtc_client::Value;
use tracing::{debug, instrument};

use crate::defaults::{DEFAULT_VALUES_PREFIX, MAX_BATCH_SIZE};
use crate::store::{ValuesError, ValuesKv, ValuesResult, ValuesStore, key_of};

/// Connection parameters for [`EtcdValuesStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdValuesConfig {
    /// Cluster endpoints.
    pub endpoints: Vec<String>,
    /// Path prefix prepended to every key.
    pub prefix: String,
    /// Connection timeout.
    pub dial_timeout: Duration,
}

impl Default for EtcdValuesConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            prefix: DEFAULT_VALUES_PREFIX.to_string(),
            dial_timeout: Duration::from_secs(1),
        }
    }
}

fn backend_error(operation: &'static str) -> impl FnOnce(etcd_client::Error) -> ValuesError {
    move |source| ValuesError::Backend {
        operation,
        source: Box::new(source),
    }
}

const fn check_batch(size: usize) -> ValuesResult<()> {
    if size > MAX_BATCH_SIZE {
        return Err(ValuesError::BatchTooLarge {
            size,
            limit: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Values store backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdValuesStore {
    client: Client,
    prefix: String,
}

impl EtcdValuesStore {
    /// Connect to the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be established.
    #[instrument(
        name = "values_store.connect",
        skip(config),
        fields(endpoints = config.endpoints.len())
    )]
    pub async fn connect(config: &EtcdValuesConfig) -> ValuesResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(backend_error("etcd.connect"))?;
        debug!("connected to etcd");
        Ok(Self::from_client(client, &config.prefix))
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn from_client(client: Client, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            client,
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
        }
    }

    fn full(&self, path: &str) -> String {
        format!("{}{path}", self.prefix)
    }

    fn relative(&self, kv: &KeyValue) -> ValuesResult<String> {
        let key = kv.key_str().map_err(backend_error("etcd.decode_key"))?;
        Ok(key
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(key)
            .to_string())
    }

    async fn txn(
        &self,
        operation: &'static str,
        ops: Vec<TxnOp>,
    ) -> ValuesResult<Vec<TxnOpResponse>> {
        let response = self
            .client
            .clone()
            .txn(Txn::new().and_then(ops))
            .await
            .map_err(backend_error(operation))?;
        Ok(response.op_responses())
    }
}

impl std::fmt::Debug for EtcdValuesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdValuesStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ValuesStore for EtcdValuesStore {
    async fn values(&self, paths: &[String]) -> ValuesResult<ValuesKv> {
        if paths.is_empty() {
            return Ok(ValuesKv::new());
        }
        check_batch(paths.len())?;
        let ops = paths
            .iter()
            .map(|path| TxnOp::get(self.full(path), None))
            .collect();
        let mut values = ValuesKv::with_capacity(paths.len());
        for response in self.txn("etcd.values", ops).await? {
            if let TxnOpResponse::Get(get) = response {
                for kv in get.kvs() {
                    let path = self.relative(kv)?;
                    values.insert(key_of(&path).to_string(), Value::new(kv.value()));
                }
            }
        }
        Ok(values)
    }

    async fn entries_by_path(&self, prefix: &str) -> ValuesResult<Vec<(String, Value)>> {
        let response = self
            .client
            .clone()
            .get(
                self.full(prefix),
                Some(GetOptions::new().with_prefix().with_sort(
                    etcd_client::SortTarget::Key,
                    etcd_client::SortOrder::Ascend,
                )),
            )
            .await
            .map_err(backend_error("etcd.entries_by_path"))?;
        response
            .kvs()
            .iter()
            .map(|kv| Ok((self.relative(kv)?, Value::new(kv.value()))))
            .collect()
    }

    async fn set_values(&self, entries: &BTreeMap<String, Value>) -> ValuesResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        check_batch(entries.len())?;
        let ops = entries
            .iter()
            .map(|(path, value)| TxnOp::put(self.full(path), value.as_bytes(), None))
            .collect();
        self.txn("etcd.set_values", ops).await?;
        Ok(())
    }

    async fn delete_values(&self, paths: &[String]) -> ValuesResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        check_batch(paths.len())?;
        let ops = paths
            .iter()
            .map(|path| TxnOp::delete(self.full(path), None))
            .collect();
        self.txn("etcd.delete_values", ops).await?;
        Ok(())
    }

    async fn delete_values_by_path(&self, prefix: &str) -> ValuesResult<()> {
        if prefix.is_empty() {
            return Err(ValuesError::Backend {
                operation: "etcd.delete_values_by_path",
                source: "refusing to delete the whole keyspace".into(),
            });
        }
        self.client
            .clone()
            .delete(self.full(prefix), Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(backend_error("etcd.delete_values_by_path"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_batches_are_rejected_before_any_request() {
        assert!(check_batch(MAX_BATCH_SIZE).is_ok());
        assert!(matches!(
            check_batch(MAX_BATCH_SIZE + 1),
            Err(ValuesError::BatchTooLarge { size: 129, limit: 128 })
        ));
    }

    #[test]
    fn default_config_uses_the_shared_prefix() {
        let config = EtcdValuesConfig::default();
        assert_eq!(config.prefix, "rtc");
        assert_eq!(config.endpoints, vec!["localhost:2379".to_string()]);
    }
}
