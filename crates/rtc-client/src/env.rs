//! Environment variable backend.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{SourceError, SourceResult};
use crate::source::{ValueChangeCallback, ValueSource};
use crate::value::Value;

/// Function used to read a variable; defaults to the process environment.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves `key` from the variable `{SERVICE}_{KEY}`, upper-cased.
///
/// Missing variables resolve to an empty value. Watching is unsupported.
#[derive(Clone)]
pub struct EnvSource {
    prefix: String,
    lookup: EnvLookup,
}

impl EnvSource {
    /// Read from the process environment for `service_name`.
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        Self::with_lookup(service_name, Arc::new(|name| std::env::var(name).ok()))
    }

    /// Read through a custom lookup function.
    #[must_use]
    pub fn with_lookup(service_name: &str, lookup: EnvLookup) -> Self {
        Self {
            prefix: format!("{}_", service_name.to_uppercase()),
            lookup,
        }
    }

    /// Variable name consulted for `key`.
    #[must_use]
    pub fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

impl fmt::Debug for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSource")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ValueSource for EnvSource {
    async fn value(&self, key: &str) -> SourceResult<Value> {
        let name = self.variable_name(key);
        Ok((self.lookup)(&name).map(Value::from).unwrap_or_default())
    }

    async fn watch_value(
        &self,
        _key: &str,
        _callback: ValueChangeCallback,
        _cancel: CancellationToken,
    ) -> SourceResult<()> {
        Err(SourceError::NotImplemented {
            operation: "env.watch_value",
        })
    }

    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}
