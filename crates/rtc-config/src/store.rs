//! Contracts for the metadata store and the values store, plus the
//! values-store path convention shared with clients.
//!
//! Values-store paths are relative: `{project}/{env}/{release}/{key}`. An
//! adapter may prepend a store-wide prefix. Prefix operations always use a
//! trailing `/` so `rel` never matches `rel2`.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;

use async_trait::async_trait;
use rtc_client::Value;
use thiserror::Error;

use crate::error::ConfigResult;
use crate::model::{
    Audit, AuditAction, AuditFilter, Config, Environment, NewConfig, Project, ProjectFilter,
    ProjectPage, Release, Scope,
};

/// Values keyed by logical config key.
pub type ValuesKv = HashMap<String, Value>;

/// Result alias for values-store operations.
pub type ValuesResult<T> = Result<T, ValuesError>;

/// Errors raised by values-store adapters.
#[derive(Debug, Error)]
pub enum ValuesError {
    /// The backing store failed.
    #[error("values backend operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying error.
        source: Box<dyn Error + Send + Sync>,
    },
    /// A batch exceeded the store's atomic transaction size.
    #[error("values batch exceeds the atomic transaction limit")]
    BatchTooLarge {
        /// Requested batch size.
        size: usize,
        /// Store limit.
        limit: usize,
    },
}

/// Relative path of `key` inside `scope`.
#[must_use]
pub fn value_path(scope: &Scope, key: &str) -> String {
    format!(
        "{}/{}/{}/{key}",
        scope.project, scope.environment, scope.release
    )
}

/// Prefix covering every value of `scope`.
#[must_use]
pub fn scope_prefix(scope: &Scope) -> String {
    format!("{}/{}/{}/", scope.project, scope.environment, scope.release)
}

/// Prefix covering every value of `project`.
#[must_use]
pub fn project_prefix(project: &str) -> String {
    format!("{project}/")
}

/// Logical key encoded in `path`: its final segment.
#[must_use]
pub fn key_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Path-addressed key/value store holding live values.
///
/// Every batched call is a single atomic multi-key transaction.
#[async_trait]
pub trait ValuesStore: Send + Sync {
    /// Point lookups; missing paths are absent from the result.
    async fn values(&self, paths: &[String]) -> ValuesResult<ValuesKv>;

    /// Every entry under `prefix`, keyed by relative path.
    async fn entries_by_path(&self, prefix: &str) -> ValuesResult<Vec<(String, Value)>>;

    /// Write every entry atomically.
    async fn set_values(&self, entries: &BTreeMap<String, Value>) -> ValuesResult<()>;

    /// Delete every path atomically.
    async fn delete_values(&self, paths: &[String]) -> ValuesResult<()>;

    /// Delete everything under `prefix`.
    async fn delete_values_by_path(&self, prefix: &str) -> ValuesResult<()>;

    /// Every entry under `prefix`, keyed by logical key.
    async fn values_by_path(&self, prefix: &str) -> ValuesResult<ValuesKv> {
        Ok(self
            .entries_by_path(prefix)
            .await?
            .into_iter()
            .map(|(path, value)| (key_of(&path).to_string(), value))
            .collect())
    }
}

/// Audit row about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAudit {
    /// Action label.
    pub action: AuditAction,
    /// Actor.
    pub actor: String,
    /// Encoded payload.
    pub payload: serde_json::Value,
}

/// Relational store of projects, environments, releases, configs and audits.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Open a transaction. Dropping the handle without committing rolls back.
    async fn begin(&self) -> ConfigResult<Box<dyn MetadataTx>>;

    /// Page through projects, newest first.
    async fn projects(&self, filter: &ProjectFilter) -> ConfigResult<ProjectPage>;

    /// Look up a project by name.
    async fn project(&self, name: &str) -> ConfigResult<Option<Project>>;

    /// Environments of a project, by name.
    async fn environments(&self, project: &str) -> ConfigResult<Vec<Environment>>;

    /// Releases of an environment, newest first.
    async fn releases(&self, project: &str, environment: &str) -> ConfigResult<Vec<Release>>;

    /// Configs of a scope, by key.
    async fn configs(&self, scope: &Scope) -> ConfigResult<Vec<Config>>;

    /// Audit rows matching `filter`, newest first.
    async fn audits(&self, filter: &AuditFilter) -> ConfigResult<Vec<Audit>>;
}

/// Operations available inside one metadata transaction.
#[async_trait]
pub trait MetadataTx: Send {
    /// Look up a project by name.
    async fn project(&mut self, name: &str) -> ConfigResult<Option<Project>>;
    /// Insert a project; duplicate names fail with `AlreadyExists`.
    async fn create_project(&mut self, name: &str, description: &str) -> ConfigResult<Project>;
    /// Replace a project's description.
    async fn update_project_description(
        &mut self,
        project_id: i64,
        description: &str,
    ) -> ConfigResult<()>;
    /// Delete a project and everything below it.
    async fn delete_project(&mut self, project_id: i64) -> ConfigResult<()>;
    /// Look up an environment.
    async fn environment(&mut self, project_id: i64, name: &str)
    -> ConfigResult<Option<Environment>>;
    /// Insert an environment.
    async fn create_environment(&mut self, project_id: i64, name: &str)
    -> ConfigResult<Environment>;
    /// Look up a release.
    async fn release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Option<Release>>;
    /// Insert a release.
    async fn create_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Release>;
    /// Delete a release and its configs.
    async fn delete_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<()>;
    /// Configs of a scope.
    async fn configs(&mut self, scope: &Scope) -> ConfigResult<Vec<Config>>;
    /// Configs of a scope restricted to `keys`.
    async fn configs_by_keys(&mut self, scope: &Scope, keys: &[String])
    -> ConfigResult<Vec<Config>>;
    /// Insert a config or update its type and metadata; `updated_at` is kept.
    async fn upsert_config(&mut self, release_id: i64, config: &NewConfig) -> ConfigResult<()>;
    /// Stamp `updated_at` on the given configs.
    async fn mark_configs_updated(&mut self, ids: &[i64]) -> ConfigResult<()>;
    /// Delete the given configs.
    async fn delete_configs(&mut self, ids: &[i64]) -> ConfigResult<()>;
    /// Append an audit row.
    async fn insert_audit(&mut self, audit: &NewAudit) -> ConfigResult<i64>;
    /// Make every change visible.
    async fn commit(self: Box<Self>) -> ConfigResult<()>;
    /// Discard every change.
    async fn rollback(self: Box<Self>) -> ConfigResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_scope_convention() {
        let scope = Scope::new("billing", "prod", "v1");
        assert_eq!(value_path(&scope, "timeout"), "billing/prod/v1/timeout");
        assert_eq!(scope_prefix(&scope), "billing/prod/v1/");
        assert_eq!(project_prefix("billing"), "billing/");
        assert_eq!(key_of("rtc/billing/prod/v1/timeout"), "timeout");
        assert_eq!(key_of("timeout"), "timeout");
    }
}
