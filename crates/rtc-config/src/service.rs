//! Configuration engine coordinating the metadata store and the values store.
//!
//! Every mutating operation opens one metadata transaction and one
//! [`ValuesJournal`]. Values are written through the journal before the
//! metadata rows change; if anything fails afterwards the journal restores
//! the values store and the transaction is rolled back. A cancelled
//! operation drops its journal, which restores the values store in the
//! background, and its transaction, which rolls back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rtc_client::Value;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::defaults::{DEFAULT_ACTOR, MAX_BATCH_SIZE};
use crate::encode::{AuditPayload, ConfigUpdateItem};
use crate::error::{ConfigError, ConfigResult};
use crate::journal::ValuesJournal;
use crate::model::{
    Audit, AuditAction, AuditFilter, Config, ConfigValue, Environment, NewConfig, Project,
    ProjectFilter, ProjectPage, Release, Scope,
};
use crate::store::{
    MetadataStore, MetadataTx, NewAudit, ValuesStore, project_prefix, scope_prefix, value_path,
};
use crate::validate::{
    validate_batch_size, validate_key, validate_new_value, validate_scope, validate_upsert,
};

/// Tunables for [`ConfigService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Largest batch accepted by value writes and upserts.
    pub max_batch_size: usize,
    /// Actor recorded when a caller does not supply one.
    pub default_actor: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            default_actor: DEFAULT_ACTOR.to_string(),
        }
    }
}

#[async_trait]
/// Operations exposed by the configuration engine.
pub trait ConfigFacade: Send + Sync {
    /// Page through projects, newest first.
    async fn list_projects(&self, filter: &ProjectFilter) -> ConfigResult<ProjectPage>;
    /// Create a project.
    async fn create_project(
        &self,
        actor: &str,
        name: &str,
        description: &str,
    ) -> ConfigResult<Project>;
    /// Replace a project's description.
    async fn update_project_description(
        &self,
        actor: &str,
        name: &str,
        description: &str,
    ) -> ConfigResult<Project>;
    /// Delete a project, its hierarchy and its values.
    async fn delete_project(&self, actor: &str, name: &str) -> ConfigResult<()>;
    /// Environments of a project.
    async fn list_environments(&self, project: &str) -> ConfigResult<Vec<Environment>>;
    /// Releases of an environment, newest first.
    async fn list_releases(&self, project: &str, environment: &str) -> ConfigResult<Vec<Release>>;
    /// Delete a release, its configs and its values.
    async fn delete_release(&self, actor: &str, scope: &Scope) -> ConfigResult<()>;
    /// Configs of a scope joined with their current values.
    async fn list_configs(&self, scope: &Scope) -> ConfigResult<Vec<ConfigValue>>;
    /// Consumer-facing value update; all or nothing.
    async fn set_config_values(
        &self,
        actor: &str,
        scope: &Scope,
        values: BTreeMap<String, Value>,
    ) -> ConfigResult<()>;
    /// Replace the config set of a scope.
    async fn upsert_configs(
        &self,
        actor: &str,
        scope: &Scope,
        configs: Vec<NewConfig>,
    ) -> ConfigResult<()>;
    /// Audit rows matching `filter`, newest first.
    async fn search_audits(&self, filter: &AuditFilter) -> ConfigResult<Vec<Audit>>;
    /// Actions the engine records.
    fn audit_actions(&self) -> &'static [AuditAction];
}

/// Engine backed by a metadata store and a values store.
#[derive(Clone)]
pub struct ConfigService {
    metadata: Arc<dyn MetadataStore>,
    values: Arc<dyn ValuesStore>,
    options: ServiceOptions,
}

impl ConfigService {
    /// Build an engine with default options.
    #[must_use]
    pub fn new(metadata: Arc<dyn MetadataStore>, values: Arc<dyn ValuesStore>) -> Self {
        Self::with_options(metadata, values, ServiceOptions::default())
    }

    /// Build an engine with explicit options.
    #[must_use]
    pub fn with_options(
        metadata: Arc<dyn MetadataStore>,
        values: Arc<dyn ValuesStore>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            metadata,
            values,
            options,
        }
    }

    /// Active options.
    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    fn actor<'a>(&'a self, actor: &'a str) -> &'a str {
        if actor.is_empty() {
            &self.options.default_actor
        } else {
            actor
        }
    }

    async fn begin(&self) -> ConfigResult<(Box<dyn MetadataTx>, ValuesJournal)> {
        let tx = self.metadata.begin().await?;
        Ok((tx, ValuesJournal::new(Arc::clone(&self.values))))
    }

    async fn set_values_in(
        &self,
        tx: &mut dyn MetadataTx,
        journal: &mut ValuesJournal,
        actor: &str,
        scope: &Scope,
        values: &BTreeMap<String, Value>,
    ) -> ConfigResult<()> {
        let keys: Vec<String> = values.keys().cloned().collect();
        let configs = tx.configs_by_keys(scope, &keys).await?;
        let by_key: HashMap<&str, &Config> = configs
            .iter()
            .map(|config| (config.key.as_str(), config))
            .collect();
        for key in &keys {
            if !by_key.contains_key(key.as_str()) {
                return Err(ConfigError::not_found("config", key));
            }
        }

        let paths: Vec<String> = keys.iter().map(|key| value_path(scope, key)).collect();
        let current = self
            .values
            .values(&paths)
            .await
            .map_err(ConfigError::values("values.read"))?;

        let mut items = Vec::with_capacity(values.len());
        let mut writes = BTreeMap::new();
        let mut ids = Vec::with_capacity(values.len());
        for (key, new_value) in values {
            let config = by_key
                .get(key.as_str())
                .ok_or_else(|| ConfigError::not_found("config", key))?;
            let old_value = current
                .get(key)
                .ok_or_else(|| ConfigError::not_found("value", key))?;
            validate_new_value(config, new_value)?;
            items.push(ConfigUpdateItem {
                key: key.clone(),
                old_value: old_value.to_string(),
                new_value: new_value.to_string(),
            });
            writes.insert(value_path(scope, key), new_value.clone());
            ids.push(config.id);
        }

        journal
            .set_values(writes)
            .await
            .map_err(ConfigError::values("values.write"))?;
        tx.mark_configs_updated(&ids).await?;
        append_audit(
            tx,
            actor,
            &AuditPayload::ConfigUpdated {
                project: scope.project.clone(),
                environment: scope.environment.clone(),
                release: scope.release.clone(),
                items,
            },
        )
        .await
    }

    async fn upsert_in(
        &self,
        tx: &mut dyn MetadataTx,
        journal: &mut ValuesJournal,
        actor: &str,
        scope: &Scope,
        configs: &[NewConfig],
    ) -> ConfigResult<()> {
        let project = tx
            .project(&scope.project)
            .await?
            .ok_or_else(|| ConfigError::not_found("project", &scope.project))?;
        let environment = match tx.environment(project.id, &scope.environment).await? {
            Some(environment) => environment,
            None => tx.create_environment(project.id, &scope.environment).await?,
        };
        let release = match tx.release(environment.id, &scope.release).await? {
            Some(release) => release,
            None => tx.create_release(environment.id, &scope.release).await?,
        };

        let paths: Vec<String> = configs
            .iter()
            .map(|config| value_path(scope, &config.key))
            .collect();
        let existing = self
            .values
            .values(&paths)
            .await
            .map_err(ConfigError::values("values.read"))?;
        let new_values: BTreeMap<String, Value> = configs
            .iter()
            .filter(|config| !existing.contains_key(&config.key))
            .map(|config| (value_path(scope, &config.key), config.value.clone()))
            .collect();
        let mut created: Vec<String> = configs
            .iter()
            .filter(|config| !existing.contains_key(&config.key))
            .map(|config| config.key.clone())
            .collect();
        created.sort();

        let incoming: HashSet<&str> = configs.iter().map(|config| config.key.as_str()).collect();
        let removed: Vec<Config> = tx
            .configs(scope)
            .await?
            .into_iter()
            .filter(|config| !incoming.contains(config.key.as_str()))
            .collect();

        journal
            .set_values(new_values)
            .await
            .map_err(ConfigError::values("values.write"))?;
        for config in configs {
            tx.upsert_config(release.id, config).await?;
        }
        journal
            .delete_values(
                removed
                    .iter()
                    .map(|config| value_path(scope, &config.key))
                    .collect(),
            )
            .await
            .map_err(ConfigError::values("values.delete"))?;
        if !removed.is_empty() {
            let ids: Vec<i64> = removed.iter().map(|config| config.id).collect();
            tx.delete_configs(&ids).await?;
        }

        debug!(
            created = created.len(),
            deleted = removed.len(),
            "reconciled scope configs"
        );
        let mut deleted: Vec<String> = removed.into_iter().map(|config| config.key).collect();
        deleted.sort();
        append_audit(
            tx,
            actor,
            &AuditPayload::ConfigsUpserted {
                project: scope.project.clone(),
                environment: scope.environment.clone(),
                release: scope.release.clone(),
                created,
                deleted,
            },
        )
        .await
    }

    async fn delete_release_in(
        tx: &mut dyn MetadataTx,
        journal: &mut ValuesJournal,
        actor: &str,
        scope: &Scope,
    ) -> ConfigResult<()> {
        let project = tx
            .project(&scope.project)
            .await?
            .ok_or_else(|| ConfigError::not_found("project", &scope.project))?;
        let environment = tx
            .environment(project.id, &scope.environment)
            .await?
            .ok_or_else(|| ConfigError::not_found("environment", &scope.environment))?;
        tx.release(environment.id, &scope.release)
            .await?
            .ok_or_else(|| ConfigError::not_found("release", &scope.release))?;

        tx.delete_release(environment.id, &scope.release).await?;
        journal
            .delete_values_by_path(&scope_prefix(scope))
            .await
            .map_err(ConfigError::values("values.delete_release"))?;
        append_audit(
            tx,
            actor,
            &AuditPayload::ReleaseDeleted {
                project: scope.project.clone(),
                env: scope.environment.clone(),
                release: scope.release.clone(),
            },
        )
        .await
    }
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn append_audit(
    tx: &mut dyn MetadataTx,
    actor: &str,
    payload: &AuditPayload,
) -> ConfigResult<()> {
    let document = payload
        .encode()
        .map_err(ConfigError::encode("encode audit payload"))?;
    tx.insert_audit(&NewAudit {
        action: payload.action(),
        actor: actor.to_string(),
        payload: document,
    })
    .await?;
    Ok(())
}

/// Commit on success; otherwise restore the values store and roll back.
///
/// Settling runs on its own task so a caller that stops waiting cannot cut
/// it short between the metadata commit and the journal release.
async fn finish<T: Send + 'static>(
    tx: Box<dyn MetadataTx>,
    journal: ValuesJournal,
    result: ConfigResult<T>,
) -> ConfigResult<T> {
    tokio::spawn(settle(tx, journal, result).in_current_span())
        .await
        .map_err(|source| ConfigError::Interrupted {
            operation: "config_service.settle",
            source,
        })?
}

async fn settle<T>(
    tx: Box<dyn MetadataTx>,
    journal: ValuesJournal,
    result: ConfigResult<T>,
) -> ConfigResult<T> {
    match result {
        Ok(value) => match tx.commit().await {
            Ok(()) => {
                journal.commit();
                Ok(value)
            }
            Err(err) => {
                journal.rollback().await;
                Err(err)
            }
        },
        Err(err) => {
            journal.rollback().await;
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "metadata rollback failed");
            }
            Err(err)
        }
    }
}

#[async_trait]
impl ConfigFacade for ConfigService {
    #[instrument(name = "config_service.list_projects", skip(self))]
    async fn list_projects(&self, filter: &ProjectFilter) -> ConfigResult<ProjectPage> {
        self.metadata.projects(filter).await
    }

    #[instrument(name = "config_service.create_project", skip(self, description))]
    async fn create_project(
        &self,
        actor: &str,
        name: &str,
        description: &str,
    ) -> ConfigResult<Project> {
        validate_key(name)?;
        let actor = self.actor(actor);
        let (mut tx, journal) = self.begin().await?;
        let result = async {
            let project = tx.create_project(name, description).await?;
            append_audit(
                &mut *tx,
                actor,
                &AuditPayload::ProjectCreated {
                    project: name.to_string(),
                    description: description.to_string(),
                },
            )
            .await?;
            Ok::<_, ConfigError>(project)
        }
        .await;
        let project = finish(tx, journal, result).await?;
        info!(project = %project.name, "project created");
        Ok(project)
    }

    #[instrument(name = "config_service.update_project_description", skip(self, description))]
    async fn update_project_description(
        &self,
        actor: &str,
        name: &str,
        description: &str,
    ) -> ConfigResult<Project> {
        let actor = self.actor(actor);
        let (mut tx, journal) = self.begin().await?;
        let result = async {
            let mut project = tx
                .project(name)
                .await?
                .ok_or_else(|| ConfigError::not_found("project", name))?;
            tx.update_project_description(project.id, description)
                .await?;
            append_audit(
                &mut *tx,
                actor,
                &AuditPayload::ProjectUpdated {
                    project: name.to_string(),
                    old_description: project.description.clone(),
                    new_description: description.to_string(),
                },
            )
            .await?;
            project.description = description.to_string();
            Ok::<_, ConfigError>(project)
        }
        .await;
        finish(tx, journal, result).await
    }

    #[instrument(name = "config_service.delete_project", skip(self))]
    async fn delete_project(&self, actor: &str, name: &str) -> ConfigResult<()> {
        let actor = self.actor(actor);
        let (mut tx, mut journal) = self.begin().await?;
        let result = async {
            let project = tx
                .project(name)
                .await?
                .ok_or_else(|| ConfigError::not_found("project", name))?;
            tx.delete_project(project.id).await?;
            journal
                .delete_values_by_path(&project_prefix(name))
                .await
                .map_err(ConfigError::values("values.delete_project"))?;
            append_audit(
                &mut *tx,
                actor,
                &AuditPayload::ProjectDeleted {
                    project: name.to_string(),
                },
            )
            .await
        }
        .await;
        finish(tx, journal, result).await?;
        info!(project = %name, "project deleted");
        Ok(())
    }

    #[instrument(name = "config_service.list_environments", skip(self))]
    async fn list_environments(&self, project: &str) -> ConfigResult<Vec<Environment>> {
        if self.metadata.project(project).await?.is_none() {
            return Err(ConfigError::not_found("project", project));
        }
        self.metadata.environments(project).await
    }

    #[instrument(name = "config_service.list_releases", skip(self))]
    async fn list_releases(&self, project: &str, environment: &str) -> ConfigResult<Vec<Release>> {
        let environments = self.list_environments(project).await?;
        if !environments.iter().any(|env| env.name == environment) {
            return Err(ConfigError::not_found("environment", environment));
        }
        self.metadata.releases(project, environment).await
    }

    #[instrument(
        name = "config_service.delete_release",
        skip(self, scope),
        fields(project = %scope.project, environment = %scope.environment, release = %scope.release)
    )]
    async fn delete_release(&self, actor: &str, scope: &Scope) -> ConfigResult<()> {
        validate_scope(scope)?;
        let actor = self.actor(actor);
        let (mut tx, mut journal) = self.begin().await?;
        let result = Self::delete_release_in(&mut *tx, &mut journal, actor, scope).await;
        finish(tx, journal, result).await
    }

    #[instrument(
        name = "config_service.list_configs",
        skip(self, scope),
        fields(project = %scope.project, environment = %scope.environment, release = %scope.release)
    )]
    async fn list_configs(&self, scope: &Scope) -> ConfigResult<Vec<ConfigValue>> {
        let configs = self.metadata.configs(scope).await?;
        if configs.is_empty() {
            return Ok(Vec::new());
        }
        let mut values = self
            .values
            .values_by_path(&scope_prefix(scope))
            .await
            .map_err(ConfigError::values("values.list"))?;

        let mut listed = Vec::with_capacity(configs.len());
        for config in configs {
            match values.remove(&config.key) {
                Some(value) => listed.push(ConfigValue { config, value }),
                None => {
                    warn!(key = %config.key, "config has no stored value; omitted from listing");
                }
            }
        }
        Ok(listed)
    }

    #[instrument(
        name = "config_service.set_config_values",
        skip(self, scope, values),
        fields(project = %scope.project, environment = %scope.environment, release = %scope.release, keys = values.len())
    )]
    async fn set_config_values(
        &self,
        actor: &str,
        scope: &Scope,
        values: BTreeMap<String, Value>,
    ) -> ConfigResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        validate_scope(scope)?;
        validate_batch_size(values.len(), self.options.max_batch_size)?;
        for key in values.keys() {
            validate_key(key)?;
        }

        let actor = self.actor(actor);
        let (mut tx, mut journal) = self.begin().await?;
        let result = self
            .set_values_in(&mut *tx, &mut journal, actor, scope, &values)
            .await;
        finish(tx, journal, result).await?;
        info!(keys = values.len(), "config values updated");
        Ok(())
    }

    #[instrument(
        name = "config_service.upsert_configs",
        skip(self, scope, configs),
        fields(project = %scope.project, environment = %scope.environment, release = %scope.release, configs = configs.len())
    )]
    async fn upsert_configs(
        &self,
        actor: &str,
        scope: &Scope,
        configs: Vec<NewConfig>,
    ) -> ConfigResult<()> {
        validate_scope(scope)?;
        validate_upsert(&configs, self.options.max_batch_size)?;

        let actor = self.actor(actor);
        let (mut tx, mut journal) = self.begin().await?;
        let result = self
            .upsert_in(&mut *tx, &mut journal, actor, scope, &configs)
            .await;
        finish(tx, journal, result).await
    }

    #[instrument(name = "config_service.search_audits", skip(self))]
    async fn search_audits(&self, filter: &AuditFilter) -> ConfigResult<Vec<Audit>> {
        self.metadata.audits(filter).await
    }

    fn audit_actions(&self) -> &'static [AuditAction] {
        &AuditAction::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMetadataStore, MemoryValuesStore};

    fn service() -> ConfigService {
        ConfigService::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryValuesStore::new("rtc")),
        )
    }

    #[tokio::test]
    async fn empty_actor_falls_back_to_default() {
        let service = service();
        service.create_project("", "billing", "").await.unwrap();
        let audits = service.search_audits(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].actor, DEFAULT_ACTOR);
        assert_eq!(audits[0].action, "project_created");
    }

    #[tokio::test]
    async fn empty_value_batch_is_a_noop() {
        let service = service();
        service
            .set_config_values("alice", &Scope::new("missing", "e", "r"), BTreeMap::new())
            .await
            .unwrap();
        assert!(service
            .search_audits(&AuditFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn audit_actions_cover_every_action() {
        assert_eq!(service().audit_actions().len(), AuditAction::ALL.len());
    }
}
