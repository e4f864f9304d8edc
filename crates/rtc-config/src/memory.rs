//! In-process adapters for both store contracts.
//!
//! `MemoryMetadataStore` serializes transactions: `begin` takes the state
//! lock and works on a copy that `commit` publishes and drop discards.
//! `MemoryValuesStore` shares an [`rtc_client::MemoryBackend`], so clients
//! in the same process can watch values written by the engine.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rtc_client::{MemoryBackend, RemoteBackend, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::defaults::MAX_BATCH_SIZE;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    Audit, AuditFilter, Config, Environment, NewConfig, Project, ProjectFilter, ProjectPage,
    Release, Scope,
};
use crate::store::{
    MetadataStore, MetadataTx, NewAudit, ValuesError, ValuesKv, ValuesResult, ValuesStore, key_of,
};

#[derive(Debug, Clone, Default)]
struct MetadataState {
    next_id: i64,
    projects: Vec<Project>,
    environments: Vec<Environment>,
    releases: Vec<Release>,
    configs: Vec<Config>,
    audits: Vec<Audit>,
}

impl MetadataState {
    const fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.name == name)
    }

    fn environment(&self, project: &str, name: &str) -> Option<&Environment> {
        let project = self.project(project)?;
        self.environments
            .iter()
            .find(|env| env.project_id == project.id && env.name == name)
    }

    fn release_of(&self, scope: &Scope) -> Option<&Release> {
        let environment = self.environment(&scope.project, &scope.environment)?;
        self.releases
            .iter()
            .find(|release| release.environment_id == environment.id && release.name == scope.release)
    }

    fn configs_of(&self, scope: &Scope) -> Vec<Config> {
        let Some(release) = self.release_of(scope) else {
            return Vec::new();
        };
        let mut configs: Vec<Config> = self
            .configs
            .iter()
            .filter(|config| config.release_id == release.id)
            .cloned()
            .collect();
        configs.sort_by(|left, right| left.key.cmp(&right.key));
        configs
    }

    fn remove_releases(&mut self, release_ids: &HashSet<i64>) {
        self.releases
            .retain(|release| !release_ids.contains(&release.id));
        self.configs
            .retain(|config| !release_ids.contains(&config.release_id));
    }
}

/// Metadata store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<MetadataState>>,
}

impl MemoryMetadataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&self) -> ConfigResult<Box<dyn MetadataTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryMetadataTx { guard, working }))
    }

    async fn projects(&self, filter: &ProjectFilter) -> ConfigResult<ProjectPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Project> = state
            .projects
            .iter()
            .filter(|project| {
                filter
                    .query
                    .as_deref()
                    .is_none_or(|query| project.name.contains(query))
            })
            .collect();
        matching.sort_by(|left, right| right.id.cmp(&left.id));
        let total = matching.len() as u64;
        let projects = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok(ProjectPage { projects, total })
    }

    async fn project(&self, name: &str) -> ConfigResult<Option<Project>> {
        Ok(self.state.lock().await.project(name).cloned())
    }

    async fn environments(&self, project: &str) -> ConfigResult<Vec<Environment>> {
        let state = self.state.lock().await;
        let Some(project) = state.project(project) else {
            return Ok(Vec::new());
        };
        let mut environments: Vec<Environment> = state
            .environments
            .iter()
            .filter(|env| env.project_id == project.id)
            .cloned()
            .collect();
        environments.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(environments)
    }

    async fn releases(&self, project: &str, environment: &str) -> ConfigResult<Vec<Release>> {
        let state = self.state.lock().await;
        let Some(environment) = state.environment(project, environment) else {
            return Ok(Vec::new());
        };
        let mut releases: Vec<Release> = state
            .releases
            .iter()
            .filter(|release| release.environment_id == environment.id)
            .cloned()
            .collect();
        releases.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then(right.id.cmp(&left.id))
        });
        Ok(releases)
    }

    async fn configs(&self, scope: &Scope) -> ConfigResult<Vec<Config>> {
        Ok(self.state.lock().await.configs_of(scope))
    }

    async fn audits(&self, filter: &AuditFilter) -> ConfigResult<Vec<Audit>> {
        let state = self.state.lock().await;
        Ok(state
            .audits
            .iter()
            .rev()
            .filter(|audit| filter.matches(audit))
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }
}

struct MemoryMetadataTx {
    guard: OwnedMutexGuard<MetadataState>,
    working: MetadataState,
}

#[async_trait]
impl MetadataTx for MemoryMetadataTx {
    async fn project(&mut self, name: &str) -> ConfigResult<Option<Project>> {
        Ok(self.working.project(name).cloned())
    }

    async fn create_project(&mut self, name: &str, description: &str) -> ConfigResult<Project> {
        if self.working.project(name).is_some() {
            return Err(ConfigError::AlreadyExists {
                entity: "project",
                name: name.to_string(),
            });
        }
        let project = Project {
            id: self.working.allocate_id(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.working.projects.push(project.clone());
        Ok(project)
    }

    async fn update_project_description(
        &mut self,
        project_id: i64,
        description: &str,
    ) -> ConfigResult<()> {
        if let Some(project) = self
            .working
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
        {
            project.description = description.to_string();
        }
        Ok(())
    }

    async fn delete_project(&mut self, project_id: i64) -> ConfigResult<()> {
        let environment_ids: HashSet<i64> = self
            .working
            .environments
            .iter()
            .filter(|env| env.project_id == project_id)
            .map(|env| env.id)
            .collect();
        let release_ids: HashSet<i64> = self
            .working
            .releases
            .iter()
            .filter(|release| environment_ids.contains(&release.environment_id))
            .map(|release| release.id)
            .collect();
        self.working.remove_releases(&release_ids);
        self.working
            .environments
            .retain(|env| env.project_id != project_id);
        self.working
            .projects
            .retain(|project| project.id != project_id);
        Ok(())
    }

    async fn environment(
        &mut self,
        project_id: i64,
        name: &str,
    ) -> ConfigResult<Option<Environment>> {
        Ok(self
            .working
            .environments
            .iter()
            .find(|env| env.project_id == project_id && env.name == name)
            .cloned())
    }

    async fn create_environment(
        &mut self,
        project_id: i64,
        name: &str,
    ) -> ConfigResult<Environment> {
        let environment = Environment {
            id: self.working.allocate_id(),
            project_id,
            name: name.to_string(),
        };
        self.working.environments.push(environment.clone());
        Ok(environment)
    }

    async fn release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Option<Release>> {
        Ok(self
            .working
            .releases
            .iter()
            .find(|release| release.environment_id == environment_id && release.name == name)
            .cloned())
    }

    async fn create_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Release> {
        let release = Release {
            id: self.working.allocate_id(),
            environment_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.working.releases.push(release.clone());
        Ok(release)
    }

    async fn delete_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<()> {
        let release_ids: HashSet<i64> = self
            .working
            .releases
            .iter()
            .filter(|release| release.environment_id == environment_id && release.name == name)
            .map(|release| release.id)
            .collect();
        self.working.remove_releases(&release_ids);
        Ok(())
    }

    async fn configs(&mut self, scope: &Scope) -> ConfigResult<Vec<Config>> {
        Ok(self.working.configs_of(scope))
    }

    async fn configs_by_keys(
        &mut self,
        scope: &Scope,
        keys: &[String],
    ) -> ConfigResult<Vec<Config>> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        Ok(self
            .working
            .configs_of(scope)
            .into_iter()
            .filter(|config| wanted.contains(config.key.as_str()))
            .collect())
    }

    async fn upsert_config(&mut self, release_id: i64, config: &NewConfig) -> ConfigResult<()> {
        if let Some(existing) = self
            .working
            .configs
            .iter_mut()
            .find(|row| row.release_id == release_id && row.key == config.key)
        {
            existing.value_type = config.value_type;
            existing.metadata = config.metadata.clone();
            return Ok(());
        }
        let row = Config {
            id: self.working.allocate_id(),
            release_id,
            key: config.key.clone(),
            value_type: config.value_type,
            metadata: config.metadata.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.working.configs.push(row);
        Ok(())
    }

    async fn mark_configs_updated(&mut self, ids: &[i64]) -> ConfigResult<()> {
        let now = Utc::now();
        for config in &mut self.working.configs {
            if ids.contains(&config.id) {
                config.updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn delete_configs(&mut self, ids: &[i64]) -> ConfigResult<()> {
        self.working.configs.retain(|config| !ids.contains(&config.id));
        Ok(())
    }

    async fn insert_audit(&mut self, audit: &NewAudit) -> ConfigResult<i64> {
        let id = self.working.allocate_id();
        self.working.audits.push(Audit {
            id,
            action: audit.action.as_str().to_string(),
            actor: audit.actor.clone(),
            payload: audit.payload.clone(),
            ts: Utc::now(),
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> ConfigResult<()> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ConfigResult<()> {
        Ok(())
    }
}

/// Values store backed by a shared [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryValuesStore {
    backend: MemoryBackend,
    prefix: String,
}

impl MemoryValuesStore {
    /// Create a store over a fresh backend; `prefix` is prepended to every path.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self::with_backend(MemoryBackend::new(), prefix)
    }

    /// Create a store over an existing backend.
    #[must_use]
    pub fn with_backend(backend: MemoryBackend, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            backend,
            prefix: if prefix.is_empty() {
                String::new()
            } else {
                format!("{prefix}/")
            },
        }
    }

    /// Backend shared with client sources.
    #[must_use]
    pub const fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    fn full(&self, path: &str) -> String {
        format!("{}{path}", self.prefix)
    }

    fn relative<'a>(&self, full: &'a str) -> &'a str {
        full.strip_prefix(self.prefix.as_str()).unwrap_or(full)
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

#[async_trait]
impl ValuesStore for MemoryValuesStore {
    async fn values(&self, paths: &[String]) -> ValuesResult<ValuesKv> {
        check_batch(paths.len())?;
        let full: Vec<String> = paths.iter().map(|path| self.full(path)).collect();
        Ok(self
            .backend
            .get_many(&full)
            .await
            .into_iter()
            .map(|(path, value)| (key_of(&path).to_string(), value))
            .collect())
    }

    async fn entries_by_path(&self, prefix: &str) -> ValuesResult<Vec<(String, Value)>> {
        Ok(self
            .backend
            .scan(&self.full(prefix))
            .await
            .into_iter()
            .map(|(path, value)| (self.relative(&path).to_string(), value))
            .collect())
    }

    async fn set_values(&self, entries: &BTreeMap<String, Value>) -> ValuesResult<()> {
        check_batch(entries.len())?;
        self.backend
            .apply(
                entries
                    .iter()
                    .map(|(path, value)| (self.full(path), Some(value.clone()))),
            )
            .await;
        Ok(())
    }

    async fn delete_values(&self, paths: &[String]) -> ValuesResult<()> {
        check_batch(paths.len())?;
        self.backend
            .apply(paths.iter().map(|path| (self.full(path), None)))
            .await;
        Ok(())
    }

    async fn delete_values_by_path(&self, prefix: &str) -> ValuesResult<()> {
        if prefix.is_empty() {
            return Err(ValuesError::Backend {
                operation: "memory.delete_values_by_path",
                source: "refusing to delete the whole keyspace".into(),
            });
        }
        self.backend.delete_prefix(&self.full(prefix)).await;
        Ok(())
    }
}

impl MemoryValuesStore {
    /// Read one value through the client backend contract.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend read fails.
    pub async fn get(&self, path: &str) -> ValuesResult<Option<Value>> {
        self.backend
            .get(&self.full(path))
            .await
            .map_err(|source| ValuesError::Backend {
                operation: "memory.get",
                source: Box::new(source),
            })
    }
}
