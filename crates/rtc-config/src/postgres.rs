//! `PostgreSQL` adapter for the metadata store.

use std::time::Duration;

use async_trait::async_trait;
use rtc_data::DataError;
use rtc_data::metadata::{
    self as data, AuditQuery, AuditRow, ConfigRow, EnvironmentRow, NewAuditRow, NewConfigRow,
    ProjectQuery, ProjectRow, ReleaseRow,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use crate::encode::{decode_metadata, encode_metadata};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    Audit, AuditFilter, Config, Environment, NewConfig, Project, ProjectFilter, ProjectPage,
    Release, Scope, ValueType,
};
use crate::store::{MetadataStore, MetadataTx, NewAudit};

/// Metadata store backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Connect a pool and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection or a migration fails.
    #[instrument(name = "metadata_store.connect", skip(dsn))]
    pub async fn connect(
        dsn: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> ConfigResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(dsn)
            .await
            .map_err(|source| ConfigError::Metadata {
                operation: "metadata.connect",
                source: DataError::QueryFailed {
                    operation: "connect",
                    source,
                },
            })?;
        Self::new(pool).await
    }

    /// Wrap an existing pool and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when a migration fails.
    pub async fn new(pool: PgPool) -> ConfigResult<Self> {
        data::run_migrations(&pool)
            .await
            .map_err(ConfigError::metadata("metadata.migrate"))?;
        debug!("metadata migrations applied");
        Ok(Self { pool })
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMetadataStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

fn map_data(
    operation: &'static str,
    entity: &'static str,
    name: &str,
) -> impl FnOnce(DataError) -> ConfigError {
    let name = name.to_string();
    move |source| {
        if source.is_unique_violation() {
            ConfigError::AlreadyExists { entity, name }
        } else {
            ConfigError::Metadata { operation, source }
        }
    }
}

fn project_from_row(row: ProjectRow) -> Project {
    Project {
        id: row.id,
        name: row.name,
        description: row.description,
        created_at: row.created_at,
    }
}

fn environment_from_row(row: EnvironmentRow) -> Environment {
    Environment {
        id: row.id,
        project_id: row.project_id,
        name: row.name,
    }
}

fn release_from_row(row: ReleaseRow) -> Release {
    Release {
        id: row.id,
        environment_id: row.environment_id,
        name: row.name,
        created_at: row.created_at,
    }
}

fn config_from_row(row: ConfigRow) -> ConfigResult<Config> {
    let metadata = decode_metadata(row.metadata).map_err(ConfigError::encode("decode metadata"))?;
    Ok(Config {
        id: row.id,
        release_id: row.release_id,
        value_type: ValueType::from_label(&row.value_type),
        key: row.key,
        metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn configs_from_rows(rows: Vec<ConfigRow>) -> ConfigResult<Vec<Config>> {
    rows.into_iter().map(config_from_row).collect()
}

fn audit_from_row(row: AuditRow) -> Audit {
    Audit {
        id: row.id,
        action: row.action,
        actor: row.actor,
        payload: row.payload,
        ts: row.ts,
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn begin(&self) -> ConfigResult<Box<dyn MetadataTx>> {
        let tx = self.pool.begin().await.map_err(|source| ConfigError::Metadata {
            operation: "metadata.begin",
            source: DataError::QueryFailed {
                operation: "begin transaction",
                source,
            },
        })?;
        Ok(Box::new(PgMetadataTx { tx }))
    }

    async fn projects(&self, filter: &ProjectFilter) -> ConfigResult<ProjectPage> {
        let query = ProjectQuery {
            search: filter.query.clone().filter(|query| !query.is_empty()),
            limit: i64::from(filter.limit),
            offset: i64::from(filter.offset),
        };
        let page = data::fetch_projects(&self.pool, &query)
            .await
            .map_err(ConfigError::metadata("metadata.projects"))?;
        Ok(ProjectPage {
            projects: page.projects.into_iter().map(project_from_row).collect(),
            total: page.total,
        })
    }

    async fn project(&self, name: &str) -> ConfigResult<Option<Project>> {
        Ok(data::fetch_project_by_name(&self.pool, name)
            .await
            .map_err(ConfigError::metadata("metadata.project"))?
            .map(project_from_row))
    }

    async fn environments(&self, project: &str) -> ConfigResult<Vec<Environment>> {
        Ok(data::fetch_environments(&self.pool, project)
            .await
            .map_err(ConfigError::metadata("metadata.environments"))?
            .into_iter()
            .map(environment_from_row)
            .collect())
    }

    async fn releases(&self, project: &str, environment: &str) -> ConfigResult<Vec<Release>> {
        Ok(data::fetch_releases(&self.pool, project, environment)
            .await
            .map_err(ConfigError::metadata("metadata.releases"))?
            .into_iter()
            .map(release_from_row)
            .collect())
    }

    async fn configs(&self, scope: &Scope) -> ConfigResult<Vec<Config>> {
        let rows = data::fetch_configs(
            &self.pool,
            &scope.project,
            &scope.environment,
            &scope.release,
        )
        .await
        .map_err(ConfigError::metadata("metadata.configs"))?;
        configs_from_rows(rows)
    }

    async fn audits(&self, filter: &AuditFilter) -> ConfigResult<Vec<Audit>> {
        let query = AuditQuery {
            action: filter.action.map(|action| action.as_str().to_string()),
            actor: filter.actor.clone(),
            from: filter.from,
            to: filter.to,
            limit: i64::from(filter.limit),
        };
        Ok(data::fetch_audits(&self.pool, &query)
            .await
            .map_err(ConfigError::metadata("metadata.audits"))?
            .into_iter()
            .map(audit_from_row)
            .collect())
    }
}

struct PgMetadataTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MetadataTx for PgMetadataTx {
    async fn project(&mut self, name: &str) -> ConfigResult<Option<Project>> {
        Ok(data::fetch_project_by_name(&mut *self.tx, name)
            .await
            .map_err(ConfigError::metadata("metadata.project"))?
            .map(project_from_row))
    }

    async fn create_project(&mut self, name: &str, description: &str) -> ConfigResult<Project> {
        data::insert_project(&mut *self.tx, name, description)
            .await
            .map(project_from_row)
            .map_err(map_data("metadata.create_project", "project", name))
    }

    async fn update_project_description(
        &mut self,
        project_id: i64,
        description: &str,
    ) -> ConfigResult<()> {
        data::update_project_description(&mut *self.tx, project_id, description)
            .await
            .map_err(ConfigError::metadata("metadata.update_project_description"))
    }

    async fn delete_project(&mut self, project_id: i64) -> ConfigResult<()> {
        data::delete_project(&mut *self.tx, project_id)
            .await
            .map_err(ConfigError::metadata("metadata.delete_project"))?;
        Ok(())
    }

    async fn environment(
        &mut self,
        project_id: i64,
        name: &str,
    ) -> ConfigResult<Option<Environment>> {
        Ok(data::fetch_environment(&mut *self.tx, project_id, name)
            .await
            .map_err(ConfigError::metadata("metadata.environment"))?
            .map(environment_from_row))
    }

    async fn create_environment(
        &mut self,
        project_id: i64,
        name: &str,
    ) -> ConfigResult<Environment> {
        data::insert_environment(&mut *self.tx, project_id, name)
            .await
            .map(environment_from_row)
            .map_err(map_data("metadata.create_environment", "environment", name))
    }

    async fn release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Option<Release>> {
        Ok(data::fetch_release(&mut *self.tx, environment_id, name)
            .await
            .map_err(ConfigError::metadata("metadata.release"))?
            .map(release_from_row))
    }

    async fn create_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<Release> {
        data::insert_release(&mut *self.tx, environment_id, name)
            .await
            .map(release_from_row)
            .map_err(map_data("metadata.create_release", "release", name))
    }

    async fn delete_release(&mut self, environment_id: i64, name: &str) -> ConfigResult<()> {
        data::delete_release(&mut *self.tx, environment_id, name)
            .await
            .map_err(ConfigError::metadata("metadata.delete_release"))?;
        Ok(())
    }

    async fn configs(&mut self, scope: &Scope) -> ConfigResult<Vec<Config>> {
        let rows = data::fetch_configs(
            &mut *self.tx,
            &scope.project,
            &scope.environment,
            &scope.release,
        )
        .await
        .map_err(ConfigError::metadata("metadata.configs"))?;
        configs_from_rows(rows)
    }

    async fn configs_by_keys(
        &mut self,
        scope: &Scope,
        keys: &[String],
    ) -> ConfigResult<Vec<Config>> {
        let rows = data::fetch_configs_by_keys(
            &mut *self.tx,
            &scope.project,
            &scope.environment,
            &scope.release,
            keys,
        )
        .await
        .map_err(ConfigError::metadata("metadata.configs_by_keys"))?;
        configs_from_rows(rows)
    }

    async fn upsert_config(&mut self, release_id: i64, config: &NewConfig) -> ConfigResult<()> {
        let row = NewConfigRow {
            key: config.key.clone(),
            value_type: config.value_type.as_str().to_string(),
            metadata: encode_metadata(&config.metadata)
                .map_err(ConfigError::encode("encode metadata"))?,
        };
        data::upsert_config(&mut *self.tx, release_id, &row)
            .await
            .map_err(ConfigError::metadata("metadata.upsert_config"))
    }

    async fn mark_configs_updated(&mut self, ids: &[i64]) -> ConfigResult<()> {
        data::mark_configs_updated(&mut *self.tx, ids)
            .await
            .map_err(ConfigError::metadata("metadata.mark_configs_updated"))
    }

    async fn delete_configs(&mut self, ids: &[i64]) -> ConfigResult<()> {
        data::delete_configs(&mut *self.tx, ids)
            .await
            .map_err(ConfigError::metadata("metadata.delete_configs"))
    }

    async fn insert_audit(&mut self, audit: &NewAudit) -> ConfigResult<i64> {
        let row = NewAuditRow {
            action: audit.action.as_str().to_string(),
            actor: audit.actor.clone(),
            payload: audit.payload.clone(),
        };
        data::insert_audit(&mut *self.tx, &row)
            .await
            .map_err(ConfigError::metadata("metadata.insert_audit"))
    }

    async fn commit(self: Box<Self>) -> ConfigResult<()> {
        self.tx.commit().await.map_err(|source| ConfigError::Metadata {
            operation: "metadata.commit",
            source: DataError::QueryFailed {
                operation: "commit transaction",
                source,
            },
        })
    }

    async fn rollback(self: Box<Self>) -> ConfigResult<()> {
        self.tx.rollback().await.map_err(|source| ConfigError::Metadata {
            operation: "metadata.rollback",
            source: DataError::QueryFailed {
                operation: "rollback transaction",
                source,
            },
        })
    }
}
