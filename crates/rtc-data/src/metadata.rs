//! Metadata schema migrations and query helpers.
//!
//! Every helper is generic over an [`Executor`] so callers can run it against
//! the pool for standalone reads or against `&mut *tx` inside an open
//! transaction.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Executor, FromRow, PgPool, Postgres};

use crate::error::{DataError, Result, classify};

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| classify(operation, source)
}

/// Apply the embedded metadata migrations.
///
/// # Errors
///
/// Returns an error when migration execution fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })?;
    Ok(())
}

/// Raw projection of the `projects` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProjectRow {
    /// Primary key.
    pub id: i64,
    /// Unique project name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// Page columns are NULL on the single row returned when the page is empty.
#[derive(Debug, FromRow)]
struct ProjectPageRow {
    id: Option<i64>,
    name: Option<String>,
    description: Option<String>,
    created_at: Option<DateTime<Utc>>,
    total: i64,
}

/// A page of projects plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPage {
    /// Projects on the requested page.
    pub projects: Vec<ProjectRow>,
    /// Total number of projects matching the filter.
    pub total: u64,
}

/// Paging and search parameters for project listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectQuery {
    /// Optional substring matched against the project name.
    pub search: Option<String>,
    /// Maximum number of rows to return.
    pub limit: i64,
    /// Number of rows to skip.
    pub offset: i64,
}

/// Raw projection of the `environments` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EnvironmentRow {
    /// Primary key.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Environment name, unique per project.
    pub name: String,
}

/// Raw projection of the `releases` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ReleaseRow {
    /// Primary key.
    pub id: i64,
    /// Owning environment.
    pub environment_id: i64,
    /// Release name, unique per environment.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Raw projection of the `configs` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ConfigRow {
    /// Primary key.
    pub id: i64,
    /// Owning release.
    pub release_id: i64,
    /// Config key, unique per release.
    pub key: String,
    /// Declared value type label.
    pub value_type: String,
    /// Versioned metadata document.
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last value change, if any.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert-or-update payload for a config row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConfigRow {
    /// Config key.
    pub key: String,
    /// Declared value type label.
    pub value_type: String,
    /// Versioned metadata document.
    pub metadata: Value,
}

/// Raw projection of the `audit_log` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AuditRow {
    /// Primary key.
    pub id: i64,
    /// Action label.
    pub action: String,
    /// Actor that performed the action.
    pub actor: String,
    /// Versioned payload document.
    pub payload: Value,
    /// Time the row was appended.
    pub ts: DateTime<Utc>,
}

/// Payload for appending an audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRow {
    /// Action label.
    pub action: String,
    /// Actor that performed the action.
    pub actor: String,
    /// Versioned payload document.
    pub payload: Value,
}

/// Filters applied to audit searches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Restrict to a single action label.
    pub action: Option<String>,
    /// Restrict to a single actor.
    pub actor: Option<String>,
    /// Inclusive lower bound on the timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of rows to return.
    pub limit: i64,
}

const SELECT_PROJECTS: &str = r"
    WITH matching AS (
        SELECT id, name, description, created_at FROM rtc.projects
        WHERE ($1::text IS NULL OR strpos(name, $1) > 0)
    )
    SELECT page.id, page.name, page.description, page.created_at,
           (SELECT COUNT(*) FROM matching) AS total
    FROM (SELECT 1) AS anchor
    LEFT JOIN LATERAL (
        SELECT * FROM matching ORDER BY id DESC LIMIT $2 OFFSET $3
    ) AS page ON TRUE
";

const SELECT_PROJECT_BY_NAME: &str = r"
    SELECT id, name, description, created_at FROM rtc.projects WHERE name = $1
";

const INSERT_PROJECT: &str = r"
    INSERT INTO rtc.projects (name, description) VALUES ($1, $2)
    RETURNING id, name, description, created_at
";

const UPDATE_PROJECT_DESCRIPTION: &str = r"
    UPDATE rtc.projects SET description = $2 WHERE id = $1
";

const DELETE_PROJECT: &str = r"DELETE FROM rtc.projects WHERE id = $1";

const SELECT_ENVIRONMENTS: &str = r"
    SELECT e.id, e.project_id, e.name FROM rtc.environments e
    JOIN rtc.projects p ON p.id = e.project_id
    WHERE p.name = $1
    ORDER BY e.name
";

const SELECT_ENVIRONMENT: &str = r"
    SELECT id, project_id, name FROM rtc.environments WHERE project_id = $1 AND name = $2
";

const INSERT_ENVIRONMENT: &str = r"
    INSERT INTO rtc.environments (project_id, name) VALUES ($1, $2)
    RETURNING id, project_id, name
";

const SELECT_RELEASES: &str = r"
    SELECT r.id, r.environment_id, r.name, r.created_at FROM rtc.releases r
    JOIN rtc.environments e ON e.id = r.environment_id
    JOIN rtc.projects p ON p.id = e.project_id
    WHERE p.name = $1 AND e.name = $2
    ORDER BY r.created_at DESC, r.id DESC
";

const SELECT_RELEASE: &str = r"
    SELECT id, environment_id, name, created_at FROM rtc.releases
    WHERE environment_id = $1 AND name = $2
";

const INSERT_RELEASE: &str = r"
    INSERT INTO rtc.releases (environment_id, name) VALUES ($1, $2)
    RETURNING id, environment_id, name, created_at
";

const DELETE_RELEASE: &str = r"
    DELETE FROM rtc.releases WHERE environment_id = $1 AND name = $2
";

const SELECT_CONFIGS: &str = r"
    SELECT c.id, c.release_id, c.key, c.value_type, c.metadata, c.created_at, c.updated_at
    FROM rtc.configs c
    JOIN rtc.releases r ON r.id = c.release_id
    JOIN rtc.environments e ON e.id = r.environment_id
    JOIN rtc.projects p ON p.id = e.project_id
    WHERE p.name = $1 AND e.name = $2 AND r.name = $3
    ORDER BY c.key
";

const SELECT_CONFIGS_BY_KEYS: &str = r"
    SELECT c.id, c.release_id, c.key, c.value_type, c.metadata, c.created_at, c.updated_at
    FROM rtc.configs c
    JOIN rtc.releases r ON r.id = c.release_id
    JOIN rtc.environments e ON e.id = r.environment_id
    JOIN rtc.projects p ON p.id = e.project_id
    WHERE p.name = $1 AND e.name = $2 AND r.name = $3 AND c.key = ANY($4)
    ORDER BY c.key
";

// Conflicts keep `updated_at`: it tracks value changes, never metadata edits.
const UPSERT_CONFIG: &str = r"
    INSERT INTO rtc.configs (release_id, key, value_type, metadata) VALUES ($1, $2, $3, $4)
    ON CONFLICT (release_id, key)
    DO UPDATE SET value_type = EXCLUDED.value_type, metadata = EXCLUDED.metadata
";

const MARK_CONFIGS_UPDATED: &str = r"
    UPDATE rtc.configs SET updated_at = NOW() WHERE id = ANY($1)
";

const DELETE_CONFIGS: &str = r"DELETE FROM rtc.configs WHERE id = ANY($1)";

const INSERT_AUDIT: &str = r"
    INSERT INTO rtc.audit_log (action, actor, payload) VALUES ($1, $2, $3) RETURNING id
";

const SELECT_AUDITS: &str = r"
    SELECT id, action, actor, payload, ts FROM rtc.audit_log
    WHERE ($1::text IS NULL OR action = $1)
      AND ($2::text IS NULL OR actor = $2)
      AND ($3::timestamptz IS NULL OR ts >= $3)
      AND ($4::timestamptz IS NULL OR ts <= $4)
    ORDER BY ts DESC, id DESC
    LIMIT $5
";

/// List projects, newest first, with the total number of matches.
///
/// The total counts every match even when `offset` is past the last one.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_projects<'e, E>(executor: E, query: &ProjectQuery) -> Result<ProjectPage>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, ProjectPageRow>(SELECT_PROJECTS)
        .bind(query.search.as_deref())
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("list projects"))?;

    let total = rows
        .first()
        .map_or(0, |row| u64::try_from(row.total).unwrap_or_default());
    let projects = rows
        .into_iter()
        .filter_map(|row| {
            Some(ProjectRow {
                id: row.id?,
                name: row.name?,
                description: row.description?,
                created_at: row.created_at?,
            })
        })
        .collect();
    Ok(ProjectPage { projects, total })
}

/// Fetch a project by its unique name.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_project_by_name<'e, E>(executor: E, name: &str) -> Result<Option<ProjectRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ProjectRow>(SELECT_PROJECT_BY_NAME)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch project by name"))
}

/// Insert a new project.
///
/// # Errors
///
/// Returns [`DataError::UniqueViolation`] when the name is taken, or an error
/// when the insert fails.
pub async fn insert_project<'e, E>(executor: E, name: &str, description: &str) -> Result<ProjectRow>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ProjectRow>(INSERT_PROJECT)
        .bind(name)
        .bind(description)
        .fetch_one(executor)
        .await
        .map_err(map_query_err("insert project"))
}

/// Replace a project's description.
///
/// # Errors
///
/// Returns an error when the update fails.
pub async fn update_project_description<'e, E>(
    executor: E,
    project_id: i64,
    description: &str,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(UPDATE_PROJECT_DESCRIPTION)
        .bind(project_id)
        .bind(description)
        .execute(executor)
        .await
        .map_err(map_query_err("update project description"))?;
    Ok(())
}

/// Delete a project; environments, releases and configs cascade.
///
/// # Errors
///
/// Returns an error when the delete fails.
pub async fn delete_project<'e, E>(executor: E, project_id: i64) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(DELETE_PROJECT)
        .bind(project_id)
        .execute(executor)
        .await
        .map_err(map_query_err("delete project"))?;
    Ok(result.rows_affected())
}

/// List environments belonging to a project.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_environments<'e, E>(executor: E, project: &str) -> Result<Vec<EnvironmentRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, EnvironmentRow>(SELECT_ENVIRONMENTS)
        .bind(project)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("list environments"))
}

/// Fetch an environment by project and name.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_environment<'e, E>(
    executor: E,
    project_id: i64,
    name: &str,
) -> Result<Option<EnvironmentRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, EnvironmentRow>(SELECT_ENVIRONMENT)
        .bind(project_id)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch environment"))
}

/// Insert a new environment.
///
/// # Errors
///
/// Returns an error when the insert fails.
pub async fn insert_environment<'e, E>(
    executor: E,
    project_id: i64,
    name: &str,
) -> Result<EnvironmentRow>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, EnvironmentRow>(INSERT_ENVIRONMENT)
        .bind(project_id)
        .bind(name)
        .fetch_one(executor)
        .await
        .map_err(map_query_err("insert environment"))
}

/// List releases of an environment, newest first.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_releases<'e, E>(
    executor: E,
    project: &str,
    environment: &str,
) -> Result<Vec<ReleaseRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ReleaseRow>(SELECT_RELEASES)
        .bind(project)
        .bind(environment)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("list releases"))
}

/// Fetch a release by environment and name.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_release<'e, E>(
    executor: E,
    environment_id: i64,
    name: &str,
) -> Result<Option<ReleaseRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ReleaseRow>(SELECT_RELEASE)
        .bind(environment_id)
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch release"))
}

/// Insert a new release.
///
/// # Errors
///
/// Returns an error when the insert fails.
pub async fn insert_release<'e, E>(
    executor: E,
    environment_id: i64,
    name: &str,
) -> Result<ReleaseRow>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ReleaseRow>(INSERT_RELEASE)
        .bind(environment_id)
        .bind(name)
        .fetch_one(executor)
        .await
        .map_err(map_query_err("insert release"))
}

/// Delete a release; its configs cascade. Returns the number of rows removed.
///
/// # Errors
///
/// Returns an error when the delete fails.
pub async fn delete_release<'e, E>(executor: E, environment_id: i64, name: &str) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(DELETE_RELEASE)
        .bind(environment_id)
        .bind(name)
        .execute(executor)
        .await
        .map_err(map_query_err("delete release"))?;
    Ok(result.rows_affected())
}

/// List every config of a release scope, ordered by key.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_configs<'e, E>(
    executor: E,
    project: &str,
    environment: &str,
    release: &str,
) -> Result<Vec<ConfigRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ConfigRow>(SELECT_CONFIGS)
        .bind(project)
        .bind(environment)
        .bind(release)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("list configs"))
}

/// Fetch the configs of a release scope whose keys are in `keys`.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_configs_by_keys<'e, E>(
    executor: E,
    project: &str,
    environment: &str,
    release: &str,
    keys: &[String],
) -> Result<Vec<ConfigRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ConfigRow>(SELECT_CONFIGS_BY_KEYS)
        .bind(project)
        .bind(environment)
        .bind(release)
        .bind(keys)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("list configs by keys"))
}

/// Insert a config row or update the type and metadata of an existing one.
///
/// # Errors
///
/// Returns an error when the statement fails.
pub async fn upsert_config<'e, E>(executor: E, release_id: i64, config: &NewConfigRow) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(UPSERT_CONFIG)
        .bind(release_id)
        .bind(&config.key)
        .bind(&config.value_type)
        .bind(&config.metadata)
        .execute(executor)
        .await
        .map_err(map_query_err("upsert config"))?;
    Ok(())
}

/// Stamp `updated_at = NOW()` on the given configs.
///
/// # Errors
///
/// Returns an error when the update fails.
pub async fn mark_configs_updated<'e, E>(executor: E, ids: &[i64]) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(MARK_CONFIGS_UPDATED)
        .bind(ids)
        .execute(executor)
        .await
        .map_err(map_query_err("mark configs updated"))?;
    Ok(())
}

/// Delete the given config rows.
///
/// # Errors
///
/// Returns an error when the delete fails.
pub async fn delete_configs<'e, E>(executor: E, ids: &[i64]) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(DELETE_CONFIGS)
        .bind(ids)
        .execute(executor)
        .await
        .map_err(map_query_err("delete configs"))?;
    Ok(())
}

/// Append an audit row and return its identifier.
///
/// # Errors
///
/// Returns an error when the insert fails.
pub async fn insert_audit<'e, E>(executor: E, audit: &NewAuditRow) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar(INSERT_AUDIT)
        .bind(&audit.action)
        .bind(&audit.actor)
        .bind(&audit.payload)
        .fetch_one(executor)
        .await
        .map_err(map_query_err("insert audit"))
}

/// Search the audit log, newest first.
///
/// # Errors
///
/// Returns an error when the query fails.
pub async fn fetch_audits<'e, E>(executor: E, query: &AuditQuery) -> Result<Vec<AuditRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, AuditRow>(SELECT_AUDITS)
        .bind(query.action.as_deref())
        .bind(query.actor.as_deref())
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("search audits"))
}
