//! Domain types shared by the engine, the store adapters and callers.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use rtc_client::Value;
use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_AUDIT_LIMIT, DEFAULT_PAGE_SIZE};

/// Declared type of a config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Arbitrary text.
    String,
    /// Boolean literal.
    Bool,
    /// Signed integer.
    Int,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned integer.
    Uint,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Floating point number.
    Float,
    /// 64-bit floating point number.
    Float64,
    /// Unrecognised label; never validates.
    #[serde(other)]
    Unknown,
}

impl ValueType {
    /// Every recognised type.
    pub const ALL: [Self; 9] = [
        Self::String,
        Self::Bool,
        Self::Int,
        Self::Int64,
        Self::Uint,
        Self::Uint64,
        Self::Float,
        Self::Float64,
        Self::Unknown,
    ];

    /// Stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Uint => "uint",
            Self::Uint64 => "uint64",
            Self::Float => "float",
            Self::Float64 => "float64",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored label; unrecognised labels map to [`ValueType::Unknown`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == label)
            .unwrap_or(Self::Unknown)
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation hints for a config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    /// Allowed values offered by editors; empty for free input.
    pub enum_values: Vec<String>,
}

/// Descriptive metadata stored with every config row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Grouping label.
    pub group: String,
    /// Free-form usage notes.
    pub usage: String,
    /// Whether consumers may set the value through `set_config_values`.
    pub writable: bool,
    /// Presentation hints.
    pub view: ConfigView,
}

/// Project → environment → release coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Release name.
    pub release: String,
}

impl Scope {
    /// Build a scope from borrowed names.
    #[must_use]
    pub fn new(project: &str, environment: &str, release: &str) -> Self {
        Self {
            project: project.to_string(),
            environment: environment.to_string(),
            release: release.to_string(),
        }
    }
}

/// Root of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Store identifier.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Environment within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Store identifier.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Name, unique per project.
    pub name: String,
}

/// Release within an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Store identifier.
    pub id: i64,
    /// Owning environment.
    pub environment_id: i64,
    /// Name, unique per environment.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Persisted config row; the live value lives in the values store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Store identifier.
    pub id: i64,
    /// Owning release.
    pub release_id: i64,
    /// Key, unique per release.
    pub key: String,
    /// Declared type.
    pub value_type: ValueType,
    /// Descriptive metadata.
    pub metadata: ConfigMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last value change.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A config joined with its current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    /// Metadata row.
    pub config: Config,
    /// Current value.
    pub value: Value,
}

/// Desired config for an upsert; `value` seeds keys that have no value yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConfig {
    /// Key.
    pub key: String,
    /// Declared type.
    pub value_type: ValueType,
    /// Descriptive metadata.
    pub metadata: ConfigMetadata,
    /// Initial value literal.
    pub value: Value,
}

/// Paging and search parameters for project listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFilter {
    /// Substring matched against project names.
    pub query: Option<String>,
    /// Page size.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u32,
}

impl Default for ProjectFilter {
    fn default() -> Self {
        Self {
            query: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// One page of projects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectPage {
    /// Projects on this page, newest first.
    pub projects: Vec<Project>,
    /// Total matches across all pages.
    pub total: u64,
}

/// Mutations recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Consumer-facing value update.
    ConfigUpdated,
    /// Privileged reconciliation of a scope's config set.
    ConfigsUpserted,
    /// Project creation.
    ProjectCreated,
    /// Project description change.
    ProjectUpdated,
    /// Project removal.
    ProjectDeleted,
    /// Release removal.
    ReleaseDeleted,
}

impl AuditAction {
    /// Every action the engine emits.
    pub const ALL: [Self; 6] = [
        Self::ConfigUpdated,
        Self::ConfigsUpserted,
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectDeleted,
        Self::ReleaseDeleted,
    ];

    /// Stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigUpdated => "config_updated",
            Self::ConfigsUpserted => "configs_upserted",
            Self::ProjectCreated => "project_created",
            Self::ProjectUpdated => "project_updated",
            Self::ProjectDeleted => "project_deleted",
            Self::ReleaseDeleted => "release_deleted",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appended audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct Audit {
    /// Store identifier.
    pub id: i64,
    /// Action label.
    pub action: String,
    /// Actor that performed the mutation.
    pub actor: String,
    /// Versioned JSON payload.
    pub payload: serde_json::Value,
    /// Append time.
    pub ts: DateTime<Utc>,
}

/// Audit search filters; every field narrows the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFilter {
    /// Restrict to one action.
    pub action: Option<AuditAction>,
    /// Restrict to one actor.
    pub actor: Option<String>,
    /// Inclusive lower time bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    pub to: Option<DateTime<Utc>>,
    /// Maximum rows returned.
    pub limit: u32,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            action: None,
            actor: None,
            from: None,
            to: None,
            limit: DEFAULT_AUDIT_LIMIT,
        }
    }
}

impl AuditFilter {
    /// Whether `audit` satisfies every filter except the limit.
    #[must_use]
    pub fn matches(&self, audit: &Audit) -> bool {
        self.action
            .is_none_or(|action| action.as_str() == audit.action)
            && self.actor.as_deref().is_none_or(|actor| actor == audit.actor)
            && self.from.is_none_or(|from| audit.ts >= from)
            && self.to.is_none_or(|to| audit.ts <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_labels_round_trip() {
        for value_type in ValueType::ALL {
            assert_eq!(ValueType::from_label(value_type.as_str()), value_type);
        }
        assert_eq!(ValueType::from_label("decimal"), ValueType::Unknown);
        let parsed: ValueType = serde_json::from_str("\"uint64\"").unwrap();
        assert_eq!(parsed, ValueType::Uint64);
        let other: ValueType = serde_json::from_str("\"map\"").unwrap();
        assert_eq!(other, ValueType::Unknown);
    }

    #[test]
    fn audit_filter_matches_on_every_field() {
        let audit = Audit {
            id: 1,
            action: "config_updated".into(),
            actor: "alice".into(),
            payload: serde_json::json!({}),
            ts: Utc::now(),
        };
        assert!(AuditFilter::default().matches(&audit));
        assert!(
            AuditFilter {
                action: Some(AuditAction::ConfigUpdated),
                actor: Some("alice".into()),
                ..AuditFilter::default()
            }
            .matches(&audit)
        );
        assert!(
            !AuditFilter {
                action: Some(AuditAction::ProjectDeleted),
                ..AuditFilter::default()
            }
            .matches(&audit)
        );
        assert!(
            !AuditFilter {
                from: Some(audit.ts + chrono::Duration::seconds(1)),
                ..AuditFilter::default()
            }
            .matches(&audit)
        );
    }
}
