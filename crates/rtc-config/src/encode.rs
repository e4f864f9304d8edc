//! Versioned JSON documents for config metadata and audit payloads.
//!
//! Every document carries `"version": "v1"`; decoding rejects other versions.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::model::{AuditAction, ConfigMetadata, ConfigView};

/// Current document version.
pub const VERSION_V1: &str = "v1";

#[derive(Debug, Serialize, Deserialize)]
struct MetadataV1 {
    version: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    usage: String,
    #[serde(default)]
    writable: bool,
    #[serde(default)]
    view: ViewV1,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ViewV1 {
    #[serde(rename = "enum", default)]
    enum_values: Vec<String>,
}

/// Encode config metadata as a `v1` document.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn encode_metadata(metadata: &ConfigMetadata) -> Result<Json, serde_json::Error> {
    serde_json::to_value(MetadataV1 {
        version: VERSION_V1.to_string(),
        group: metadata.group.clone(),
        usage: metadata.usage.clone(),
        writable: metadata.writable,
        view: ViewV1 {
            enum_values: metadata.view.enum_values.clone(),
        },
    })
}

/// Decode a stored metadata document.
///
/// # Errors
///
/// Returns an error when the document is malformed or not `v1`.
pub fn decode_metadata(document: Json) -> Result<ConfigMetadata, serde_json::Error> {
    let decoded: MetadataV1 = serde_json::from_value(document)?;
    if decoded.version != VERSION_V1 {
        return Err(serde_json::Error::custom(format!(
            "unsupported metadata version `{}`",
            decoded.version
        )));
    }
    Ok(ConfigMetadata {
        group: decoded.group,
        usage: decoded.usage,
        writable: decoded.writable,
        view: ConfigView {
            enum_values: decoded.view.enum_values,
        },
    })
}

/// One changed key inside a `config_updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdateItem {
    /// Config key.
    pub key: String,
    /// Value before the update.
    pub old_value: String,
    /// Value after the update.
    pub new_value: String,
}

/// Audit payloads, one shape per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AuditPayload {
    /// Consumer-facing batch of value changes.
    ConfigUpdated {
        /// Project name.
        project: String,
        /// Environment name.
        environment: String,
        /// Release name.
        release: String,
        /// Changed keys, sorted.
        items: Vec<ConfigUpdateItem>,
    },
    /// Reconciliation of a scope's config set.
    ConfigsUpserted {
        /// Project name.
        project: String,
        /// Environment name.
        environment: String,
        /// Release name.
        release: String,
        /// Keys that received an initial value.
        created: Vec<String>,
        /// Keys removed from the scope.
        deleted: Vec<String>,
    },
    /// Project creation.
    ProjectCreated {
        /// Project name.
        project: String,
        /// Initial description.
        description: String,
    },
    /// Description change.
    ProjectUpdated {
        /// Project name.
        project: String,
        /// Previous description.
        old_description: String,
        /// New description.
        new_description: String,
    },
    /// Project removal.
    ProjectDeleted {
        /// Project name.
        project: String,
    },
    /// Release removal.
    ReleaseDeleted {
        /// Project name.
        project: String,
        /// Environment name.
        env: String,
        /// Release name.
        release: String,
    },
}

impl AuditPayload {
    /// Action recorded for this payload.
    #[must_use]
    pub const fn action(&self) -> AuditAction {
        match self {
            Self::ConfigUpdated { .. } => AuditAction::ConfigUpdated,
            Self::ConfigsUpserted { .. } => AuditAction::ConfigsUpserted,
            Self::ProjectCreated { .. } => AuditAction::ProjectCreated,
            Self::ProjectUpdated { .. } => AuditAction::ProjectUpdated,
            Self::ProjectDeleted { .. } => AuditAction::ProjectDeleted,
            Self::ReleaseDeleted { .. } => AuditAction::ReleaseDeleted,
        }
    }

    /// Encode as a `v1` document.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn encode(&self) -> Result<Json, serde_json::Error> {
        let mut document = match serde_json::to_value(self)? {
            Json::Object(map) => map,
            _ => Map::new(),
        };
        document.insert("version".to_string(), Json::String(VERSION_V1.to_string()));
        Ok(Json::Object(document))
    }
}
