//! Validation rules for value writes and config upserts.

use std::collections::HashSet;

use rtc_client::Value;
use rtc_client::value::parse_bool;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{Config, NewConfig, Scope, ValueType};

/// Whether `value` parses under `value_type`.
#[must_use]
pub fn value_matches_type(value_type: ValueType, value: &Value) -> bool {
    let Ok(text) = std::str::from_utf8(value.as_bytes()) else {
        return false;
    };
    match value_type {
        ValueType::String => true,
        ValueType::Bool => parse_bool(text).is_some(),
        ValueType::Int | ValueType::Int64 => text.parse::<i64>().is_ok(),
        // `u64::from_str` takes a leading '+', unsigned literals here do not.
        ValueType::Uint | ValueType::Uint64 => {
            !text.starts_with('+') && text.parse::<u64>().is_ok()
        }
        ValueType::Float | ValueType::Float64 => text.parse::<f64>().is_ok(),
        ValueType::Unknown => false,
    }
}

fn ensure_type(key: &str, value_type: ValueType, value: &Value) -> ConfigResult<()> {
    if value_matches_type(value_type, value) {
        Ok(())
    } else {
        Err(ConfigError::not_valid(
            key,
            "value does not match declared type",
            Some(value.to_string()),
        ))
    }
}

/// Reject keys that are empty or would escape their scope path.
///
/// # Errors
///
/// Returns [`ConfigError::NotValid`] for an empty key or one containing `/`.
pub fn validate_key(key: &str) -> ConfigResult<()> {
    validate_segment(key, key)
}

/// Reject scope names that would not map to exactly one path segment.
///
/// # Errors
///
/// Returns [`ConfigError::NotValid`] when the project, environment or
/// release name is empty or contains `/`.
pub fn validate_scope(scope: &Scope) -> ConfigResult<()> {
    validate_segment("project", &scope.project)?;
    validate_segment("environment", &scope.environment)?;
    validate_segment("release", &scope.release)
}

fn validate_segment(field: &str, segment: &str) -> ConfigResult<()> {
    if segment.is_empty() {
        return Err(ConfigError::not_valid(field, "name must not be empty", None));
    }
    if segment.contains('/') {
        return Err(ConfigError::not_valid(
            field,
            "name must not contain '/'",
            Some(segment.to_string()),
        ));
    }
    Ok(())
}

/// Reject batches above the atomic write ceiling.
///
/// # Errors
///
/// Returns [`ConfigError::NotValid`] when `size` exceeds `limit`.
pub fn validate_batch_size(size: usize, limit: usize) -> ConfigResult<()> {
    if size > limit {
        return Err(ConfigError::not_valid(
            "configs",
            "batch exceeds maximum size",
            Some(size.to_string()),
        ));
    }
    Ok(())
}

/// Check a consumer-facing value write against its config.
///
/// # Errors
///
/// Returns [`ConfigError::NotValid`] when the config is not writable or the
/// value does not parse under its type.
pub fn validate_new_value(config: &Config, value: &Value) -> ConfigResult<()> {
    if !config.metadata.writable {
        return Err(ConfigError::not_valid(
            &config.key,
            "config is not writable",
            None,
        ));
    }
    ensure_type(&config.key, config.value_type, value)
}

/// Check a privileged upsert batch. Writability is not required.
///
/// # Errors
///
/// Returns [`ConfigError::NotValid`] on the first oversized batch, malformed
/// or duplicate key, or literal that does not parse under its type.
pub fn validate_upsert(configs: &[NewConfig], limit: usize) -> ConfigResult<()> {
    validate_batch_size(configs.len(), limit)?;
    let mut seen = HashSet::with_capacity(configs.len());
    for config in configs {
        validate_key(&config.key)?;
        if !seen.insert(config.key.as_str()) {
            return Err(ConfigError::not_valid(
                &config.key,
                "duplicate key",
                Some(config.key.clone()),
            ));
        }
        ensure_type(&config.key, config.value_type, &config.value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use crate::model::ConfigMetadata;
    use chrono::Utc;

    fn config(value_type: ValueType, writable: bool) -> Config {
        Config {
            id: 1,
            release_id: 1,
            key: "timeout".into(),
            value_type,
            metadata: ConfigMetadata {
                writable,
                ..ConfigMetadata::default()
            },
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn new_config(key: &str, value_type: ValueType, value: &str) -> NewConfig {
        NewConfig {
            key: key.into(),
            value_type,
            metadata: ConfigMetadata::default(),
            value: Value::from(value),
        }
    }

    #[test]
    fn type_parsers_follow_literal_rules() {
        let cases = [
            (ValueType::String, "anything", true),
            (ValueType::Bool, "True", true),
            (ValueType::Bool, "yes", false),
            (ValueType::Int, "45", true),
            (ValueType::Int, "abc", false),
            (ValueType::Int64, "-9223372036854775808", true),
            (ValueType::Uint, "-1", false),
            (ValueType::Uint, "+1", false),
            (ValueType::Uint64, "+18", false),
            (ValueType::Int, "+1", true),
            (ValueType::Uint64, "18446744073709551615", true),
            (ValueType::Float, "1.5e3", true),
            (ValueType::Float64, "one", false),
            (ValueType::Unknown, "45", false),
        ];
        for (value_type, literal, expected) in cases {
            assert_eq!(
                value_matches_type(value_type, &Value::from(literal)),
                expected,
                "{value_type} {literal}"
            );
        }
    }

    #[test]
    fn non_writable_configs_reject_valid_values() {
        let err = validate_new_value(&config(ValueType::Int, false), &Value::from("45"))
            .unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::NotValid);
        assert!(validate_new_value(&config(ValueType::Int, true), &Value::from("45")).is_ok());
        assert!(validate_new_value(&config(ValueType::Int, true), &Value::from("abc")).is_err());
    }

    #[test]
    fn upsert_rejects_bad_batches() {
        assert!(validate_upsert(&[new_config("a", ValueType::Int, "1")], 128).is_ok());
        assert!(validate_upsert(&[new_config("a/b", ValueType::Int, "1")], 128).is_err());
        assert!(validate_upsert(&[new_config("", ValueType::String, "x")], 128).is_err());
        assert!(
            validate_upsert(
                &[
                    new_config("a", ValueType::Int, "1"),
                    new_config("a", ValueType::Int, "2"),
                ],
                128
            )
            .is_err()
        );
        assert!(validate_upsert(&[new_config("a", ValueType::Bool, "2")], 128).is_err());

        let oversized: Vec<NewConfig> = (0..129)
            .map(|index| new_config(&format!("k{index}"), ValueType::String, "x"))
            .collect();
        assert!(validate_upsert(&oversized, 128).is_err());
        assert!(validate_upsert(&oversized[..128], 128).is_ok());
    }

    #[test]
    fn scope_names_must_be_single_segments() {
        assert!(validate_scope(&Scope::new("billing", "prod", "v1")).is_ok());
        for scope in [
            Scope::new("billing", "prod", "v1/x"),
            Scope::new("billing", "", "v1"),
            Scope::new("bill/ing", "prod", "v1"),
        ] {
            let err = validate_scope(&scope).unwrap_err();
            assert_eq!(err.kind(), ConfigErrorKind::NotValid);
        }
        assert!(matches!(
            validate_scope(&Scope::new("billing", "prod", "v1/x")),
            Err(ConfigError::NotValid { field, .. }) if field == "release"
        ));
    }
}
