//! Immutable configuration value with on-demand coercions.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Result alias for value coercions.
pub type ValueResult<T> = std::result::Result<T, ValueError>;

/// Errors raised when coercing a [`Value`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value is empty.
    #[error("value not present")]
    NotPresent,
    /// The payload did not parse as the requested type.
    #[error("value does not parse as requested type")]
    Parse {
        /// Requested type label.
        kind: &'static str,
        /// Offending payload, lossily decoded.
        value: String,
    },
}

/// Raw configuration payload. Coercions are computed on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Value(Vec<u8>);

impl Value {
    /// Wrap raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The empty value.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the value and return its payload.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::NotPresent`] for an empty value and
    /// [`ValueError::Parse`] when the payload is not valid UTF-8.
    pub fn try_string(&self) -> ValueResult<String> {
        if self.is_empty() {
            return Err(ValueError::NotPresent);
        }
        String::from_utf8(self.0.clone()).map_err(|_| self.parse_error("string"))
    }

    /// Payload as text, or an empty string.
    #[must_use]
    pub fn string(&self) -> String {
        self.try_string().unwrap_or_default()
    }

    /// Payload as a boolean literal.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Parse`] when the payload is not a boolean literal.
    pub fn try_bool(&self) -> ValueResult<bool> {
        parse_bool(&self.text()).ok_or_else(|| self.parse_error("bool"))
    }

    /// Payload as a boolean, or `false`.
    #[must_use]
    pub fn bool(&self) -> bool {
        self.try_bool().unwrap_or_default()
    }

    /// Payload as a signed 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Parse`] when the payload is not an integer.
    pub fn try_int(&self) -> ValueResult<i64> {
        self.parse_as("int")
    }

    /// Payload as a signed integer, or `0`.
    #[must_use]
    pub fn int(&self) -> i64 {
        self.try_int().unwrap_or_default()
    }

    /// Payload as an unsigned 64-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Parse`] when the payload is not an unsigned integer.
    pub fn try_uint(&self) -> ValueResult<u64> {
        // `u64::from_str` tolerates a leading '+'; stored uints never carry one.
        if self.0.first() == Some(&b'+') {
            return Err(self.parse_error("uint"));
        }
        self.parse_as("uint")
    }

    /// Payload as an unsigned integer, or `0`.
    #[must_use]
    pub fn uint(&self) -> u64 {
        self.try_uint().unwrap_or_default()
    }

    /// Payload as a 64-bit float.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Parse`] when the payload is not a float.
    pub fn try_float(&self) -> ValueResult<f64> {
        self.parse_as("float")
    }

    /// Payload as a float, or `0.0`.
    #[must_use]
    pub fn float(&self) -> f64 {
        self.try_float().unwrap_or_default()
    }

    /// Parse the payload with any [`FromStr`] implementation.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Parse`] when parsing fails.
    pub fn parse<T: FromStr>(&self) -> ValueResult<T> {
        self.parse_as(std::any::type_name::<T>())
    }

    fn parse_as<T: FromStr>(&self, kind: &'static str) -> ValueResult<T> {
        self.text().parse().map_err(|_| self.parse_error(kind))
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    fn parse_error(&self, kind: &'static str) -> ValueError {
        ValueError::Parse {
            kind,
            value: self.text(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Parse the boolean literals accepted by configuration payloads.
#[must_use]
pub fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_and_lenient_accessors_agree_on_valid_payloads() {
        let value = Value::from("45");
        assert_eq!(value.try_int(), Ok(45));
        assert_eq!(value.int(), 45);
        assert_eq!(value.uint(), 45);
        assert!((value.float() - 45.0).abs() < f64::EPSILON);
        assert_eq!(value.string(), "45");
        assert_eq!(value.to_string(), "45");
    }

    #[test]
    fn lenient_accessors_fall_back_to_zero_values() {
        let value = Value::from("abc");
        assert!(matches!(
            value.try_int(),
            Err(ValueError::Parse { kind: "int", .. })
        ));
        assert_eq!(value.int(), 0);
        assert_eq!(value.uint(), 0);
        assert!(!value.bool());
        assert!(value.float().abs() < f64::EPSILON);
        assert_eq!(Value::from("-1").uint(), 0);
        assert_eq!(Value::from("+1").uint(), 0);
        assert!(Value::from("+1").try_uint().is_err());
    }

    #[test]
    fn empty_value_is_not_present_as_string() {
        let value = Value::empty();
        assert!(value.is_empty());
        assert_eq!(value.try_string(), Err(ValueError::NotPresent));
        assert_eq!(value.string(), "");
        assert!(value.try_bool().is_err());
    }

    #[test]
    fn boolean_literals_match_platform_rules() {
        for literal in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(Value::from(literal).try_bool(), Ok(true), "{literal}");
        }
        for literal in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(Value::from(literal).try_bool(), Ok(false), "{literal}");
        }
        for literal in ["yes", "tRUE", " true", ""] {
            assert!(Value::from(literal).try_bool().is_err(), "{literal}");
        }
    }

    #[test]
    fn generic_parse_uses_from_str() {
        let value = Value::from("127.0.0.1");
        let addr: std::net::Ipv4Addr = value.parse().unwrap();
        assert!(addr.is_loopback());
        assert!(value.parse::<u8>().is_err());
    }

    #[test]
    fn invalid_utf8_is_a_string_parse_error() {
        let value = Value::new(vec![0xff, 0xfe]);
        assert!(matches!(
            value.try_string(),
            Err(ValueError::Parse { kind: "string", .. })
        ));
        assert_eq!(value.as_bytes(), &[0xff, 0xfe]);
    }
}
