//! Scalar values and rows exchanged between sources, transforms and sinks.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp text format used when a timestamp has to be rendered as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

static NULL: Value = Value::Null;

/// A scalar field value.
///
/// Covers what the legacy schema yields plus the array-typed columns the
/// revised schema introduced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
    /// Array of text values.
    TextArray(Vec<String>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as an identifier string.
    ///
    /// Returns `None` for null so callers cannot confuse a missing reference
    /// with the literal text `"null"`.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Parse one field of a tabular snapshot.
    ///
    /// `true`/`false` (any case) become booleans; empty fields and `NaN`
    /// become null; everything else is kept as text.
    pub fn from_csv_field(raw: &str) -> Value {
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
            return Value::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        Value::Text(raw.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
            Value::TextArray(items) => write!(f, "{{{}}}", items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A record: field name to value.
///
/// Source and target rows share this shape. Reading an absent field yields
/// [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Get a field, null when absent.
    pub fn get(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&NULL)
    }

    /// Get a text field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).as_str()
    }

    /// Whether the field is present in the row, even if null.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Identifier string built from one or more fields, `None` if any is null.
    pub fn key_of(&self, fields: &[String]) -> Option<String> {
        let parts = fields
            .iter()
            .map(|f| self.get(f).key_string())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_csv_normalization() {
        assert_eq!(Value::from_csv_field("TRUE"), Value::Bool(true));
        assert_eq!(Value::from_csv_field("false"), Value::Bool(false));
        assert_eq!(Value::from_csv_field(""), Value::Null);
        assert_eq!(Value::from_csv_field("NaN"), Value::Null);
        assert_eq!(Value::from_csv_field("42"), Value::Text("42".into()));
        assert_eq!(
            Value::from_csv_field("truehearted"),
            Value::Text("truehearted".into())
        );
    }

    #[test]
    fn test_key_string() {
        assert_eq!(Value::Null.key_string(), None);
        assert_eq!(Value::from("u1").key_string().as_deref(), Some("u1"));
        assert_eq!(Value::Int(7).key_string().as_deref(), Some("7"));

        let ts = NaiveDate::from_ymd_opt(2017, 3, 21)
            .unwrap()
            .and_hms_opt(18, 23, 56)
            .unwrap();
        assert_eq!(
            Value::Timestamp(ts).key_string().as_deref(),
            Some("2017-03-21 18:23:56")
        );
    }

    #[test]
    fn test_row_missing_field_is_null() {
        let row = Row::new().with("id", "p1");
        assert!(row.get("creator_user_id").is_null());
        assert!(!row.contains("creator_user_id"));
        assert_eq!(row.get_str("id"), Some("p1"));
    }

    #[test]
    fn test_row_composite_key() {
        let row = Row::new()
            .with("follower_id", "u1")
            .with("object_id", "g1");
        let fields = vec!["follower_id".to_string(), "object_id".to_string()];
        assert_eq!(row.key_of(&fields).as_deref(), Some("u1/g1"));

        let partial = Row::new().with("follower_id", "u1");
        assert_eq!(partial.key_of(&fields), None);
    }

    #[test]
    fn test_row_serializes_as_map() {
        let row = Row::new().with("id", "u1").with("sysadmin", false);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":"u1","sysadmin":false}"#);
    }
}
