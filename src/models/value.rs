//! Dynamic scalar values and records
//!
//! Records arrive from external parsers (spreadsheets, delimited files,
//! structured feeds) and carry values of dynamic type. `Value` is the tagged
//! union every component downstream of the parser works with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamically typed scalar held by a [`Record`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// ISO-8601 timestamp text, carried as-is
    Timestamp(String),
}

impl Value {
    /// True for `Null` only
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for values that count as missing: `Null`, NaN floats, and empty
    /// or whitespace-only text
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            Value::Text(s) | Value::Timestamp(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Short name of the variant, used in warnings
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Canonical text form, `None` for `Null`
    ///
    /// This is the representation values are bound with when sent to the
    /// store; the store casts it to the column type.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Timestamp(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) | Value::Timestamp(s) => write!(f, "{}", s),
        }
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

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
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

impl From<chrono::NaiveDateTime> for Value {
    fn from(dt: chrono::NaiveDateTime) -> Self {
        Value::Timestamp(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            // Nested structures are carried as their JSON text
            nested => Value::Text(nested.to_string()),
        }
    }
}

/// Ordered mapping from column name to [`Value`]
///
/// Column order follows insertion order. Inserting an existing column name
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set a column value, replacing any previous value for that column
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Builder-style variant of [`Record::insert`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == column)
    }

    /// Column names in record order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values in record order
    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, value)| value).collect()
    }

    /// Build a record from a JSON object, keeping the object's key order
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        object
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values() {
        assert!(Value::Null.is_missing());
        assert!(Value::Float(f64::NAN).is_missing());
        assert!(Value::from("   ").is_missing());
        assert!(!Value::from("0").is_missing());
        assert!(!Value::Int(0).is_missing());
    }

    #[test]
    fn test_record_insert_replaces_in_place() {
        let mut record = Record::new().with("a", 1).with("b", "x");
        record.insert("a", 2);
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_from_json_object() {
        let json = serde_json::json!({
            "email": "a@x.com",
            "age": 30,
            "score": 1.5,
            "active": true,
            "tags": ["x", "y"],
            "missing": null
        });
        let record = Record::from_json_object(json.as_object().unwrap());
        assert_eq!(record.get("email"), Some(&Value::from("a@x.com")));
        assert_eq!(record.get("age"), Some(&Value::Int(30)));
        assert_eq!(record.get("score"), Some(&Value::Float(1.5)));
        assert_eq!(record.get("active"), Some(&Value::Bool(true)));
        assert_eq!(record.get("tags"), Some(&Value::from("[\"x\",\"y\"]")));
        assert_eq!(record.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn test_naive_datetime_conversion() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(
            Value::from(dt),
            Value::Timestamp("2024-03-01T12:30:00".to_string())
        );
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(Value::Null.to_sql_text(), None);
        assert_eq!(Value::Bool(true).to_sql_text(), Some("true".to_string()));
        assert_eq!(Value::Float(30.5).to_sql_text(), Some("30.5".to_string()));
    }
}
