//! Uniqueness keys and comparable key values
//!
//! Row-level duplicate detection compares incoming key tuples with the values
//! stored in the target table. Both sides are folded into a comparable form
//! per column kind so that `30`, `30.0` and `"30.0"` meet, and so do
//! `2024-01-01 00:00:00` and `2024-01-01T00:00:00`.

use super::enums::ColumnType;
use super::value::Value;
use crate::coercion::date::parse_timestamp;
use crate::coercion::parse_numeric;
use serde::{Deserialize, Serialize};

/// Comparison class of a key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Exact 64-bit integers
    Integer,
    /// Floating-point numbers
    Numeric,
    Boolean,
    Timestamp,
    Text,
}

impl KeyKind {
    pub fn for_column_type(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => KeyKind::Integer,
            ColumnType::Decimal => KeyKind::Numeric,
            ColumnType::Boolean => KeyKind::Boolean,
            ColumnType::Timestamp => KeyKind::Timestamp,
            ColumnType::Text => KeyKind::Text,
        }
    }

    /// SQL type both sides are cast to when the comparison runs in the store
    pub fn comparison_sql_type(&self) -> &'static str {
        match self {
            KeyKind::Integer => "NUMERIC",
            KeyKind::Numeric => "DOUBLE PRECISION",
            KeyKind::Boolean => "BOOLEAN",
            KeyKind::Timestamp => "TIMESTAMP",
            KeyKind::Text => "TEXT",
        }
    }
}

/// One column of a uniqueness key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    pub kind: KeyKind,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Comparable form of a single key value; `None` for missing values
pub fn comparable_value(value: &Value, kind: KeyKind) -> Option<String> {
    if value.is_missing() {
        return None;
    }

    match kind {
        KeyKind::Integer => {
            let exact = match value {
                Value::Int(i) => Some(*i),
                Value::Bool(b) => Some(i64::from(*b)),
                Value::Text(s) | Value::Timestamp(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match exact {
                Some(i) => Some(i.to_string()),
                // integral floats and numeric text such as "30.0" fold to the integer
                None => comparable_value(value, KeyKind::Numeric),
            }
        }
        KeyKind::Numeric => {
            let number = match value {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Text(s) | Value::Timestamp(s) => parse_numeric(s)?,
                Value::Null => return None,
            };
            if !number.is_finite() {
                return None;
            }
            // Fold -0.0 into 0
            let number = if number == 0.0 { 0.0 } else { number };
            Some(number.to_string())
        }
        KeyKind::Boolean => {
            let flag = match value {
                Value::Bool(b) => *b,
                Value::Int(1) => true,
                Value::Int(0) => false,
                Value::Float(f) if *f == 1.0 => true,
                Value::Float(f) if *f == 0.0 => false,
                Value::Text(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" | "y" => true,
                    "false" | "f" | "0" | "no" | "n" => false,
                    other => return Some(other.to_string()),
                },
                other => return Some(other.to_string()),
            };
            Some(flag.to_string())
        }
        KeyKind::Timestamp => {
            let text = value.to_string();
            match parse_timestamp(&text, false) {
                Some(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
                None => Some(text.trim().to_string()),
            }
        }
        KeyKind::Text => Some(value.to_string()),
    }
}

/// Comparable form of a key tuple; `None` when any component is missing,
/// since such a tuple can never equal a stored row
pub fn comparable_tuple(values: &[Value], key: &[KeyColumn]) -> Option<Vec<String>> {
    values
        .iter()
        .zip(key)
        .map(|(value, column)| comparable_value(value, column.kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_forms_meet() {
        let a = comparable_value(&Value::Int(30), KeyKind::Numeric);
        let b = comparable_value(&Value::Float(30.0), KeyKind::Numeric);
        let c = comparable_value(&Value::from("30.0"), KeyKind::Numeric);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_deref(), Some("30"));
    }

    #[test]
    fn test_integer_keys_are_exact() {
        let a = comparable_value(&Value::Int(9_007_199_254_740_992), KeyKind::Integer);
        let b = comparable_value(&Value::Int(9_007_199_254_740_993), KeyKind::Integer);
        assert_ne!(a, b);
        assert_eq!(
            comparable_value(&Value::from("9007199254740993"), KeyKind::Integer),
            b
        );
        assert_eq!(a.as_deref(), Some("9007199254740992"));
    }

    #[test]
    fn test_integer_forms_meet() {
        let a = comparable_value(&Value::Int(30), KeyKind::Integer);
        assert_eq!(comparable_value(&Value::Float(30.0), KeyKind::Integer), a);
        assert_eq!(comparable_value(&Value::from(" 30.0 "), KeyKind::Integer), a);
        assert_ne!(comparable_value(&Value::Float(30.5), KeyKind::Integer), a);
    }

    #[test]
    fn test_timestamp_separator_forms_meet() {
        let a = comparable_value(&Value::from("2024-01-01 00:00:00"), KeyKind::Timestamp);
        let b = comparable_value(
            &Value::Timestamp("2024-01-01T00:00:00".to_string()),
            KeyKind::Timestamp,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_boolean_store_text_forms() {
        assert_eq!(
            comparable_value(&Value::from("t"), KeyKind::Boolean),
            comparable_value(&Value::Bool(true), KeyKind::Boolean)
        );
        assert_eq!(
            comparable_value(&Value::from("false"), KeyKind::Boolean),
            comparable_value(&Value::Int(0), KeyKind::Boolean)
        );
    }

    #[test]
    fn test_missing_components_never_compare() {
        let key = vec![
            KeyColumn::new("email", KeyKind::Text),
            KeyColumn::new("age", KeyKind::Numeric),
        ];
        assert!(comparable_tuple(&[Value::from("a@x.com"), Value::Null], &key).is_none());
        assert!(comparable_tuple(&[Value::from("a@x.com"), Value::Int(3)], &key).is_some());
    }

    #[test]
    fn test_text_is_exact() {
        assert_ne!(
            comparable_value(&Value::from("A@x.com"), KeyKind::Text),
            comparable_value(&Value::from("a@x.com"), KeyKind::Text)
        );
    }
}
