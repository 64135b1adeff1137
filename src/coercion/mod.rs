//! Type coercion
//!
//! Pure functions converting a raw scalar into a value valid for a declared
//! column type. Coercion never fails: a value that cannot be converted
//! becomes `Null` and the caller receives a [`CoercionWarning`] describing it.

pub mod date;

use crate::models::{ColumnType, Value};
use serde::{Deserialize, Serialize};

pub use date::{DateNormalizer, IsoDateNormalizer};

/// A value that could not be coerced and was replaced with `Null`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("cannot coerce {value_kind} '{value}' to {target}: {reason}")]
pub struct CoercionWarning {
    pub value: String,
    pub value_kind: String,
    pub target: ColumnType,
    pub reason: String,
}

impl CoercionWarning {
    pub(crate) fn new(value: &Value, target: ColumnType, reason: &str) -> Self {
        Self {
            value: value.to_string(),
            value_kind: value.kind_name().to_string(),
            target,
            reason: reason.to_string(),
        }
    }

    /// Warning text prefixed with the column it occurred in
    pub fn for_column(&self, column: &str, row: usize) -> String {
        format!("row {}, column '{}': {}", row, column, self)
    }
}

/// Coerce a value to `target`, returning `Null` when it cannot be converted
///
/// # Examples
///
/// ```
/// use data_consolidation_sdk::coercion::coerce;
/// use data_consolidation_sdk::models::{ColumnType, Value};
///
/// assert_eq!(coerce(&Value::from("507.0"), ColumnType::Integer), Value::Int(507));
/// assert_eq!(coerce(&Value::from("Yes"), ColumnType::Boolean), Value::Bool(true));
/// assert_eq!(coerce(&Value::from("n/a"), ColumnType::Decimal), Value::Null);
/// ```
pub fn coerce(value: &Value, target: ColumnType) -> Value {
    try_coerce(value, target).unwrap_or(Value::Null)
}

/// Coerce a value to `target`
///
/// Missing values (`Null`, NaN, empty or whitespace-only text) become `Null`
/// without a warning. Any other value that cannot be represented in the
/// target type yields a warning; the coerced value is then `Null`.
pub fn try_coerce(value: &Value, target: ColumnType) -> Result<Value, CoercionWarning> {
    if value.is_missing() || is_nan_text(value) {
        return Ok(Value::Null);
    }

    match target {
        ColumnType::Integer => to_integer(value, target),
        ColumnType::Decimal => to_decimal(value, target),
        ColumnType::Text => Ok(Value::Text(value.to_string())),
        ColumnType::Timestamp => match value {
            Value::Text(s) | Value::Timestamp(s) => Ok(Value::Timestamp(s.clone())),
            other => Err(CoercionWarning::new(other, target, "not a date or time")),
        },
        ColumnType::Boolean => to_boolean(value, target),
    }
}

fn to_integer(value: &Value, target: ColumnType) -> Result<Value, CoercionWarning> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => float_to_integer(*f)
            .map(Value::Int)
            .ok_or_else(|| CoercionWarning::new(value, target, "out of integer range")),
        Value::Text(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            match parse_numeric(trimmed) {
                Some(f) => float_to_integer(f)
                    .map(Value::Int)
                    .ok_or_else(|| CoercionWarning::new(value, target, "out of integer range")),
                None => Err(CoercionWarning::new(value, target, "not a number")),
            }
        }
        other => Err(CoercionWarning::new(other, target, "not a number")),
    }
}

fn to_decimal(value: &Value, target: ColumnType) -> Result<Value, CoercionWarning> {
    let number = match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Text(s) => parse_numeric(s)
            .ok_or_else(|| CoercionWarning::new(value, target, "not a number"))?,
        other => return Err(CoercionWarning::new(other, target, "not a number")),
    };
    if number.is_finite() {
        Ok(Value::Float(number))
    } else {
        Err(CoercionWarning::new(value, target, "not a finite number"))
    }
}

fn to_boolean(value: &Value, target: ColumnType) -> Result<Value, CoercionWarning> {
    let flag = match value {
        Value::Bool(b) => Some(*b),
        Value::Int(1) => Some(true),
        Value::Int(0) => Some(false),
        Value::Float(f) if *f == 1.0 => Some(true),
        Value::Float(f) if *f == 0.0 => Some(false),
        Value::Text(s) => parse_bool(s),
        _ => None,
    };
    flag.map(Value::Bool)
        .ok_or_else(|| CoercionWarning::new(value, target, "not a recognised boolean"))
}

/// Truncate toward zero; `None` for non-finite or out-of-range input
fn float_to_integer(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    let truncated = f.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Some(truncated as i64)
    } else {
        None
    }
}

fn is_nan_text(value: &Value) -> bool {
    matches!(value, Value::Text(s) if s.trim().eq_ignore_ascii_case("nan"))
}

/// Parse numeric-looking text (`"42"`, `" -3.5 "`, `"1e3"`)
///
/// Returns the parsed value even when it is not finite (`"inf"`); callers
/// decide how to treat that.
pub fn parse_numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Parse boolean text from the accepted vocabulary
///
/// `true`, `1`, `yes`, `y` and `false`, `0`, `no`, `n`; trimmed and
/// case-insensitive.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [ColumnType; 5] = [
        ColumnType::Integer,
        ColumnType::Decimal,
        ColumnType::Text,
        ColumnType::Timestamp,
        ColumnType::Boolean,
    ];

    #[test]
    fn test_missing_values_become_null_without_warning() {
        for ty in ALL_TYPES {
            assert_eq!(try_coerce(&Value::Null, ty), Ok(Value::Null));
            assert_eq!(try_coerce(&Value::Float(f64::NAN), ty), Ok(Value::Null));
            assert_eq!(try_coerce(&Value::from(""), ty), Ok(Value::Null));
            assert_eq!(try_coerce(&Value::from("  "), ty), Ok(Value::Null));
            assert_eq!(try_coerce(&Value::from("NaN"), ty), Ok(Value::Null));
        }
    }

    #[test]
    fn test_integer_truncates() {
        assert_eq!(coerce(&Value::from("507.0"), ColumnType::Integer), Value::Int(507));
        assert_eq!(coerce(&Value::Float(-2.9), ColumnType::Integer), Value::Int(-2));
        assert_eq!(coerce(&Value::from(" 42 "), ColumnType::Integer), Value::Int(42));
        assert_eq!(coerce(&Value::Bool(true), ColumnType::Integer), Value::Int(1));
    }

    #[test]
    fn test_integer_failures_warn() {
        assert!(try_coerce(&Value::from("abc"), ColumnType::Integer).is_err());
        assert!(try_coerce(&Value::Float(f64::INFINITY), ColumnType::Integer).is_err());
        assert!(try_coerce(&Value::Float(1e30), ColumnType::Integer).is_err());
        assert!(
            try_coerce(
                &Value::Timestamp("2024-01-01".to_string()),
                ColumnType::Integer
            )
            .is_err()
        );
    }

    #[test]
    fn test_decimal() {
        assert_eq!(coerce(&Value::Int(3), ColumnType::Decimal), Value::Float(3.0));
        assert_eq!(coerce(&Value::from("1e3"), ColumnType::Decimal), Value::Float(1000.0));
        let warning = try_coerce(&Value::from("inf"), ColumnType::Decimal).unwrap_err();
        assert_eq!(warning.target, ColumnType::Decimal);
    }

    #[test]
    fn test_text_uses_canonical_display() {
        assert_eq!(coerce(&Value::Int(7), ColumnType::Text), Value::from("7"));
        assert_eq!(coerce(&Value::Float(30.0), ColumnType::Text), Value::from("30"));
        assert_eq!(coerce(&Value::Bool(false), ColumnType::Text), Value::from("false"));
    }

    #[test]
    fn test_timestamp_passes_text_through() {
        assert_eq!(
            coerce(&Value::from("not a date"), ColumnType::Timestamp),
            Value::Timestamp("not a date".to_string())
        );
        assert!(try_coerce(&Value::Int(20240101), ColumnType::Timestamp).is_err());
    }

    #[test]
    fn test_boolean_vocabulary() {
        for raw in ["true", "TRUE", " 1 ", "yes", "Y"] {
            assert_eq!(coerce(&Value::from(raw), ColumnType::Boolean), Value::Bool(true));
        }
        for raw in ["false", "0", "No", "n"] {
            assert_eq!(coerce(&Value::from(raw), ColumnType::Boolean), Value::Bool(false));
        }
        assert_eq!(coerce(&Value::Int(1), ColumnType::Boolean), Value::Bool(true));
        assert!(try_coerce(&Value::from("maybe"), ColumnType::Boolean).is_err());
        assert!(try_coerce(&Value::Int(2), ColumnType::Boolean).is_err());
    }

    #[test]
    fn test_warning_message_names_column() {
        let warning = try_coerce(&Value::from("abc"), ColumnType::Integer).unwrap_err();
        let message = warning.for_column("age", 3);
        assert!(message.contains("age"));
        assert!(message.contains("abc"));
        assert!(message.contains("INTEGER"));
    }
}
