//! Input validation and quoting for SQL identifiers.
//!
//! Table and column names reach the store inside DDL and DML statements.
//! Every identifier is validated here and always emitted quoted.
//!
//! # Security
//!
//! Input validation prevents:
//! - SQL injection via malicious table/column names
//! - Identifiers the store would silently truncate
//! - Control characters in generated statements

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ROW_ID_COLUMN;

/// Maximum identifier length in bytes (PostgreSQL's NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Prefix reserved for the engine's tracking tables
pub const TRACKING_TABLE_PREFIX: &str = "consolidation_";

/// Errors that can occur during input validation.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),

    /// Input is reserved by the engine
    #[error("{field} cannot use the reserved name: {word}")]
    ReservedWord { field: &'static str, word: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a target table name.
///
/// # Rules
///
/// - Must not be empty
/// - Must not exceed 63 bytes
/// - Must start with a letter or underscore
/// - May contain ASCII letters, digits and underscores
/// - Cannot use the tracking-table prefix `consolidation_`
///
/// # Examples
///
/// ```
/// use data_consolidation_sdk::validation::input::validate_table_name;
///
/// assert!(validate_table_name("contacts").is_ok());
/// assert!(validate_table_name("sales_2024").is_ok());
/// assert!(validate_table_name("").is_err());
/// assert!(validate_table_name("2024_sales").is_err());
/// assert!(validate_table_name("sales-2024").is_err());
/// ```
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    check_length("table name", name)?;

    let Some(first_char) = name.chars().next() else {
        return Err(ValidationError::Empty("table name"));
    };
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ValidationError::InvalidFormat(
            "table name",
            "must start with a letter or underscore".to_string(),
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(ValidationError::InvalidCharacters {
                field: "table name",
                reason: format!("invalid character: '{}'", c),
            });
        }
    }

    if name.to_lowercase().starts_with(TRACKING_TABLE_PREFIX) {
        return Err(ValidationError::ReservedWord {
            field: "table name",
            word: name.to_string(),
        });
    }

    Ok(())
}

/// Validate a column name.
///
/// Column names come from spreadsheet headers, so spaces and punctuation are
/// allowed; the name is always quoted in SQL.
///
/// # Rules
///
/// - Must not be empty or whitespace only
/// - Must not exceed 63 bytes
/// - Must not contain control characters
/// - Cannot be the primary key column `_row_id`
///
/// # Examples
///
/// ```
/// use data_consolidation_sdk::validation::input::validate_column_name;
///
/// assert!(validate_column_name("email").is_ok());
/// assert!(validate_column_name("First Name").is_ok());
/// assert!(validate_column_name("").is_err());
/// assert!(validate_column_name("_row_id").is_err());
/// ```
pub fn validate_column_name(name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty("column name"));
    }
    check_length("column name", name)?;

    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters {
            field: "column name",
            reason: format!("control character U+{:04X}", c as u32),
        });
    }

    if name == ROW_ID_COLUMN {
        return Err(ValidationError::ReservedWord {
            field: "column name",
            word: name.to_string(),
        });
    }

    Ok(())
}

fn check_length(field: &'static str, name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }
    Ok(())
}

/// Quote a SQL identifier.
///
/// Internal double quotes are escaped by doubling them, so the result is safe
/// in any statement for both DuckDB and PostgreSQL.
///
/// # Examples
///
/// ```
/// use data_consolidation_sdk::validation::input::quote_identifier;
///
/// assert_eq!(quote_identifier("users"), "\"users\"");
/// assert_eq!(quote_identifier("say \"hi\""), "\"say \"\"hi\"\"\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
