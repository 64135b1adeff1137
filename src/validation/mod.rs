//! Validation functionality
//!
//! Identifier validation and quoting for every name that reaches generated SQL.

pub mod input;

pub use input::{
    ValidationError, ValidationResult, quote_identifier, quote_literal, validate_column_name,
    validate_table_name,
};
