//! Request validation for the SellerDesk API
//!
//! Provides type-safe validation with clear error messages.

use crate::error::AppError;
use std::collections::HashMap;

/// Validation result type
pub type ValidationResult<T> = Result<T, AppError>;

fn field_error(field: &str, message: String) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message]);
    AppError::ValidationError { details }
}

/// String validation helpers
pub mod string {
    use super::*;

    /// Validate required non-empty string
    pub fn required(value: &Option<String>, field: &str) -> ValidationResult<String> {
        match value {
            Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(_) => Err(field_error(field, format!("{} cannot be empty", field))),
            None => Err(field_error(field, format!("{} is required", field))),
        }
    }

    /// Validate optional string with max length
    pub fn max_length(
        value: &Option<String>,
        field: &str,
        max: usize,
    ) -> ValidationResult<Option<String>> {
        match value {
            Some(s) if s.len() > max => Err(field_error(
                field,
                format!("{} must be {} characters or less", field, max),
            )),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Ok(None),
        }
    }
}
