//! Input validation primitives.
//!
//! Names typed by operators end up as directory names, config file stems and
//! lock files, so they are checked before any path is built from them.

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// Require a name usable as a directory, config file stem and lock name:
/// starts with a letter or digit, then letters, digits, `-`, `_` or `.`.
pub fn require_identifier<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = require_non_empty(value, field, "Value cannot be empty")?;
    let mut chars = value.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if first_ok && rest_ok && value.len() <= 64 {
        Ok(value)
    } else {
        Err(Error::validation_invalid_argument(
            field,
            format!(
                "'{}' must start with a letter or digit and contain only letters, digits, '-', '_' or '.'",
                value
            ),
            Some(value.to_string()),
            None,
        ))
    }
}
