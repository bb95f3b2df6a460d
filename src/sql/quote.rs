//! Identifier and literal quoting
//!
//! Names coming from desired state are validated against a whitelist before
//! they are bracket-quoted into T-SQL. Nothing that fails validation ever
//! reaches a statement.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Longest identifier SQL Server accepts (`sysname`)
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}_][\p{L}\p{Nd}_@# ]*$").expect("identifier pattern is valid")
});

// GRANT/DENY/REVOKE permission names are keyword sequences: "SELECT", "VIEW DEFINITION"
static PERMISSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+( [A-Za-z]+)*$").expect("permission pattern is valid"));

/// Check a principal, role, schema, database or language name.
pub fn validate_identifier(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 {
        return Err(Error::invalid("identifier must not be empty"));
    }
    if len > MAX_IDENTIFIER_LEN {
        return Err(Error::invalid(format!(
            "identifier '{}' exceeds {} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(Error::invalid(format!(
            "identifier '{}' contains forbidden characters",
            name
        )));
    }
    Ok(())
}

/// Validate and wrap a name in brackets, doubling any `]`.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(bracket(name))
}

fn bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Inline a string literal as `N'...'`, doubling embedded quotes.
///
/// Only for DDL positions where the protocol forbids a bound parameter
/// (`WITH PASSWORD = ...`). Everywhere else values are bound.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// Validate a permission name and return it upper-cased with single spaces.
pub fn permission_keyword(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_IDENTIFIER_LEN || !PERMISSION_NAME.is_match(trimmed) {
        return Err(Error::invalid(format!("'{}' is not a valid permission name", name)));
    }
    Ok(trimmed.to_uppercase())
}
