//! SQL identifier validation and quoting.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$") {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Identifier pattern failed to compile");
            None
        }
    })
    .as_ref()
}

/// Check that `name` is a plain SQL identifier (letters, digits, underscore,
/// not starting with a digit, at most 63 characters).
pub fn is_valid_identifier(name: &str) -> bool {
    match identifier_regex() {
        Some(re) => re.is_match(name),
        None => false,
    }
}

/// Validate a model, table, column or child name.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::argument(format!("invalid {} name '{}'", kind, name)))
    }
}

/// Quote an identifier with double quotes (Postgres, SQLite).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an identifier with backticks (MySQL).
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
