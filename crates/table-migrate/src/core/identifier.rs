//! Identifier validation and quoting.
//!
//! Identifiers cannot travel as bound parameters, so every schema, table and
//! column name is validated and quoted before it is spliced into a rendered
//! statement. All statement rendering in this crate funnels through these
//! helpers.

use crate::error::{MigrateError, Result};

/// Upper bound on any name quoted into a statement, user-given or derived.
///
/// The embedded engine imposes no fixed identifier limit of its own; the
/// cap keeps rendered statements and log lines bounded. Names here do not
/// always stay as given: a destination table reappears in the temp schema
/// with the unioned-view prefix in front of it, and a table so long that
/// its view name would overrun the cap is rejected when that view statement
/// is rendered.
const MAX_IDENTIFIER_LENGTH: usize = 256;

/// Check that a name is usable as an identifier in a rendered statement.
///
/// Empty names, names containing a NUL byte (the engine's C layer would
/// treat it as a terminator and silently truncate the name) and names over
/// the length cap are rejected.
///
/// # Errors
///
/// Returns `MigrateError::Config` describing why the name was rejected.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config("identifier is empty".to_string()));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "identifier {:?} contains a NUL byte",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "identifier is {} bytes, over the {}-byte limit: {:?}",
            name.len(),
            MAX_IDENTIFIER_LENGTH,
            name
        )));
    }

    Ok(())
}

/// Quote an identifier for the embedded engine.
///
/// The engine's quoting form is double quotes with embedded quotes doubled.
/// The name is validated first.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('"');
    for c in name.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Ok(quoted)
}

/// Qualify a table name with its schema, both quoted.
pub fn qualify(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// Escape a string literal for inline use (e.g. an ATTACH path).
///
/// Doubles embedded single quotes and wraps the value in single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
