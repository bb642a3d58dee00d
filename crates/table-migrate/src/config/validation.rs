//! Configuration validation.

use crate::config::Config;
use crate::core::identifier::validate_identifier;
use crate::core::schema::BUILTIN_PREFIX;
use crate::error::{MigrateError, Result};

pub(super) fn validate(config: &Config) -> Result<()> {
    if config.migrations.is_empty() {
        return Err(MigrateError::Config(
            "no migrations configured".to_string(),
        ));
    }

    for migration in &config.migrations {
        validate_identifier(&migration.table)?;
        validate_identifier(&migration.source_table)?;

        if migration.table.starts_with(BUILTIN_PREFIX)
            || migration.source_table.starts_with(BUILTIN_PREFIX)
        {
            return Err(MigrateError::Config(format!(
                "table names must not use the reserved prefix {:?}: {} -> {}",
                BUILTIN_PREFIX, migration.source_table, migration.table
            )));
        }

        if migration.source_database.is_none() && migration.table == migration.source_table {
            return Err(MigrateError::Config(format!(
                "table {} cannot migrate from itself within the main database",
                migration.table
            )));
        }

        if migration.cipher.is_some() && migration.source_database.is_none() {
            return Err(MigrateError::Config(format!(
                "table {} has a cipher but no source database file",
                migration.table
            )));
        }
    }

    if config.pacing.max_expecting_ms == 0 {
        return Err(MigrateError::Config(
            "pacing.max_expecting_ms must be positive".to_string(),
        ));
    }
    if config.pacing.initialize_ms == 0 || config.pacing.initialize_ms > config.pacing.max_expecting_ms
    {
        return Err(MigrateError::Config(
            "pacing.initialize_ms must be in (0, max_expecting_ms]".to_string(),
        ));
    }

    Ok(())
}
