//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::migration::pacing::PacingConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tables to migrate.
    pub migrations: Vec<TableMigrationConfig>,

    /// Pacing behavior of the background migrate handle.
    #[serde(default)]
    pub pacing: PacingSettings,
}

/// One (source, destination) table pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct TableMigrationConfig {
    /// Destination table in the main database.
    pub table: String,

    /// Source table the rows are drained from.
    pub source_table: String,

    /// Path of the database file the source lives in. Omitted when the
    /// source resides in the main database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_database: Option<PathBuf>,

    /// Cipher key of the source database file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
}

impl fmt::Debug for TableMigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableMigrationConfig")
            .field("table", &self.table)
            .field("source_table", &self.source_table)
            .field("source_database", &self.source_database)
            .field("cipher", &self.cipher.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Pacing knobs in file form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSettings {
    /// Upper bound on one migration transaction, in milliseconds.
    #[serde(default = "default_max_expecting_ms")]
    pub max_expecting_ms: u64,

    /// Budget used before any sample exists, in milliseconds.
    #[serde(default = "default_initialize_ms")]
    pub initialize_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            max_expecting_ms: default_max_expecting_ms(),
            initialize_ms: default_initialize_ms(),
        }
    }
}

impl From<&PacingSettings> for PacingConfig {
    fn from(settings: &PacingSettings) -> Self {
        Self {
            max_expecting_duration: Duration::from_millis(settings.max_expecting_ms),
            initialize_duration: Duration::from_millis(settings.initialize_ms),
        }
    }
}

fn default_max_expecting_ms() -> u64 {
    10
}

fn default_initialize_ms() -> u64 {
    5
}
