//! Schema descriptors and the reserved naming scheme.
//!
//! A migration source either lives in the main database (`Schema::Main`) or
//! in a separate file attached under a synthetic schema name derived from the
//! file path. Synthetic names, unioned views and internal tables all carry
//! reserved prefixes so that user objects never collide with them.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Prefix of synthetic schema names for attached source databases.
pub const SCHEMA_PREFIX: &str = "tmg_source_";

/// Prefix of unioned views created in the temp schema.
pub const UNIONED_VIEW_PREFIX: &str = "tmg_unioned_";

/// Prefix reserved for the crate's own objects; tables matching it are
/// excluded from table listings.
pub const BUILTIN_PREFIX: &str = "tmg_";

/// Number of hex digits of the path hash kept in a synthetic schema name.
const SCHEMA_HASH_LENGTH: usize = 16;

/// A database schema as seen by a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Schema {
    /// The main database.
    Main,
    /// The connection-local temp schema.
    Temp,
    /// An attached source database under its synthetic name.
    Attached(String),
}

impl Schema {
    /// Derive the synthetic schema for a source database file.
    ///
    /// The name is stable for a given path: `<prefix><sha256-prefix>`.
    pub fn for_source_path(path: &Path) -> Schema {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Schema::Attached(format!("{}{}", SCHEMA_PREFIX, &digest[..SCHEMA_HASH_LENGTH]))
    }

    /// Whether this is the main schema.
    pub fn is_main(&self) -> bool {
        matches!(self, Schema::Main)
    }

    /// The schema name as it appears in SQL.
    pub fn name(&self) -> &str {
        match self {
            Schema::Main => "main",
            Schema::Temp => "temp",
            Schema::Attached(name) => name,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
