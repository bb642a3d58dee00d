//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::ffi::OsStr;
use std::path::Path;

use bytes::Bytes;

use crate::error::{MigrateError, Result};
use crate::migration::info::MigrationUserInfo;

/// On-disk formats a configuration file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension. Only `.json` selects JSON;
    /// everything else, `.yaml` and `.yml` included, is read as YAML.
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl Config {
    /// Read a configuration file, picking the format from its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match ConfigFormat::for_path(path) {
            ConfigFormat::Json => Self::from_json(&content),
            ConfigFormat::Yaml => Self::from_yaml(&content),
        }
    }

    /// Parse and validate a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| MigrateError::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// The user infos this configuration describes, one per table pair.
    pub fn user_infos(&self) -> Vec<MigrationUserInfo> {
        self.migrations
            .iter()
            .map(|migration| {
                let mut info = MigrationUserInfo::new(
                    migration.table.as_str(),
                    migration.source_table.as_str(),
                );
                if let Some(path) = &migration.source_database {
                    info = info.with_source_database(path.clone());
                }
                if let Some(cipher) = &migration.cipher {
                    info = info.with_source_cipher(Bytes::from(cipher.clone().into_bytes()));
                }
                info
            })
            .collect()
    }
}
