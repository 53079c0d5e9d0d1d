// ⚙️ Editor Configuration - TOML-backed settings
// Jurisdiction prefix, default currency and where snapshots live

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_JURISDICTION_PREFIX: &str = "TT";
pub const DEFAULT_CURRENCY: &str = "TTD";
pub const DEFAULT_STORAGE_KEY: &str = "ace-declarations-storage";

/// Settings for the declaration core
///
/// Every field has a default, so a partial (or empty) file still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Two-letter prefix of generated reference numbers
    pub jurisdiction_prefix: String,

    /// Currency assumed when a declaration leaves it blank
    pub default_currency: String,

    /// Key the declaration collection is snapshotted under
    pub storage_key: String,

    /// SQLite database file; None keeps everything in memory
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            jurisdiction_prefix: DEFAULT_JURISDICTION_PREFIX.to_string(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            database_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config TOML")?;
        tracing::debug!("Loaded config from {}", path.as_ref().display());

        Ok(config)
    }

    /// Write configuration as pretty TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.jurisdiction_prefix, "TT");
        assert_eq!(config.default_currency, "TTD");
        assert_eq!(config.storage_key, "ace-declarations-storage");
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarations.toml");
        fs::write(&path, "default_currency = \"USD\"\n").unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.jurisdiction_prefix, "TT");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarations.toml");

        let config = Config {
            jurisdiction_prefix: "BB".to_string(),
            database_path: Some(dir.path().join("declarations.db")),
            ..Config::default()
        };
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("nope.toml"));

        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarations.toml");
        fs::write(&path, "default_currency = [").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
