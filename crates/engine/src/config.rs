//! Workspace configuration via `doctx.toml`
//!
//! On first open a default `doctx.toml` is written next to the data. To change
//! settings, edit the file and restart.

use doctx_core::{DocError, Result};
use doctx_storage::Durability;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name placed in the workspace directory.
pub const CONFIG_FILE_NAME: &str = "doctx.toml";

/// Transaction log file name inside `data_dir`.
pub const TX_LOG_FILE_NAME: &str = "tx.log";

/// Where the transaction log lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxLogKind {
    /// Memory only; lost on close
    #[default]
    Memory,
    /// Checksummed JSON lines under `data_dir`
    File,
}

/// Engine configuration loaded from `doctx.toml`.
///
/// # Example
///
/// ```toml
/// tx_log = "file"
/// durability = "strict"
/// data_dir = "data"
/// max_derived_depth = 10
/// fulltext = true
/// log_filter = "info,doctx::tx=debug"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transaction log backend
    #[serde(default)]
    pub tx_log: TxLogKind,
    /// fsync policy of the file log
    #[serde(default)]
    pub durability: Durability,
    /// Directory for persistent files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// How many rounds of trigger output are re-submitted
    #[serde(default = "default_max_derived_depth")]
    pub max_derived_depth: usize,
    /// Maintain the full-text index
    #[serde(default = "default_fulltext")]
    pub fulltext: bool,
    /// `tracing` filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_derived_depth() -> usize {
    10
}

fn default_fulltext() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tx_log: TxLogKind::default(),
            durability: Durability::default(),
            data_dir: default_data_dir(),
            max_derived_depth: default_max_derived_depth(),
            fulltext: default_fulltext(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// In-memory configuration for tests and embedding
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed configuration rooted at `data_dir`
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tx_log: TxLogKind::File,
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Location of the transaction log file
    pub fn tx_log_path(&self) -> PathBuf {
        self.data_dir.join(TX_LOG_FILE_NAME)
    }

    /// Check values that serde alone cannot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero derived depth or a malformed filter.
    pub fn validate(&self) -> Result<()> {
        if self.max_derived_depth == 0 {
            return Err(DocError::invalid_input(
                "max_derived_depth must be at least 1 in doctx.toml",
            ));
        }
        tracing_subscriber::EnvFilter::try_new(&self.log_filter).map_err(|e| {
            DocError::invalid_input(format!("invalid log_filter '{}': {}", self.log_filter, e))
        })?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# doctx workspace configuration
#
# Transaction log: "memory" (default) or "file"
tx_log = "memory"

# fsync policy for the file log: "buffered" (default) or "strict"
#   "buffered" = flush every append, fsync on close
#   "strict"   = fsync every append
durability = "buffered"

# Directory for the transaction log
data_dir = "data"

# Rounds of trigger output re-submitted before further output is dropped
max_derived_depth = 10

# Maintain the full-text index
fulltext = true

# tracing filter, overridden by RUST_LOG
log_filter = "info"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            DocError::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                DocError::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DocError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            DocError::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_default() {
        let config: EngineConfig = toml::from_str(EngineConfig::default_toml()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_write_default_if_missing_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "tx_log = \"file\"\n").unwrap();
        EngineConfig::write_default_if_missing(&path).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.tx_log, TxLogKind::File);
        assert_eq!(config.max_derived_depth, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "durability = \"sometimes\"\n").unwrap();
        assert!(matches!(EngineConfig::from_file(&path), Err(DocError::InvalidInput(_))));

        std::fs::write(&path, "max_derived_depth = 0\n").unwrap();
        assert!(matches!(EngineConfig::from_file(&path), Err(DocError::InvalidInput(_))));
    }

    #[test]
    fn test_write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = EngineConfig::persistent(dir.path().join("data"));
        config.write_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
        assert!(config.tx_log_path().ends_with("tx.log"));
    }
}
