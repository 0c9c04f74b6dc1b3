// ⚙️ Configuration - Thresholds as Data
// Matching thresholds, reorder level and database location, loaded from JSON.

use crate::error::{ReconError, ReconResult};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "PAR_STOCK_CONFIG";

/// Environment variable overriding `database_path`
pub const DATABASE_ENV: &str = "PAR_STOCK_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconConfig {
    /// Catalog → sales matching in a single-period comparison
    pub compare_threshold: f64,

    /// Both directions of matching in a range summary
    pub summary_threshold: f64,

    /// Sale → catalog suggestion when previewing an upload
    pub preview_threshold: f64,

    /// Sale → composite detection when persisting sales
    pub composite_threshold: f64,

    /// Transfer → catalog name resolution
    pub transfer_threshold: f64,

    /// Reorder when remaining < opening stock × this fraction
    pub reorder_fraction: f64,

    pub database_path: PathBuf,
}

impl Default for ReconConfig {
    fn default() -> Self {
        ReconConfig {
            compare_threshold: 0.6,
            summary_threshold: 0.6,
            preview_threshold: 0.3,
            composite_threshold: 0.6,
            transfer_threshold: 0.3,
            reorder_fraction: 0.2,
            database_path: PathBuf::from("par_stock.db"),
        }
    }
}

impl ReconConfig {
    /// Load config from a JSON file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ReconConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults, or the file named by PAR_STOCK_CONFIG; PAR_STOCK_DB wins for the DB path.
    pub fn load() -> Result<Self> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(db_path) = env::var(DATABASE_ENV) {
            config.database_path = PathBuf::from(db_path);
        }

        Ok(config)
    }

    pub fn validate(&self) -> ReconResult<()> {
        let thresholds = [
            ("compareThreshold", self.compare_threshold),
            ("summaryThreshold", self.summary_threshold),
            ("previewThreshold", self.preview_threshold),
            ("compositeThreshold", self.composite_threshold),
            ("transferThreshold", self.transfer_threshold),
        ];

        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReconError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.reorder_fraction < 0.0 {
            return Err(ReconError::Config(format!(
                "reorderFraction must not be negative, got {}",
                self.reorder_fraction
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReconConfig::default();

        assert_eq!(config.compare_threshold, 0.6);
        assert_eq!(config.preview_threshold, 0.3);
        assert_eq!(config.reorder_fraction, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"previewThreshold": 0.5, "databasePath": "/tmp/bar.db"}}"#).unwrap();

        let config = ReconConfig::from_file(file.path()).unwrap();

        assert_eq!(config.preview_threshold, 0.5);
        assert_eq!(config.database_path, PathBuf::from("/tmp/bar.db"));
        // untouched keys keep defaults
        assert_eq!(config.compare_threshold, 0.6);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let config = ReconConfig {
            compare_threshold: 1.5,
            ..ReconConfig::default()
        };

        assert!(matches!(config.validate(), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reorderFraction": -0.1}}"#).unwrap();

        assert!(ReconConfig::from_file(file.path()).is_err());
    }
}
