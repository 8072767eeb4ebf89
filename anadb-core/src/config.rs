//! Database configuration stored at `<db>/config.json`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.json";

/// Per-database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Recompute content hashes of every snapshot when the database is opened
    #[serde(default = "default_verify_on_open")]
    pub verify_on_open: bool,
    /// Number of file-content objects kept in memory by disk storage
    #[serde(default = "default_object_cache_size")]
    pub object_cache_size: usize,
    /// User recorded by tools that do not supply one
    #[serde(default)]
    pub default_user: Option<String>,
}

fn default_verify_on_open() -> bool {
    true
}

fn default_object_cache_size() -> usize {
    64
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            verify_on_open: default_verify_on_open(),
            object_cache_size: default_object_cache_size(),
            default_user: None,
        }
    }
}

impl DatabaseConfig {
    /// Load config from a database directory, falling back to defaults
    pub fn load(db_path: &Path) -> Result<Self> {
        let config_path = db_path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)?;
        serde_json::from_str(&data).map_err(|e| {
            Error::Serialization(format!("Failed to parse {:?}: {}", config_path, e))
        })
    }

    /// Save config to a database directory
    pub fn save(&self, db_path: &Path) -> Result<()> {
        let config_path = db_path.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self).map_err(Error::serialization)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }
}
