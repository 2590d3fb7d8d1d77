//! Operator configuration: `~/.prodflow/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProdError, Result};
use crate::topology::Topology;
use prodflow_protocol::defaults::{
    DEFAULT_DELETE_CHUNK_SIZE, DEFAULT_LOCK_MAX_AGE_SECS, DEFAULT_QUERY_TIMEOUT_SECS,
    DEFAULT_SUBMIT_CHUNK_SIZE,
};
use prodflow_protocol::paths;

/// Settings shared by all commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProdflowConfig {
    /// Path to the SQLite catalog
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Per-query catalog time budget in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Jobs per submission file pair
    #[serde(default = "default_submit_chunk")]
    pub submit_chunk_size: usize,

    /// Status rows per delete statement
    #[serde(default = "default_delete_chunk")]
    pub delete_chunk_size: usize,

    /// Age after which a lock file is considered abandoned
    #[serde(default = "default_lock_max_age")]
    pub lock_max_age_secs: u64,

    /// Where submission files are written
    #[serde(default = "default_submission_dir")]
    pub submission_dir: PathBuf,

    /// Replace the built-in dependency table
    #[serde(default)]
    pub topology_file: Option<PathBuf>,
}

fn default_catalog_path() -> PathBuf {
    paths::default_catalog_path()
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_submit_chunk() -> usize {
    DEFAULT_SUBMIT_CHUNK_SIZE
}

fn default_delete_chunk() -> usize {
    DEFAULT_DELETE_CHUNK_SIZE
}

fn default_lock_max_age() -> u64 {
    DEFAULT_LOCK_MAX_AGE_SECS
}

fn default_submission_dir() -> PathBuf {
    paths::default_submission_dir()
}

impl Default for ProdflowConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            query_timeout_secs: default_query_timeout(),
            submit_chunk_size: default_submit_chunk(),
            delete_chunk_size: default_delete_chunk(),
            lock_max_age_secs: default_lock_max_age(),
            submission_dir: default_submission_dir(),
            topology_file: None,
        }
    }
}

impl ProdflowConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ProdError::io(path, e))?;
        let config: ProdflowConfig = toml::from_str(&content)
            .map_err(|e| ProdError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ProdError::config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProdError::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| ProdError::io(path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.submit_chunk_size == 0 || self.delete_chunk_size == 0 {
            return Err(ProdError::InvalidChunkSize);
        }
        if self.query_timeout_secs == 0 {
            return Err(ProdError::config("query_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn lock_max_age(&self) -> Duration {
        Duration::from_secs(self.lock_max_age_secs)
    }

    /// The configured dependency table, or the built-in one.
    pub fn topology(&self) -> Result<Topology> {
        match &self.topology_file {
            Some(path) => Topology::load(path),
            None => Ok(Topology::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_production_values() {
        let config = ProdflowConfig::default();
        assert_eq!(config.submit_chunk_size, 1000);
        assert_eq!(config.delete_chunk_size, 5000);
        assert_eq!(config.lock_max_age(), Duration::from_secs(1800));
        assert!(config.catalog_path.ends_with("catalog.sqlite3"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: ProdflowConfig = toml::from_str("query_timeout_secs = 5\n").unwrap();
        assert_eq!(config.query_timeout(), Duration::from_secs(5));
        assert_eq!(config.delete_chunk_size, 5000);
    }

    #[test]
    fn save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let config = ProdflowConfig {
            submit_chunk_size: 250,
            topology_file: Some(temp.path().join("topology.yaml")),
            ..ProdflowConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ProdflowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "submit_chunk_size = 0\n").unwrap();
        assert!(matches!(
            ProdflowConfig::load(&path),
            Err(ProdError::InvalidChunkSize)
        ));
    }
}
