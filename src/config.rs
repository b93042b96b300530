//! Configuration Management
//!
//! Handles persistent configuration storage for cloudmap.

use crate::cache::{PersistentCache, DEFAULT_MEMORY_TTL};
use crate::resource::{DEFAULT_AVAILABILITY_TTL, DEFAULT_POOL_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Units in flight at once
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// TTL of the request-scoped cache
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
    /// TTL of memoized service availability
    #[serde(default = "default_availability_ttl_secs")]
    pub availability_ttl_secs: u64,
    /// Persistent cache location
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Last collected domain
    #[serde(default)]
    pub last_domain: Option<String>,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_memory_ttl_secs() -> u64 {
    DEFAULT_MEMORY_TTL.as_secs()
}

fn default_availability_ttl_secs() -> u64 {
    DEFAULT_AVAILABILITY_TTL.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            memory_ttl_secs: default_memory_ttl_secs(),
            availability_ttl_secs: default_availability_ttl_secs(),
            cache_dir: None,
            last_domain: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudmap").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; a missing or corrupt file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        Ok(())
    }

    /// Get effective pool size (CLI > config > default)
    pub fn effective_pool_size(&self, cli: Option<usize>) -> usize {
        cli.unwrap_or(self.pool_size).max(1)
    }

    /// Get effective cache directory (CLI > config > default)
    pub fn effective_cache_dir(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.cache_dir.clone())
            .unwrap_or_else(PersistentCache::default_dir)
    }

    /// Get effective domain (CLI > snapshot > last used > "default")
    pub fn effective_domain(&self, cli: Option<&str>, snapshot: &str) -> String {
        cli.map(str::to_string)
            .or_else(|| (!snapshot.is_empty()).then(|| snapshot.to_string()))
            .or_else(|| self.last_domain.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_secs(self.availability_ttl_secs)
    }

    /// Set last domain and save
    pub fn set_last_domain(&mut self, domain: &str) -> Result<()> {
        self.last_domain = Some(domain.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"pool_size": 4}"#).unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.memory_ttl_secs, 60);
        assert_eq!(config.availability_ttl_secs, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            last_domain: Some("network".into()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            pool_size: 8,
            last_domain: Some("security".into()),
            ..Config::default()
        };
        assert_eq!(config.effective_pool_size(Some(2)), 2);
        assert_eq!(config.effective_pool_size(None), 8);
        assert_eq!(config.effective_domain(Some("network"), "x"), "network");
        assert_eq!(config.effective_domain(None, "snap"), "snap");
        assert_eq!(config.effective_domain(None, ""), "security");
    }
}
