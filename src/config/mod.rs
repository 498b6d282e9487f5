//! Configuration management.
//!
//! nodedex configuration can come from:
//! - Config file (~/.config/nodedex/config.toml)
//! - Environment variables (NODEDEX_*)
//!
//! Command-line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::DEFAULT_POOL_SIZE;

/// nodedex configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Automation platform REST API
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

/// Catalog source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// External catalog asset; the bundled one is used when unset
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

/// Protocol server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upper bound for a single tool handler
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_seconds: default_handler_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_seconds.max(1))
    }
}

fn default_handler_timeout() -> u64 {
    60
}

/// Automation platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL, e.g. `https://automation.example.com`. Platform tools are
    /// only registered when this is set.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_platform_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: default_platform_timeout(),
        }
    }
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn is_configured(&self) -> bool {
        self.base_url
            .as_deref()
            .map_or(false, |url| !url.trim().is_empty())
    }
}

fn default_platform_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default file, then the environment.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("nodedex"))
            .unwrap_or_else(|| PathBuf::from(".nodedex"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("nodedex"))
            .unwrap_or_else(|| PathBuf::from(".nodedex"))
    }

    /// Configured database path, or `<data_dir>/nodedex.db`.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("nodedex.db"))
    }

    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("NODEDEX_DB") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = var("NODEDEX_DB_POOL_SIZE") {
            if let Ok(parsed) = size.parse::<u32>() {
                self.storage.pool_size = parsed;
            }
        }
        if let Some(path) = var("NODEDEX_CATALOG_PATH") {
            self.catalog.data_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = var("NODEDEX_HANDLER_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.server.handler_timeout_seconds = parsed;
            }
        }
        if let Some(url) = var("NODEDEX_API_URL") {
            self.platform.base_url = Some(url);
        }
        if let Some(key) = var("NODEDEX_API_KEY") {
            self.platform.api_key = Some(key);
        }
        if let Some(timeout) = var("NODEDEX_API_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.platform.timeout_seconds = parsed;
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(catalog) = partial.catalog {
            self.catalog = catalog;
        }
        if let Some(server) = partial.server {
            self.server = server;
        }
        if let Some(platform) = partial.platform {
            self.platform = platform;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    storage: Option<StorageConfig>,
    catalog: Option<CatalogConfig>,
    server: Option<ServerConfig>,
    platform: Option<PlatformConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.server.handler_timeout_seconds, 60);
        assert_eq!(config.platform.timeout_seconds, 30);
        assert!(!config.platform.is_configured());
        assert!(config.catalog.data_path.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_sections() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[platform]
base_url = "https://automation.example.com"
timeout_seconds = 5
"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_partial(Config::load_partial_from_path(&path).unwrap());

        assert!(config.platform.is_configured());
        assert_eq!(config.platform.timeout(), Duration::from_secs(5));
        assert_eq!(config.server.handler_timeout_seconds, 60);
    }

    #[test]
    fn test_invalid_file_is_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        assert!(Config::load_partial_from_path(&path).is_err());
        assert!(Config::load_partial_from_path(&temp_dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NODEDEX_DB", "/tmp/catalog.db"),
            ("NODEDEX_DB_POOL_SIZE", "8"),
            ("NODEDEX_HANDLER_TIMEOUT_SECS", "not-a-number"),
            ("NODEDEX_API_URL", "http://localhost:5678"),
            ("NODEDEX_API_KEY", "secret"),
        ]);

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path(), PathBuf::from("/tmp/catalog.db"));
        assert_eq!(config.storage.pool_size, 8);
        assert_eq!(config.server.handler_timeout_seconds, 60);
        assert_eq!(config.platform.api_key.as_deref(), Some("secret"));
        assert!(config.platform.is_configured());
    }
}
