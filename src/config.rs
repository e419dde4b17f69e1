//! # Configuration Management
//!
//! Configuration for the package repository server: server settings, storage
//! location, upstream-cache behavior, upload limits and seeded repository
//! definitions. The structure supports JSON serialization and is loaded from
//! a file or built from defaults.
//!
//! ## Loading Configuration
//!
//! ```rust,no_run
//! # use pkg_depot::config::Config;
//! // Load from file with fallback to defaults
//! let config = Config::load_or_default("config.json");
//!
//! // Load from file (fails if the file doesn't exist)
//! let config = Config::load("config.json")?;
//!
//! // Use built-in defaults
//! let config = Config::default();
//! # Ok::<(), pkg_depot::AppError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::AppResult;
use crate::registry::RepoConfig;

/// Main configuration structure for the package repository server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration (host, port, scheme)
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration (data directory)
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upstream-cache behavior for remote repositories
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Upload and request limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Repositories to create at startup (idempotent; existing names are
    /// left untouched)
    #[serde(default)]
    pub repositories: Vec<RepositoryDef>,
}

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default host/IP address to bind to (e.g., "0.0.0.0" or "localhost")
    pub default_host: String,
    /// Default port number to listen on
    pub default_port: u16,
    /// URL scheme ("http" or "https") used when generating file URLs
    pub scheme: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_host: "0.0.0.0".to_string(),
            default_port: 3080,
            scheme: "http".to_string(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for repository catalogs, indexes and package bytes
    pub default_data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_data_dir: PathBuf::from("./data"),
        }
    }
}

/// Upstream-cache behavior for remote repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// HTTP timeout for upstream calls, in seconds
    pub timeout_secs: u64,
    /// Freshness window for cached project listings, in seconds
    pub cache_ttl_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            cache_ttl_secs: 300,
        }
    }
}

/// Upload and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum upload size in megabytes
    pub max_upload_size_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: 100,
        }
    }
}

/// One repository to seed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDef {
    pub name: String,
    /// Package format (defaults to "pypi")
    #[serde(default = "default_package_type")]
    pub package_type: String,
    #[serde(flatten)]
    pub config: RepoConfig,
}

fn default_package_type() -> String {
    "pypi".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            upstream: UpstreamSettings::default(),
            limits: LimitsConfig::default(),
            repositories: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from a JSON file, falling back to defaults when
    /// the file is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e,
                      "Failed to load config file, using defaults");
                Self::default()
            }
        }
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_size(&self) -> u64 {
        self.limits.max_upload_size_mb * 1024 * 1024
    }

    /// Upstream HTTP timeout as a `Duration`.
    pub fn upstream_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Remote cache freshness window as a `Duration`.
    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upstream.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.default_port, 3080);
        assert_eq!(config.server.scheme, "http");
        assert_eq!(config.max_upload_size(), 100 * 1024 * 1024);
        assert_eq!(config.cache_ttl().as_secs(), 300);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_load_with_seeded_repositories() {
        let raw = r#"{
            "server": {"default_host": "localhost", "default_port": 8080, "scheme": "http"},
            "repositories": [
                {"name": "pypi-local", "type": "local"},
                {"name": "pypi-remote", "type": "remote", "url": "https://pypi.org/simple"},
                {"name": "all", "type": "virtual", "members": ["pypi-local", "pypi-remote"]}
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();

        assert_eq!(config.server.default_port, 8080);
        assert_eq!(config.repositories.len(), 3);
        assert_eq!(config.repositories[0].package_type, "pypi");
        assert_eq!(config.repositories[0].config, RepoConfig::Local);
        assert_eq!(
            config.repositories[1].config,
            RepoConfig::Remote {
                url: "https://pypi.org/simple".to_string()
            }
        );
        // Unset sections fall back to defaults.
        assert_eq!(config.upstream.cache_ttl_secs, 300);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default("/nonexistent/config.json");
        assert_eq!(config.server.default_port, 3080);
    }
}
