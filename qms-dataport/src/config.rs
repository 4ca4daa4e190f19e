//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `QMS_`, nested keys split on `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/qms-dataport/{service_name}/config.toml
//! 4. System directory: /etc/qms-dataport/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::query::CountMode;

const APP_PREFIX: &str = "qms-dataport";
const ENV_PREFIX: &str = "QMS_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Database configuration (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Query and pagination defaults
    #[serde(default)]
    pub query: QueryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level or `EnvFilter` directive (e.g. `info,qms_dataport=debug`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL for standard-privilege ports
    pub url: String,

    /// Connection URL for elevated (service role) ports
    #[serde(default)]
    pub admin_url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing a connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Defaults applied when repositories paginate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Page size used when the caller gives none
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Largest page size a caller may request
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,

    /// Count strategy used when options do not choose one
    #[serde(default)]
    pub default_count_mode: CountMode,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            default_count_mode: CountMode::Exact,
        }
    }
}

impl QueryConfig {
    /// Resolve an optional page and page size
    ///
    /// Missing values fall back to page 1 and the default size. Sizes above
    /// the maximum are capped. Page 0 and size 0 pass through unchanged so
    /// validation rejects them.
    pub fn page_request(&self, page: Option<u64>, page_size: Option<u64>) -> (u64, u64) {
        let size = page_size
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        (page.unwrap_or(1), size)
    }

    fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(Error::InvalidConfig(
                "query page sizes must be at least 1".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(Error::InvalidConfig(format!(
                "query.default_page_size ({}) exceeds query.max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_page_size() -> u64 {
    20
}

fn default_max_page_size() -> u64 {
    100
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| APP_PREFIX.to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut defaults = Config::default();
        defaults.service.name = service_name.to_string();
        let mut figment = Figment::new().merge(Serialized::defaults(defaults));

        // Lowest priority first so later files override earlier ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading configuration");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "no configuration file");
            }
        }

        Self::finish(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from a specific file, bypassing the search path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.query.validate()?;
        Ok(config)
    }

    /// Config file locations, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_PREFIX);
        if let Some(path) = xdg_dirs.find_config_file(Path::new(service_name).join("config.toml")) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(APP_PREFIX)
                .join(service_name)
                .join("config.toml"),
        );
        paths
    }

    /// Get database URL
    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: APP_PREFIX.to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            database: None,
            query: QueryConfig::default(),
        }
    }
}
