//! Configuration management for the surge service.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `config/surge-api.{toml,yaml,json}` if present
//! 3. `SURGE__`-prefixed environment variables (`SURGE__SERVER__PORT=9000`)
//! 4. The well-known variables `IFRC_API_URL` and `SURGE_DATABASE_PATH`
//!
//! ```rust,ignore
//! use surge_api::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::DEFAULT_API_URL;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Upstream IFRC API.
    #[serde(default)]
    pub ifrc: IfrcConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate the configuration.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("database.path", "data/surge.sqlite")?
            .set_default("ifrc.api_url", DEFAULT_API_URL)?
            .add_source(config::File::with_name("config/surge-api").required(false))
            .add_source(
                config::Environment::with_prefix("SURGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.apply_env_overrides();
        Ok(app_config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("IFRC_API_URL") {
            if !url.trim().is_empty() {
                self.ifrc.api_url = url;
            }
        }
        if let Ok(path) = std::env::var("SURGE_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    // long enough for a synchronous manual sync run
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file, created with its parent directories if missing.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/surge.sqlite")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// IFRC API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfrcConfig {
    /// First page of the surge alert listing.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for IfrcConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl IfrcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the scheduler alongside the HTTP server.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between re-reads of the schedule table.
    #[serde(default = "default_sync_every")]
    pub sync_every_secs: u64,
    /// Longest sleep between scheduler ticks.
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sync_every() -> u64 {
    60
}

fn default_max_interval() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_every_secs: default_sync_every(),
            max_interval_secs: default_max_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn sync_every(&self) -> Duration {
        Duration::from_secs(self.sync_every_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
