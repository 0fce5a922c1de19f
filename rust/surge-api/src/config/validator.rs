//! Startup validation.
//!
//! Every check runs and all problems are reported together, so a broken
//! deployment is fixed in one pass rather than one error at a time.

use url::Url;

use super::AppConfig;
use super::error::{ConfigResult, ConfigurationError};

/// Checks an [`AppConfig`] before anything is started.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_api_url(&config.ifrc.api_url) {
            errors.push(e);
        }

        if config.ifrc.request_timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "ifrc.request_timeout_secs must be greater than zero",
                "Set SURGE__IFRC__REQUEST_TIMEOUT_SECS to a positive number of seconds",
            ));
        }

        if config.database.path.as_os_str().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "database.path",
                "Storing schedules, alerts and run status",
                "SURGE_DATABASE_PATH or SURGE__DATABASE__PATH",
            ));
        }

        for (value, key, env_var) in [
            (
                config.scheduler.sync_every_secs,
                "scheduler.sync_every_secs",
                "SURGE__SCHEDULER__SYNC_EVERY_SECS",
            ),
            (
                config.scheduler.max_interval_secs,
                "scheduler.max_interval_secs",
                "SURGE__SCHEDULER__MAX_INTERVAL_SECS",
            ),
            (
                config.server.timeout_secs,
                "server.timeout_secs",
                "SURGE__SERVER__TIMEOUT_SECS",
            ),
        ] {
            if value == 0 {
                errors.push(ConfigurationError::invalid(
                    format!("{key} must be greater than zero"),
                    format!("Set {env_var} to a positive number of seconds"),
                ));
            }
        }

        ConfigurationError::from_list(errors)
    }

    /// The start URL must be an absolute http(s) URL.
    pub fn validate_api_url(raw: &str) -> ConfigResult<()> {
        let hint = "Set IFRC_API_URL to an absolute URL such as \
                    https://goadmin.ifrc.org/api/v2/surge_alert/";

        if raw.trim().is_empty() {
            return Err(ConfigurationError::missing_required(
                "ifrc.api_url",
                "Fetching surge alerts",
                "IFRC_API_URL",
            ));
        }

        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ConfigurationError::invalid(
                format!("ifrc.api_url uses unsupported scheme '{}'", url.scheme()),
                hint,
            )),
            Err(e) => Err(ConfigurationError::invalid(
                format!("ifrc.api_url '{raw}' is not a valid URL: {e}"),
                hint,
            )),
        }
    }
}
