//! SDK configuration
//!
//! Configuration is read from `SUPERFACE_*` environment variables layered
//! over defaults with figment. Every field has a sensible default so a bare
//! environment works out of the box.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Environment variable prefix for every SDK setting.
const ENV_PREFIX: &str = "SUPERFACE_";

/// Expected shape of an SDK token (`sfs_<base>_<8 uppercase hex chars>`).
const TOKEN_PATTERN: &str = "^sfs_[^_]+_[0-9A-F]{8}$";

/// SDK configuration resolved from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Path to `super.json`; `None` means detect `<cwd>/superface/super.json`
    pub path: Option<PathBuf>,
    /// Base URL of the Superface services (registry and event uplink)
    pub api_url: String,
    /// SDK token sent as `SUPERFACE-SDK-TOKEN <token>`; invalid values are dropped
    pub sdk_token: Option<String>,
    /// Disable the metric reporter entirely
    pub disable_metric_reporting: bool,
    /// Sandbox evaluation timeout in milliseconds
    pub sandbox_timeout: u64,
    /// Bound-provider cache TTL in seconds
    pub cache_timeout: u64,
    /// Minimum metric debounce window in milliseconds
    pub metric_debounce_time_min: u64,
    /// Maximum metric debounce window in milliseconds
    pub metric_debounce_time_max: u64,
    /// Directory for the parsed-AST file cache
    pub cache_path: PathBuf,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            path: None,
            api_url: "https://superface.ai".to_string(),
            sdk_token: None,
            disable_metric_reporting: false,
            sandbox_timeout: 100,
            cache_timeout: 3600,
            metric_debounce_time_min: 1000,
            metric_debounce_time_max: 60_000,
            cache_path: PathBuf::from("superface/.cache"),
        }
    }
}

impl SdkConfig {
    /// Resolve configuration from `SUPERFACE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but cannot be parsed
    /// into its field type (for example a non-numeric timeout).
    pub fn from_env() -> Result<Self> {
        let mut config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| Error::unexpected(format!("Invalid SDK configuration: {e}")))?;

        config.drop_invalid_token();
        config.clamp_debounce();
        Ok(config)
    }

    /// Sandbox evaluation timeout as a [`Duration`].
    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout)
    }

    /// Bound-provider cache TTL as a [`Duration`].
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout)
    }

    /// Minimum metric debounce window as a [`Duration`].
    pub fn metric_debounce_min(&self) -> Duration {
        Duration::from_millis(self.metric_debounce_time_min)
    }

    /// Maximum metric debounce window as a [`Duration`].
    pub fn metric_debounce_max(&self) -> Duration {
        Duration::from_millis(self.metric_debounce_time_max)
    }

    /// Drop a configured token that does not match [`TOKEN_PATTERN`].
    fn drop_invalid_token(&mut self) {
        #[allow(clippy::unwrap_used)]
        let pattern = regex::Regex::new(TOKEN_PATTERN).unwrap();
        if let Some(token) = &self.sdk_token {
            if !pattern.is_match(token) {
                warn!("Invalid SDK token format, metric events will be anonymous");
                self.sdk_token = None;
            }
        }
    }

    /// Keep the debounce window ordered (`min <= max`).
    fn clamp_debounce(&mut self) {
        if self.metric_debounce_time_min > self.metric_debounce_time_max {
            warn!(
                min = self.metric_debounce_time_min,
                max = self.metric_debounce_time_max,
                "Metric debounce minimum exceeds maximum, clamping"
            );
            self.metric_debounce_time_min = self.metric_debounce_time_max;
        }
    }

    /// Location of `super.json`: the configured path or `<cwd>/superface/super.json`.
    pub fn super_json_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from("superface").join("super.json"))
    }
}
