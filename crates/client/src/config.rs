//! Client configuration.
//!
//! Defaults are usable as-is; `from_env` overrides them from `PMO_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const ENV_INIT_TIMEOUT_MS: &str = "PMO_INIT_TIMEOUT_MS";
pub const ENV_SIGN_OUT_TIMEOUT_MS: &str = "PMO_SIGN_OUT_TIMEOUT_MS";
pub const ENV_STORAGE_KEY: &str = "PMO_STORAGE_KEY";
pub const ENV_CACHE_DIR: &str = "PMO_CACHE_DIR";
pub const ENV_BACKEND_URL: &str = "PMO_BACKEND_URL";
pub const ENV_BACKEND_API_KEY: &str = "PMO_BACKEND_API_KEY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} is required but not set")]
    Missing(&'static str),
}

/// Session engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on session validation during `initialize()`.
    pub init_timeout: Duration,
    /// Upper bound on the backend sign-out call.
    pub sign_out_timeout: Duration,
    /// Name of the persisted snapshot (file stem).
    pub storage_key: String,
    /// Directory holding the snapshot; platform data dir when unset.
    pub cache_dir: Option<PathBuf>,
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            sign_out_timeout: Duration::from_secs(10),
            storage_key: "auth-storage".to_string(),
            cache_dir: None,
            backend_url: None,
            backend_api_key: None,
        }
    }
}

impl ClientConfig {
    /// Load overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load overrides from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = lookup(ENV_INIT_TIMEOUT_MS) {
            config.init_timeout = parse_millis(ENV_INIT_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_SIGN_OUT_TIMEOUT_MS) {
            config.sign_out_timeout = parse_millis(ENV_SIGN_OUT_TIMEOUT_MS, &ms)?;
        }
        if let Some(key) = lookup(ENV_STORAGE_KEY) {
            if key.trim().is_empty() || key.contains(['/', '\\']) {
                return Err(ConfigError::InvalidValue {
                    var: ENV_STORAGE_KEY,
                    value: key,
                    reason: "must be a non-empty file name".to_string(),
                });
            }
            config.storage_key = key;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        config.backend_url = lookup(ENV_BACKEND_URL).map(|url| url.trim_end_matches('/').to_string());
        config.backend_api_key = lookup(ENV_BACKEND_API_KEY);

        Ok(config)
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_sign_out_timeout(mut self, timeout: Duration) -> Self {
        self.sign_out_timeout = timeout;
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_backend(mut self, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self.backend_api_key = Some(api_key.into());
        self
    }

    /// Full path of the snapshot file, if a cache directory can be determined.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        Some(self.resolved_cache_dir()?.join(format!("{}.json", self.storage_key)))
    }

    /// Where the HTTP backend keeps its session tokens between runs.
    pub fn session_path(&self) -> Option<PathBuf> {
        Some(self.resolved_cache_dir()?.join(format!("{}-session.json", self.storage_key)))
    }

    fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("pmo")))
    }
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}
