use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = dodgeball_backend_client::DEFAULT_API_URL;
pub const MAX_INTEGRATION_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const MIN_TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// How long before expiry a source token is proactively refreshed.
pub const TOKEN_REFRESH_LEAD: Duration = Duration::from_secs(60);
pub const DISABLED_SOURCE_TOKEN: &str = "DISABLED_SOURCE_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVersion {
    #[default]
    V1,
}

impl ApiVersion {
    const ALLOWED: &'static [&'static str] = &["v1"];

    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "v1" => Ok(ApiVersion::V1),
            other => Err(ConfigError::invalid("api_version", other, Self::ALLOWED)),
        }
    }
}

/// SDK log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    #[default]
    Info,
    Error,
    None,
}

impl LogLevel {
    const ALLOWED: &'static [&'static str] = &["TRACE", "INFO", "ERROR", "NONE"];

    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "TRACE" => Ok(LogLevel::Trace),
            "INFO" => Ok(LogLevel::Info),
            "ERROR" => Ok(LogLevel::Error),
            "NONE" => Ok(LogLevel::None),
            other => Err(ConfigError::invalid("log_level", other, Self::ALLOWED)),
        }
    }
}

/// Client configuration. Build with [`DodgeballConfig::default`] or parse
/// from TOML with [`DodgeballConfig::from_toml_str`].
#[derive(Debug, Clone, PartialEq)]
pub struct DodgeballConfig {
    pub api_url: String,
    pub api_version: ApiVersion,
    pub log_level: LogLevel,
    pub is_enabled: bool,
    /// Default budget for loading and configuring an integration.
    pub integration_timeout: Duration,
    /// Where the source identity is persisted. `None` keeps it in memory.
    pub source_store_path: Option<PathBuf>,
    /// Lower bound on the delay before a proactive token refresh.
    pub min_token_refresh_interval: Duration,
}

impl Default for DodgeballConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_version: ApiVersion::V1,
            log_level: LogLevel::Info,
            is_enabled: true,
            integration_timeout: MAX_INTEGRATION_LOAD_TIMEOUT,
            source_store_path: None,
            min_token_refresh_interval: MIN_TOKEN_REFRESH_INTERVAL,
        }
    }
}

/// On-disk shape. Enumerated values stay strings here so that invalid
/// values are reported with the allowed set instead of a serde error.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigToml {
    api_url: Option<String>,
    api_version: Option<String>,
    log_level: Option<String>,
    is_enabled: Option<bool>,
    integration_timeout_ms: Option<u64>,
    source_store_path: Option<PathBuf>,
    min_token_refresh_interval_ms: Option<u64>,
}

impl DodgeballConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: ConfigToml = toml::from_str(contents)?;
        let defaults = Self::default();
        Ok(Self {
            api_url: raw.api_url.unwrap_or(defaults.api_url),
            api_version: match raw.api_version {
                Some(value) => value.parse()?,
                None => defaults.api_version,
            },
            log_level: match raw.log_level {
                Some(value) => value.parse()?,
                None => defaults.log_level,
            },
            is_enabled: raw.is_enabled.unwrap_or(defaults.is_enabled),
            integration_timeout: raw
                .integration_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.integration_timeout),
            source_store_path: raw.source_store_path,
            min_token_refresh_interval: raw
                .min_token_refresh_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_token_refresh_interval),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingConfig { field: "api_url" });
        }
        Ok(())
    }
}

/// Polling parameters of a verification loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationOptions {
    /// Wall-clock budget, reset whenever a step shows user activity.
    pub max_duration: Duration,
    pub polling_interval: Duration,
    /// Polls made at `polling_interval` before exponential back-off starts.
    pub num_at_initial_polling_interval: u32,
    pub max_polling_interval: Duration,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(24 * 60 * 60),
            polling_interval: Duration::from_millis(500),
            num_at_initial_polling_interval: 3,
            max_polling_interval: Duration::from_millis(10 * 60 * 1000),
        }
    }
}

/// Caller-facing overrides for [`crate::Dodgeball::begin_verification`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleVerificationOptions {
    pub max_duration: Option<Duration>,
}

impl HandleVerificationOptions {
    pub fn into_options(self) -> VerificationOptions {
        let defaults = VerificationOptions::default();
        VerificationOptions {
            max_duration: self.max_duration.unwrap_or(defaults.max_duration),
            ..defaults
        }
    }
}
