use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::{ARCHIVER_USER_AGENT, DEFAULT_PROGRESS_INTERVAL_MS};
use crate::models::ArchiveOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Remote API
    pub api_base_url: String,
    pub page_size: u32,
    pub sub_reply_page_size: u32,
    pub request_timeout: Duration,
    pub user_agent: String,

    // Assets
    pub asset_timeout: Duration,
    pub archive_options: ArchiveOptions,

    // Progress
    pub progress_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Remote API
            api_base_url: required_env("API_BASE_URL")?,
            page_size: parse_env_u32("PAGE_SIZE", 30)?,
            sub_reply_page_size: parse_env_u32("SUB_REPLY_PAGE_SIZE", 30)?,
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            user_agent: env_or_default("USER_AGENT", ARCHIVER_USER_AGENT),

            // Assets
            asset_timeout: Duration::from_secs(parse_env_u64("ASSET_TIMEOUT_SECS", 120)?),
            archive_options: ArchiveOptions {
                images: parse_env_bool("ARCHIVE_IMAGES", true)?,
                audios: parse_env_bool("ARCHIVE_AUDIOS", true)?,
                videos: parse_env_bool("ARCHIVE_VIDEOS", true)?,
                portraits: parse_env_bool("ARCHIVE_PORTRAITS", true)?,
            },

            // Progress
            progress_interval: Duration::from_millis(parse_env_u64(
                "PROGRESS_INTERVAL_MS",
                DEFAULT_PROGRESS_INTERVAL_MS,
            )?),
        })
    }

    /// Configuration pointing at a local API, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:1".to_string(),
            page_size: 30,
            sub_reply_page_size: 30,
            request_timeout: Duration::from_secs(5),
            user_agent: ARCHIVER_USER_AGENT.to_string(),
            asset_timeout: Duration::from_secs(5),
            archive_options: ArchiveOptions::all(),
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "API_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if let Err(e) = Url::parse(&self.api_base_url) {
            return Err(ConfigError::InvalidValue {
                name: "API_BASE_URL".to_string(),
                message: format!("not a valid URL: {e}"),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PAGE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.sub_reply_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "SUB_REPLY_PAGE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_bool(name, &val),
        _ => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
