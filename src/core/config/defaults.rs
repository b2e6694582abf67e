use std::time::Duration;

use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use crate::core::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONTEXT, DEFAULT_CONVERSATION_TITLE, DEFAULT_GREETING,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_REVEAL_INTERVAL_MS, MIN_REVEAL_INTERVAL_MS,
};

/// Environment variable that overrides `base_url` from the file.
pub const BASE_URL_ENV: &str = "IRIS_BASE_URL";

/// Keys accepted by `iris set` / `iris unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "base-url",
    "reveal-interval-ms",
    "context",
    "default-title",
    "greeting",
    "request-timeout-secs",
];

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Base URL after applying the command-line flag and `IRIS_BASE_URL`, in
    /// that order of precedence.
    pub fn resolve_base_url(&self, cli_override: Option<&str>) -> String {
        if let Some(url) = cli_override.filter(|url| !url.trim().is_empty()) {
            return url.trim().to_string();
        }
        match std::env::var(BASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => self.base_url().to_string(),
        }
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(
            self.reveal_interval_ms
                .unwrap_or(DEFAULT_REVEAL_INTERVAL_MS)
                .max(MIN_REVEAL_INTERVAL_MS),
        )
    }

    pub fn context(&self) -> &str {
        self.context.as_deref().unwrap_or(DEFAULT_CONTEXT)
    }

    pub fn default_title(&self) -> &str {
        self.default_title
            .as_deref()
            .unwrap_or(DEFAULT_CONVERSATION_TITLE)
    }

    pub fn greeting(&self) -> &str {
        self.greeting.as_deref().unwrap_or(DEFAULT_GREETING)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Set `key` from its textual form. Keys accept both `-` and `_`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match normalize_key(key).as_str() {
            "base-url" => self.base_url = Some(non_empty(key, value)?),
            "reveal-interval-ms" => self.reveal_interval_ms = Some(parse_positive(key, value)?),
            "context" => self.context = Some(non_empty(key, value)?),
            "default-title" => self.default_title = Some(non_empty(key, value)?),
            "greeting" => self.greeting = Some(non_empty(key, value)?),
            "request-timeout-secs" => {
                self.request_timeout_secs = Some(parse_positive(key, value)?)
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), ConfigError> {
        match normalize_key(key).as_str() {
            "base-url" => self.base_url = None,
            "reveal-interval-ms" => self.reveal_interval_ms = None,
            "context" => self.context = None,
            "default-title" => self.default_title = None,
            "greeting" => self.greeting = None,
            "request-timeout-secs" => self.request_timeout_secs = None,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "-")
}

fn non_empty(key: &str, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "value must not be empty".to_string(),
        });
    }
    Ok(value.to_string())
}

fn parse_positive(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "value must be greater than zero".to_string(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: err.to_string(),
        }),
    }
}
