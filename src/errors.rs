/*
 *  errors.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Recoverable error types shared by the config store, plugins,
 *  fetchers and the render loop
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

/// Bad or missing configuration. Raised while loading the config file and
/// when a plugin is activated with settings it cannot work with.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("plugin '{0}' is not enabled")]
    NotEnabled(String),
    #[error("{plugin}: missing setting '{key}'")]
    MissingSetting { plugin: String, key: String },
    #[error("{plugin}: invalid setting '{key}': {reason}")]
    InvalidSetting { plugin: String, key: String, reason: String },
}

impl ConfigError {
    pub fn missing(plugin: &str, key: &str) -> Self {
        ConfigError::MissingSetting { plugin: plugin.to_string(), key: key.to_string() }
    }

    pub fn invalid(plugin: &str, key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidSetting {
            plugin: plugin.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// External data could not be obtained. The plugin keeps its last good data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("{0}: API key missing")]
    MissingApiKey(String),
    #[error("{service}: API key rejected (HTTP {status})")]
    Unauthorized { service: String, status: u16 },
    #[error("{service}: HTTP {status}")]
    Status { service: String, status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether trying again later is likely to succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::MissingApiKey(_)
            | FetchError::Unauthorized { .. }
            | FetchError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Network(format!("timed out: {err}"))
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// A single frame could not be produced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("draw failed: {0}")]
    Draw(String),
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

// the frame buffer draw target never fails
impl From<Infallible> for RenderError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(FetchError::Status { service: "finnhub".into(), status: 503 }.is_retryable());
        assert!(FetchError::Status { service: "finnhub".into(), status: 429 }.is_retryable());
        assert!(!FetchError::Status { service: "finnhub".into(), status: 404 }.is_retryable());
        assert!(!FetchError::MissingApiKey("wmata".into()).is_retryable());
        assert!(!FetchError::Unauthorized { service: "wmata".into(), status: 401 }.is_retryable());
        assert!(!FetchError::Malformed("no Trains".into()).is_retryable());
    }

    #[test]
    fn test_config_error_messages() {
        let e = ConfigError::missing("stock", "api_key");
        assert_eq!(e.to_string(), "stock: missing setting 'api_key'");
        let e = ConfigError::invalid("wmata", "stations", "empty list");
        assert_eq!(e.to_string(), "wmata: invalid setting 'stations': empty list");
    }
}
