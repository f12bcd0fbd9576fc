//! services/app/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development. Missing required values halt
//! startup with the complete list of missing keys; partial configuration is
//! never silently tolerated.

use std::time::Duration;
use tracing::Level;

const BACKEND_BASE_URL: &str = "BACKEND_BASE_URL";
const IDENTITY_PROJECT_ID: &str = "IDENTITY_PROJECT_ID";
const IDENTITY_API_KEY: &str = "IDENTITY_API_KEY";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Every required key that was absent, reported together.
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<String>),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend_base_url: String,
    pub identity_project_id: String,
    pub identity_api_key: String,
    pub log_level: Level,
    /// Hard deadline for one analysis request.
    pub request_timeout: Duration,
    /// Attempts before the health probe declares the backend offline.
    pub health_retries: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments so tests stay
    /// hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. All required keys are
    /// checked before the first error is returned.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |key: &str| -> Option<String> {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                missing.push(key.to_string());
            }
            value
        };

        let backend_base_url = require(BACKEND_BASE_URL);
        let identity_project_id = require(IDENTITY_PROJECT_ID);
        let identity_api_key = require(IDENTITY_API_KEY);

        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let timeout_secs = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue("REQUEST_TIMEOUT_SECS".to_string(), raw.clone())
            })?,
            None => 30,
        };

        let health_retries = match lookup("HEALTH_RETRIES") {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue("HEALTH_RETRIES".to_string(), raw.clone())
            })?,
            None => 3,
        };

        Ok(Self {
            // Required keys were all checked above; these unwraps cannot fire.
            backend_base_url: backend_base_url.unwrap_or_default(),
            identity_project_id: identity_project_id.unwrap_or_default(),
            identity_api_key: identity_api_key.unwrap_or_default(),
            log_level,
            request_timeout: Duration::from_secs(timeout_secs),
            health_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn all_missing_keys_are_enumerated_together() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        match err {
            ConfigError::MissingVars(keys) => {
                assert_eq!(
                    keys,
                    vec![BACKEND_BASE_URL, IDENTITY_PROJECT_ID, IDENTITY_API_KEY]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = Config::from_lookup(lookup_from(&[
            (BACKEND_BASE_URL, "  "),
            (IDENTITY_PROJECT_ID, "proj"),
            (IDENTITY_API_KEY, "key"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::MissingVars(keys) => assert_eq!(keys, vec![BACKEND_BASE_URL]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_when_optional_keys_absent() {
        let config = Config::from_lookup(lookup_from(&[
            (BACKEND_BASE_URL, "http://localhost:8080"),
            (IDENTITY_PROJECT_ID, "proj"),
            (IDENTITY_API_KEY, "key"),
        ]))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.health_retries, 3);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            (BACKEND_BASE_URL, "http://localhost:8080"),
            (IDENTITY_PROJECT_ID, "proj"),
            (IDENTITY_API_KEY, "key"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
    }
}
