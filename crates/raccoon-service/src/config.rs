//! Raccoon service configuration.
//!
//! Configuration is loaded from environment variables. Numeric values are
//! parsed and range-checked here so the rest of the service can use them
//! without further validation.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default log level when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default prefix for JSON API routes.
pub const DEFAULT_API_PATH_PREFIX: &str = "/api";

/// Default prefix for websocket routes.
pub const DEFAULT_WS_PATH_PREFIX: &str = "/ws";

/// Default minimum time between key refreshes triggered by unknown key IDs.
pub const DEFAULT_JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 3600;

/// Default graceful shutdown drain period.
pub const DEFAULT_SHUTDOWN_DRAIN_SECONDS: u64 = 0;

const ALLOWED_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Raccoon service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// One of `debug`, `info`, `warn`, `error`.
    pub log_level: String,

    /// Prefix for JSON API routes (default: "/api").
    pub api_path_prefix: String,

    /// Prefix for websocket routes (default: "/ws").
    pub ws_path_prefix: String,

    /// Identity provider OpenID configuration document.
    pub openid_configuration_url: String,

    /// Identity provider JWKS endpoint.
    pub jwks_url: String,

    /// Leeway in seconds for `exp`, `nbf` and `iat` checks.
    pub jwt_clock_skew_seconds: u64,

    /// Minimum seconds between refreshes triggered by an unknown `kid`.
    /// Zero allows a refresh on every miss (still coalesced).
    pub jwks_refresh_cooldown_seconds: u64,

    /// Seconds to wait after a shutdown signal before stopping.
    pub shutdown_drain_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid path prefix: {0}")]
    InvalidPathPrefix(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let openid_configuration_url = required(vars, "OPENID_CONFIGURATION_URL")?;
        let jwks_url = required(vars, "JWKS_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let log_level = vars
            .get("LOG_LEVEL")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        if !ALLOWED_LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(format!(
                "LOG_LEVEL must be one of {}, got '{}'",
                ALLOWED_LOG_LEVELS.join(", "),
                log_level
            )));
        }

        let api_path_prefix = path_prefix(vars, "API_PATH_PREFIX", DEFAULT_API_PATH_PREFIX)?;
        let ws_path_prefix = path_prefix(vars, "WS_PATH_PREFIX", DEFAULT_WS_PATH_PREFIX)?;

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs()
        };

        let jwks_refresh_cooldown_seconds = seconds(
            vars,
            "JWKS_REFRESH_COOLDOWN_SECONDS",
            DEFAULT_JWKS_REFRESH_COOLDOWN_SECONDS,
        )?;
        let shutdown_drain_seconds = seconds(
            vars,
            "SHUTDOWN_DRAIN_SECONDS",
            DEFAULT_SHUTDOWN_DRAIN_SECONDS,
        )?;

        Ok(Config {
            bind_address,
            log_level,
            api_path_prefix,
            ws_path_prefix,
            openid_configuration_url,
            jwks_url,
            jwt_clock_skew_seconds,
            jwks_refresh_cooldown_seconds,
            shutdown_drain_seconds,
        })
    }

    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds)
    }

    pub fn jwks_refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_cooldown_seconds)
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn path_prefix(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    let Some(value) = vars.get(name) else {
        return Ok(default.to_string());
    };

    if !value.starts_with('/') || value.len() < 2 || value.ends_with('/') {
        return Err(ConfigError::InvalidPathPrefix(format!(
            "{} must start with '/' and must not end with '/', got '{}'",
            name, value
        )));
    }

    Ok(value.clone())
}

fn seconds(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(value_str) => value_str.parse().map_err(|e| {
            ConfigError::InvalidDuration(format!(
                "{} must be a non-negative integer, got '{}': {}",
                name, value_str, e
            ))
        }),
        None => Ok(default),
    }
}
