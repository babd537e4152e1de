//! Service configuration.
//!
//! Configuration is loaded from environment variables. `from_vars` takes an
//! explicit map so tests never touch the process environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default port of the external authorization gRPC listener.
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Default port of the OIDC metadata HTTP listener.
pub const DEFAULT_OIDC_PORT: u16 = 8003;

/// Default interface both listeners bind to.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default label key a secret must carry to be used as signing-key material.
pub const DEFAULT_SECRET_LABEL_KEY: &str = "extauth.io/managed-by";

/// Backpressure ceiling for concurrently open gRPC streams.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 10_000;

/// Default poll interval for the route document.
pub const DEFAULT_ROUTES_RELOAD_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Interface both listeners bind to.
    pub bind_host: String,

    /// Port of the external authorization gRPC listener.
    pub grpc_port: u16,

    /// Port of the OIDC metadata HTTP listener.
    pub oidc_port: u16,

    /// Label key that marks a secret as eligible signing-key material.
    pub secret_label_key: String,

    /// Maximum concurrently open gRPC streams per connection.
    pub max_concurrent_streams: u32,

    /// Declarative route document. When unset the route cache stays empty.
    pub routes_file: Option<PathBuf>,

    /// How often the route document is re-read.
    pub routes_reload_interval: Duration,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port configuration: {0}")]
    InvalidPort(String),

    #[error("Invalid concurrent stream limit: {0}")]
    InvalidStreamLimit(String),

    #[error("Invalid reload interval: {0}")]
    InvalidReloadInterval(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_host = vars
            .get("BIND_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());

        let grpc_port = parse_port(vars, "EXT_AUTH_GRPC_PORT", DEFAULT_GRPC_PORT)?;
        let oidc_port = parse_port(vars, "OIDC_HTTP_PORT", DEFAULT_OIDC_PORT)?;

        let secret_label_key = vars
            .get("SECRET_LABEL_KEY")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SECRET_LABEL_KEY.to_string());

        let max_concurrent_streams = if let Some(value_str) = vars.get("MAX_CONCURRENT_STREAMS")
        {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidStreamLimit(format!(
                    "MAX_CONCURRENT_STREAMS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidStreamLimit(
                    "MAX_CONCURRENT_STREAMS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_MAX_CONCURRENT_STREAMS
        };

        let routes_file = vars
            .get("ROUTES_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let routes_reload_seconds = if let Some(value_str) = vars.get("ROUTES_RELOAD_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidReloadInterval(format!(
                    "ROUTES_RELOAD_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidReloadInterval(
                    "ROUTES_RELOAD_SECONDS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_ROUTES_RELOAD_SECONDS
        };

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidLogFormat(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Config {
            bind_host,
            grpc_port,
            oidc_port,
            secret_label_key,
            max_concurrent_streams,
            routes_file,
            routes_reload_interval: Duration::from_secs(routes_reload_seconds),
            log_format,
        })
    }

    /// Socket address of the authorization listener.
    pub fn grpc_bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.grpc_port)
    }

    /// Socket address of the metadata listener.
    pub fn oidc_bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.oidc_port)
    }
}

fn parse_port(
    vars: &HashMap<String, String>,
    name: &str,
    default: u16,
) -> Result<u16, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u16 = value_str.parse().map_err(|e| {
        ConfigError::InvalidPort(format!(
            "{} must be a port number, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidPort(format!(
            "{} must be between 1 and 65535",
            name
        )));
    }

    Ok(value)
}
