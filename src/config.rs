//! Runtime configuration.
//!
//! The configuration is read once at startup and passed by value into the
//! runtime driver; process environment access is confined to
//! [`Config::from_env`]. Priority: explicit configuration, then the
//! `AWS_LAMBDA_RUNTIME_API` environment variable, then the default endpoint.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// Default Runtime API host when nothing is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default Runtime API port when nothing is configured.
pub const DEFAULT_PORT: u16 = 7000;

const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";
const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT";

/// Configuration for the runtime core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Runtime API host.
    pub host: String,

    /// Runtime API port.
    pub port: u16,

    /// Timeout applied to reporting requests. `next` polls are never
    /// subject to a timeout; the platform holds them open until an
    /// invocation arrives.
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            request_timeout: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// `AWS_LAMBDA_RUNTIME_API` must be a `host:port` pair when set;
    /// `REQUEST_TIMEOUT` must be an integer number of milliseconds when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either variable is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(endpoint) = env::var(RUNTIME_API_ENV) {
            let (host, port) = endpoint
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.clone()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::InvalidEndpoint(endpoint.clone()))?;
            if host.is_empty() {
                return Err(ConfigError::InvalidEndpoint(endpoint));
            }
            config.host = host.to_string();
            config.port = port;
        }

        if let Ok(timeout) = env::var(REQUEST_TIMEOUT_ENV) {
            let millis: u64 = timeout
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(timeout.clone()))?;
            config.request_timeout = Some(Duration::from_millis(millis));
        }

        Ok(config)
    }

    /// The `host:port` address of the Runtime API.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
