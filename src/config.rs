//! Environment-resolved configuration.
//!
//! drydock deliberately has no config-file or CLI layer of its own: the
//! host test suite drives it programmatically, and the only ambient knobs
//! are `DRYDOCK_*` environment variables resolved here.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but unusable.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// The environment variable name.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// Read an environment variable, treating absence as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "not valid unicode".to_string(),
        }),
    }
}

/// Read and parse an environment variable, falling back to a default.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false': {e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Client-side reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Whether cleanup registration is performed at all. Disabling shifts
    /// the cleanup burden to the caller.
    pub enabled: bool,
    /// Image run as the reaper companion container.
    pub image: String,
    /// Port the daemon listens on inside its container.
    pub port: u16,
    /// Connection attempts before giving up on the daemon.
    pub connect_attempts: u32,
    /// Initial backoff between connection attempts (doubled per retry).
    pub connect_backoff: Duration,
    /// Time allowed for the reaper container to become reachable.
    pub startup_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: "drydock/reaper:latest".to_string(),
            port: 8080,
            connect_attempts: 4,
            connect_backoff: Duration::from_millis(250),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

impl ReaperConfig {
    /// Resolve from `DRYDOCK_*` environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            enabled: !parse_bool_env("DRYDOCK_REAPER_DISABLED", false)?,
            image: optional_env("DRYDOCK_REAPER_IMAGE")?.unwrap_or(defaults.image),
            port: parse_optional_env("DRYDOCK_REAPER_PORT", defaults.port)?,
            connect_attempts: parse_optional_env(
                "DRYDOCK_REAPER_CONNECT_ATTEMPTS",
                defaults.connect_attempts,
            )?,
            connect_backoff: Duration::from_millis(parse_optional_env(
                "DRYDOCK_REAPER_CONNECT_BACKOFF_MS",
                defaults.connect_backoff.as_millis() as u64,
            )?),
            startup_timeout: Duration::from_secs(parse_optional_env(
                "DRYDOCK_REAPER_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout.as_secs(),
            )?),
        })
    }
}

/// Daemon-side reaper configuration (used by the `drydock-reaper` binary).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Listen port.
    pub port: u16,
    /// How long to wait for a new connection after the last one closed
    /// before the daemon exits.
    pub reconnection_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            reconnection_timeout: Duration::from_secs(10),
        }
    }
}

impl DaemonConfig {
    /// Resolve from `DRYDOCK_*` environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            port: parse_optional_env("DRYDOCK_REAPER_PORT", defaults.port)?,
            reconnection_timeout: Duration::from_secs(parse_optional_env(
                "DRYDOCK_REAPER_RECONNECT_TIMEOUT_SECS",
                defaults.reconnection_timeout.as_secs(),
            )?),
        })
    }
}
