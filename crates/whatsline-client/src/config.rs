//! Environment-backed runtime configuration for a session host.

use std::{env, path::PathBuf};

use thiserror::Error;

const DEFAULT_SESSION_NAME: &str = "default";
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session name; scopes the on-disk store directory.
    pub session_name: String,
    /// Message store root. `None` keeps messages in memory only.
    pub data_dir: Option<PathBuf>,
    /// Reconnect automatically after generic connection errors.
    pub auto_reconnect: bool,
    /// Advertise this device as the active presence after each open.
    pub mark_online_on_connect: bool,
    /// Keepalive probe interval while connected.
    pub heartbeat_interval_secs: u64,
    /// Reconnect backoff floor.
    pub retry_base_delay_ms: u64,
    /// Reconnect backoff ceiling.
    pub retry_max_delay_ms: u64,
    /// Event bus buffer per subscriber.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_name: DEFAULT_SESSION_NAME.to_owned(),
            data_dir: None,
            auto_reconnect: true,
            mark_online_on_connect: true,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let session_name = optional_trimmed_env("WHATSLINE_SESSION", &mut lookup)
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_owned());
        let data_dir = optional_trimmed_env("WHATSLINE_DATA_DIR", &mut lookup).map(PathBuf::from);

        let auto_reconnect = parse_bool("WHATSLINE_AUTO_RECONNECT", true, &mut lookup)?;
        let mark_online_on_connect = parse_bool("WHATSLINE_MARK_ONLINE", true, &mut lookup)?;
        let heartbeat_interval_secs = parse_u64(
            "WHATSLINE_HEARTBEAT_SECS",
            DEFAULT_HEARTBEAT_SECS,
            &mut lookup,
        )?;
        let retry_base_delay_ms =
            parse_u64("WHATSLINE_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS, &mut lookup)?;
        let retry_max_delay_ms =
            parse_u64("WHATSLINE_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS, &mut lookup)?;
        let event_buffer = parse_usize("WHATSLINE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WHATSLINE_HEARTBEAT_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WHATSLINE_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if retry_base_delay_ms > retry_max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "WHATSLINE_RETRY_BASE_MS",
                value: retry_base_delay_ms.to_string(),
                reason: format!("must not exceed WHATSLINE_RETRY_MAX_MS ({retry_max_delay_ms})"),
            });
        }

        Ok(Self {
            session_name,
            data_dir,
            auto_reconnect,
            mark_online_on_connect,
            heartbeat_interval_secs,
            retry_base_delay_ms,
            retry_max_delay_ms,
            event_buffer,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_bool<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected one of 1/0/true/false/yes/no".to_owned(),
        }),
    }
}

fn parse_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_usize<F>(key: &'static str, default: usize, lookup: &mut F) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
