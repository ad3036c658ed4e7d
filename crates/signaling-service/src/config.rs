//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! match the browser client's expectations (port 8181, four members per room).

use common::config::{LogFormat, ObservabilityConfig};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default client-facing bind address (HTTP + WebSocket).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8181";

/// Default health/metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum members per room. Bounds the mesh fan-out: every new
/// member needs a handshake with every existing member.
pub const DEFAULT_ROOM_CAPACITY: usize = 4;

/// Default per-connection outbound event queue size.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default maximum inbound WebSocket message size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Default maximum room id length in bytes.
pub const DEFAULT_MAX_ROOM_ID_LENGTH: usize = 128;

/// Default maximum display name length in bytes.
pub const DEFAULT_MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Default maximum chat text length in bytes.
pub const DEFAULT_MAX_CHAT_LENGTH: usize = 4096;

/// Default grace period for draining actors on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "signaling_service=debug,tower_http=debug";

/// Allowed CORS origins for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// Any origin (`*`).
    Any,
    /// Explicit list of origins.
    List(Vec<String>),
}

/// Limits applied to client requests before they reach the room actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum room id length in bytes.
    pub max_room_id_length: usize,
    /// Maximum display name length in bytes.
    pub max_display_name_length: usize,
    /// Maximum chat text length in bytes.
    pub max_chat_length: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_room_id_length: DEFAULT_MAX_ROOM_ID_LENGTH,
            max_display_name_length: DEFAULT_MAX_DISPLAY_NAME_LENGTH,
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
        }
    }
}

/// Signaling service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client-facing bind address (default: "0.0.0.0:8181", or `0.0.0.0:$PORT`).
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Maximum concurrent members per room (default: 4).
    pub room_capacity: usize,

    /// Per-connection outbound queue size (default: 256).
    pub outbound_buffer: usize,

    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,

    /// Request validation limits.
    pub limits: RequestLimits,

    /// Allowed CORS origins.
    pub cors_origins: CorsOrigins,

    /// How long shutdown waits for room actors to stop.
    pub shutdown_grace: Duration,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        // PORT is honoured for platforms that inject it
        let bind_address = match (vars.get("SIGNALING_BIND_ADDRESS"), vars.get("PORT")) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("PORT must be a port number, got '{port}'"))
                })?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };

        let health_bind_address = vars
            .get("SIGNALING_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let room_capacity = parse_positive(vars, "SIGNALING_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?;
        let outbound_buffer =
            parse_positive(vars, "SIGNALING_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        let max_message_bytes =
            parse_positive(vars, "SIGNALING_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;

        let limits = RequestLimits {
            max_room_id_length: parse_positive(
                vars,
                "SIGNALING_MAX_ROOM_ID_LENGTH",
                DEFAULT_MAX_ROOM_ID_LENGTH,
            )?,
            max_display_name_length: parse_positive(
                vars,
                "SIGNALING_MAX_DISPLAY_NAME_LENGTH",
                DEFAULT_MAX_DISPLAY_NAME_LENGTH,
            )?,
            max_chat_length: parse_positive(
                vars,
                "SIGNALING_MAX_CHAT_LENGTH",
                DEFAULT_MAX_CHAT_LENGTH,
            )?,
        };

        let cors_origins = match vars.get("SIGNALING_CORS_ALLOWED_ORIGINS") {
            None => CorsOrigins::Any,
            Some(raw) if raw.trim() == "*" => CorsOrigins::Any,
            Some(raw) => {
                let origins: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(ToString::to_string)
                    .collect();
                if origins.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "SIGNALING_CORS_ALLOWED_ORIGINS must list at least one origin".to_string(),
                    ));
                }
                CorsOrigins::List(origins)
            }
        };

        let shutdown_grace_seconds = parse_positive(
            vars,
            "SIGNALING_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;

        let log_format = match vars.get("SIGNALING_LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>().map_err(ConfigError::InvalidValue)?,
            None => LogFormat::default(),
        };

        Ok(Config {
            bind_address,
            health_bind_address,
            room_capacity,
            outbound_buffer,
            max_message_bytes,
            limits,
            cors_origins,
            shutdown_grace: Duration::from_secs(shutdown_grace_seconds),
            observability: ObservabilityConfig {
                log_filter: DEFAULT_LOG_FILTER.to_string(),
                log_format,
            },
        })
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::InvalidValue(format!(
                "{key} must be a positive integer, got '{raw}'"
            ))),
        },
    }
}
