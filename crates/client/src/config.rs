//! Client configuration from environment variables.

use std::time::Duration;

use roomchat_shared::{Destinations, HeartBeat};
use thiserror::Error;
use url::Url;

use crate::transport::TransportKind;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/ws";
pub const DEFAULT_SENDER: &str = "anonymous";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid URL `{value}`")]
    InvalidUrl { var: &'static str, value: String },
    #[error("{var}: expected a number of milliseconds, got `{value}`")]
    InvalidDuration { var: &'static str, value: String },
    #[error("{var}: expected `outgoing,incoming` milliseconds, got `{value}`")]
    InvalidHeartBeat { var: &'static str, value: String },
    #[error("{var}: expected true or false, got `{value}`")]
    InvalidBool { var: &'static str, value: String },
    #[error("{var}: unknown transport `{value}`")]
    UnknownTransport { var: &'static str, value: String },
    #[error("{var}: at least one transport is required")]
    NoTransports { var: &'static str },
    #[error("{var}: destination template must contain `{{room}}`, got `{value}`")]
    InvalidDestination { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// SockJS endpoint, e.g. `http://localhost:8080/ws`.
    pub endpoint: Url,
    /// Transports to try, in order.
    pub transports: Vec<TransportKind>,
    /// Keep cookies across the HTTP requests of a session.
    pub with_credentials: bool,
    /// Delay between reconnect attempts. Zero disables reconnection.
    pub reconnect_delay: Duration,
    pub heartbeat: HeartBeat,
    /// Upper bound on waiting for CONNECTED. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Name put in the `sender` field of published messages.
    pub sender: String,
    pub destinations: Destinations,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            transports: vec![
                TransportKind::WebSocket,
                TransportKind::XhrStreaming,
                TransportKind::XhrPolling,
            ],
            with_credentials: true,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            heartbeat: HeartBeat::new(10_000, 10_000),
            connect_timeout: None,
            sender: DEFAULT_SENDER.to_string(),
            destinations: Destinations::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `ROOMCHAT_ENDPOINT`: SockJS endpoint (default: `http://localhost:8080/ws`)
    /// - `ROOMCHAT_TRANSPORTS`: comma separated list of `websocket`, `xhr-streaming`,
    ///   `xhr-polling` (default: all three in that order)
    /// - `ROOMCHAT_WITH_CREDENTIALS`: `true` | `false` (default: `true`)
    /// - `ROOMCHAT_RECONNECT_DELAY_MS`: reconnect delay, `0` disables (default: `5000`)
    /// - `ROOMCHAT_HEARTBEAT`: `outgoing,incoming` (default: `10000,10000`)
    /// - `ROOMCHAT_CONNECT_TIMEOUT_MS`: `0` means no timeout (default: `0`)
    /// - `ROOMCHAT_SENDER`: sender name (default: `anonymous`)
    /// - `ROOMCHAT_PUBLISH_DESTINATION`: template with `{room}` (default: `/pub/chat/{room}-message`)
    /// - `ROOMCHAT_SUBSCRIBE_DESTINATION`: template with `{room}` (default: `/sub/room/{room}`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = get("ROOMCHAT_ENDPOINT") {
            config.endpoint = Url::parse(&value).map_err(|_| ConfigError::InvalidUrl {
                var: "ROOMCHAT_ENDPOINT",
                value,
            })?;
        }

        if let Some(value) = get("ROOMCHAT_TRANSPORTS") {
            config.transports = parse_transports("ROOMCHAT_TRANSPORTS", &value)?;
        }

        if let Some(value) = get("ROOMCHAT_WITH_CREDENTIALS") {
            config.with_credentials = match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidBool {
                        var: "ROOMCHAT_WITH_CREDENTIALS",
                        value,
                    })
                }
            };
        }

        if let Some(value) = get("ROOMCHAT_RECONNECT_DELAY_MS") {
            config.reconnect_delay = parse_millis("ROOMCHAT_RECONNECT_DELAY_MS", &value)?;
        }

        if let Some(value) = get("ROOMCHAT_HEARTBEAT") {
            config.heartbeat =
                HeartBeat::parse(&value).ok_or_else(|| ConfigError::InvalidHeartBeat {
                    var: "ROOMCHAT_HEARTBEAT",
                    value: value.clone(),
                })?;
        }

        if let Some(value) = get("ROOMCHAT_CONNECT_TIMEOUT_MS") {
            let timeout = parse_millis("ROOMCHAT_CONNECT_TIMEOUT_MS", &value)?;
            config.connect_timeout = (!timeout.is_zero()).then_some(timeout);
        }

        if let Some(value) = get("ROOMCHAT_SENDER") {
            config.sender = value;
        }

        if let Some(value) = get("ROOMCHAT_PUBLISH_DESTINATION") {
            config.destinations.publish = parse_template("ROOMCHAT_PUBLISH_DESTINATION", value)?;
        }

        if let Some(value) = get("ROOMCHAT_SUBSCRIBE_DESTINATION") {
            config.destinations.subscribe =
                parse_template("ROOMCHAT_SUBSCRIBE_DESTINATION", value)?;
        }

        Ok(config)
    }
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidDuration {
            var,
            value: value.to_string(),
        })
}

fn parse_transports(var: &'static str, value: &str) -> Result<Vec<TransportKind>, ConfigError> {
    let transports = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<TransportKind>()
                .map_err(|_| ConfigError::UnknownTransport {
                    var,
                    value: s.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if transports.is_empty() {
        return Err(ConfigError::NoTransports { var });
    }
    Ok(transports)
}

fn parse_template(var: &'static str, value: String) -> Result<String, ConfigError> {
    if value.contains(roomchat_shared::ROOM_PLACEHOLDER) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidDestination { var, value })
    }
}
