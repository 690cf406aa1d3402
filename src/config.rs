//! Host configuration from environment variables.

use std::time::Duration;

use phoenix_ports_client::SocketOptions;

pub const TIMEOUT_VAR: &str = "PHOENIX_PORTS_TIMEOUT_MS";
pub const HEARTBEAT_VAR: &str = "PHOENIX_PORTS_HEARTBEAT_MS";
pub const AUTOCONNECT_VAR: &str = "PHOENIX_PORTS_AUTOCONNECT";

#[derive(Debug, Clone)]
pub struct Config {
    pub socket: SocketOptions,
    /// Endpoint for the default socket, connected before any command is read
    pub autoconnect: Option<String>,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PHOENIX_PORTS_TIMEOUT_MS`: join/leave reply timeout (default: 10000)
    /// - `PHOENIX_PORTS_HEARTBEAT_MS`: heartbeat interval (default: 30000)
    /// - `PHOENIX_PORTS_AUTOCONNECT`: endpoint for the default socket (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = SocketOptions::default();
        let socket = SocketOptions {
            timeout: millis(&lookup, TIMEOUT_VAR).unwrap_or(defaults.timeout),
            heartbeat_interval: millis(&lookup, HEARTBEAT_VAR)
                .unwrap_or(defaults.heartbeat_interval),
        };
        let autoconnect = lookup(AUTOCONNECT_VAR)
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty());

        Self {
            socket,
            autoconnect,
        }
    }
}

/// A positive millisecond count; anything else falls back to the default.
fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
