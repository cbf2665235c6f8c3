//! Server configuration
//!
//! Defaults, overridden by environment variables, overridden in turn by the
//! first command-line argument (the WebSocket bind address).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::handshake::DEFAULT_HANDSHAKE_TIMEOUT;
use crate::hub::DEFAULT_HUB_CAPACITY;

/// Default WebSocket address
pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:3000";

/// Default HTTP address for `GET /colors`
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3001";

/// Channel buffer size for registry commands
pub const DEFAULT_REGISTRY_BUFFER: usize = 256;

/// Default period of the connection monitor
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// WebSocket bind address
    pub ws_addr: String,
    /// HTTP bind address
    pub http_addr: String,
    /// Time a new socket has to send its startup frame
    pub handshake_timeout: Duration,
    /// Events buffered per hub subscription
    pub hub_capacity: usize,
    /// Registry command channel size
    pub registry_buffer: usize,
    /// Period of the connection monitor
    pub monitor_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: DEFAULT_WS_ADDR.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            hub_capacity: DEFAULT_HUB_CAPACITY,
            registry_buffer: DEFAULT_REGISTRY_BUFFER,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Load from the process environment and command line
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(env::args().skip(1), |key| env::var(key).ok())
    }

    /// Load from explicit arguments (program name excluded) and a variable lookup
    pub fn load<A, F>(mut args: A, var: F) -> Result<Self, ConfigError>
    where
        A: Iterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = var("CHAT_WS_ADDR") {
            config.ws_addr = addr;
        }
        if let Some(addr) = var("CHAT_HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Some(secs) = parse_var::<u64, _>(&var, "CHAT_HANDSHAKE_TIMEOUT_SECS")? {
            let secs = non_zero(secs, "CHAT_HANDSHAKE_TIMEOUT_SECS")?;
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize, _>(&var, "CHAT_HUB_CAPACITY")? {
            config.hub_capacity = non_zero(capacity, "CHAT_HUB_CAPACITY")?;
        }
        if let Some(secs) = parse_var::<u64, _>(&var, "CHAT_MONITOR_INTERVAL_SECS")? {
            let secs = non_zero(secs, "CHAT_MONITOR_INTERVAL_SECS")?;
            config.monitor_interval = Duration::from_secs(secs);
        }

        // Get bind address from command line
        if let Some(addr) = args.next() {
            config.ws_addr = addr;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(var: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

fn non_zero<T>(value: T, key: &'static str) -> Result<T, ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        Err(ConfigError::Zero { key })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(args: &[&str], vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::load(args.iter().map(|a| a.to_string()), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[], &[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.ws_addr, "127.0.0.1:3000");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let config = load(
            &[],
            &[
                ("CHAT_WS_ADDR", "0.0.0.0:4000"),
                ("CHAT_HTTP_ADDR", "0.0.0.0:4001"),
                ("CHAT_HANDSHAKE_TIMEOUT_SECS", "3"),
                ("CHAT_HUB_CAPACITY", "16"),
                ("CHAT_MONITOR_INTERVAL_SECS", "30"),
            ],
        )
        .unwrap();

        assert_eq!(config.ws_addr, "0.0.0.0:4000");
        assert_eq!(config.http_addr, "0.0.0.0:4001");
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.hub_capacity, 16);
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_argument_wins_over_env() {
        let config = load(&["127.0.0.1:9000"], &[("CHAT_WS_ADDR", "0.0.0.0:4000")]).unwrap();
        assert_eq!(config.ws_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[], &[("CHAT_HUB_CAPACITY", "lots")]),
            Err(ConfigError::InvalidValue { key: "CHAT_HUB_CAPACITY", .. })
        ));
        assert!(matches!(
            load(&[], &[("CHAT_HUB_CAPACITY", "0")]),
            Err(ConfigError::Zero { key: "CHAT_HUB_CAPACITY" })
        ));
        assert!(matches!(
            load(&[], &[("CHAT_HANDSHAKE_TIMEOUT_SECS", "-1")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
