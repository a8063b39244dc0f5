//! Configuration for an overlay peer.

use crate::node::Node;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5678;

/// Tunables for one Swaplink peer.
#[derive(Debug, Clone)]
pub struct SwaplinkConfig {
    /// Host to bind (default: 0.0.0.0)
    pub host: String,
    /// Port to bind, 0 for ephemeral (default: 5678)
    pub port: u16,
    /// Host announced to other peers when it differs from the bind host
    /// (required when binding a wildcard host such as 0.0.0.0)
    pub advertise_host: Option<String>,
    /// Hop limit for random walks started by this peer (default: 5)
    pub walk_length: u32,
    /// In-link repair period and in-link expiry age (default: 6s)
    pub heartbeat_check_interval: Duration,
    /// Out-link repair and heartbeat period (default: 2s)
    pub heartbeat_send_interval: Duration,
    /// Per-call timeout (default: 1s)
    pub rpc_timeout: Duration,
    /// Attempts the give-me-in-node handler makes before giving up (default: 8)
    pub give_me_max_attempts: usize,
    /// Capacity of the recent-contacts queue (default: 256)
    pub contacts_capacity: usize,
}

impl Default for SwaplinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            advertise_host: None,
            walk_length: 5,
            heartbeat_check_interval: Duration::from_secs(6),
            heartbeat_send_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(1),
            give_me_max_attempts: 8,
            contacts_capacity: 256,
        }
    }
}

impl SwaplinkConfig {
    /// Defaults bound to `host:port`.
    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Identity the peer starts out with (before the transport binds).
    pub fn node(&self) -> Node {
        Node::new(self.host.clone(), self.port)
    }

    /// Load defaults overridden by environment variables.
    ///
    /// Recognised variables:
    /// - `SWAPLINK_HOST`, `SWAPLINK_PORT`, `SWAPLINK_ADVERTISE_HOST`
    /// - `SWAPLINK_WALK_LENGTH`
    /// - `SWAPLINK_HEARTBEAT_CHECK_MS`, `SWAPLINK_HEARTBEAT_SEND_MS`
    /// - `SWAPLINK_RPC_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("SWAPLINK_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "SWAPLINK_PORT")? {
            config.port = port;
        }
        if let Some(host) = lookup("SWAPLINK_ADVERTISE_HOST") {
            config.advertise_host = Some(host);
        }
        if let Some(walk_length) = parse_var(&lookup, "SWAPLINK_WALK_LENGTH")? {
            config.walk_length = walk_length;
        }
        if let Some(ms) = parse_var(&lookup, "SWAPLINK_HEARTBEAT_CHECK_MS")? {
            config.heartbeat_check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "SWAPLINK_HEARTBEAT_SEND_MS")? {
            config.heartbeat_send_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "SWAPLINK_RPC_TIMEOUT_MS")? {
            config.rpc_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the intervals make sense together.
    ///
    /// Heartbeats must be sent more often than in-links are checked, or live
    /// in-links would expire between two heartbeats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("rpc_timeout"));
        }
        if self.heartbeat_send_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat_send_interval"));
        }
        if self.heartbeat_send_interval >= self.heartbeat_check_interval {
            return Err(ConfigError::HeartbeatTooSlow {
                send: self.heartbeat_send_interval,
                check: self.heartbeat_check_interval,
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    #[error("Heartbeat send interval ({send:?}) must be shorter than check interval ({check:?})")]
    HeartbeatTooSlow { send: Duration, check: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SwaplinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node(), Node::new("0.0.0.0", 5678));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SwaplinkConfig::from_lookup(lookup(&[
            ("SWAPLINK_HOST", "127.0.0.1"),
            ("SWAPLINK_PORT", "7000"),
            ("SWAPLINK_ADVERTISE_HOST", "10.0.0.7"),
            ("SWAPLINK_WALK_LENGTH", "8"),
            ("SWAPLINK_HEARTBEAT_CHECK_MS", "3000"),
            ("SWAPLINK_HEARTBEAT_SEND_MS", "1000"),
            ("SWAPLINK_RPC_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.node(), Node::new("127.0.0.1", 7000));
        assert_eq!(config.advertise_host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.walk_length, 8);
        assert_eq!(config.heartbeat_check_interval, Duration::from_secs(3));
        assert_eq!(config.heartbeat_send_interval, Duration::from_secs(1));
        assert_eq!(config.rpc_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let config = SwaplinkConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_value_rejected() {
        let err = SwaplinkConfig::from_lookup(lookup(&[("SWAPLINK_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SWAPLINK_PORT", .. }));
    }

    #[test]
    fn test_send_interval_must_be_shorter_than_check() {
        let config = SwaplinkConfig {
            heartbeat_send_interval: Duration::from_secs(6),
            ..SwaplinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HeartbeatTooSlow { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SwaplinkConfig {
            rpc_timeout: Duration::ZERO,
            ..SwaplinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("rpc_timeout"))
        ));
    }
}
