//! Connection settings for a pairing attempt.

use std::time::Duration;

use companion_protocol::{TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use tracing::warn;

/// Overrides the read timeout, in milliseconds.
pub const READ_TIMEOUT_ENV: &str = "COMPANION_READ_TIMEOUT_MS";

/// Overrides the connect timeout, in milliseconds.
pub const CONNECT_TIMEOUT_ENV: &str = "COMPANION_CONNECT_TIMEOUT_MS";

/// Where and how to reach the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingConfig {
    host: String,
    port: u16,
    read_timeout: Duration,
    connect_timeout: Duration,
}

impl PairingConfig {
    /// Create config with default timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Create config, taking timeouts from the environment when set.
    pub fn from_env_or(host: impl Into<String>, port: u16) -> Self {
        Self::from_lookup(host, port, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        host: impl Into<String>,
        port: u16,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::new(host, port);
        if let Some(timeout) = millis_from(READ_TIMEOUT_ENV, lookup(READ_TIMEOUT_ENV)) {
            config.read_timeout = timeout;
        }
        if let Some(timeout) = millis_from(CONNECT_TIMEOUT_ENV, lookup(CONNECT_TIMEOUT_ENV)) {
            config.connect_timeout = timeout;
        }
        config
    }

    /// Set how long a read waits for the device.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set how long connecting may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build an unconnected transport for this device.
    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new(self.host.clone(), self.port)
            .with_read_timeout(self.read_timeout)
            .with_connect_timeout(self.connect_timeout)
    }
}

fn millis_from(key: &str, value: Option<String>) -> Option<Duration> {
    let value = value?;
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %value, "Ignoring invalid timeout override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod builder {
        use super::*;

        #[test]
        fn new_has_defaults() {
            let config = PairingConfig::new("10.0.0.2", 49153);
            assert_eq!(config.host(), "10.0.0.2");
            assert_eq!(config.port(), 49153);
            assert_eq!(config.read_timeout, Duration::from_secs(3));
            assert_eq!(config.connect_timeout, Duration::from_secs(10));
        }

        #[test]
        fn setters_override_timeouts() {
            let config = PairingConfig::new("10.0.0.2", 49153)
                .read_timeout(Duration::from_millis(500))
                .connect_timeout(Duration::from_secs(2));
            assert_eq!(config.read_timeout, Duration::from_millis(500));
            assert_eq!(config.connect_timeout, Duration::from_secs(2));
        }

        #[test]
        fn transport_uses_config() {
            let config =
                PairingConfig::new("10.0.0.2", 49153).read_timeout(Duration::from_millis(750));
            let transport = config.transport();
            assert_eq!(transport.host(), "10.0.0.2");
            assert_eq!(transport.port(), 49153);
            assert_eq!(transport.read_timeout(), Duration::from_millis(750));
            assert!(!transport.is_connected());
        }
    }

    mod environment {
        use super::*;

        #[test]
        fn overrides_apply() {
            let config = PairingConfig::from_lookup("h", 1, |key| match key {
                READ_TIMEOUT_ENV => Some("250".to_string()),
                CONNECT_TIMEOUT_ENV => Some(" 4000 ".to_string()),
                _ => None,
            });
            assert_eq!(config.read_timeout, Duration::from_millis(250));
            assert_eq!(config.connect_timeout, Duration::from_millis(4000));
        }

        #[test]
        fn invalid_values_are_ignored() {
            let config = PairingConfig::from_lookup("h", 1, |key| match key {
                READ_TIMEOUT_ENV => Some("soon".to_string()),
                CONNECT_TIMEOUT_ENV => Some("0".to_string()),
                _ => None,
            });
            assert_eq!(config, PairingConfig::new("h", 1));
        }

        #[test]
        fn absent_values_keep_defaults() {
            let config = PairingConfig::from_lookup("h", 1, |_| None);
            assert_eq!(config, PairingConfig::new("h", 1));
        }
    }
}
