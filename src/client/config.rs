//! Connection manager configuration.
//!
//! Environment variables read by [`ClientConfig::from_env`]:
//! - `VRSTREAM_BIND_ADDR`: local UDP bind address (default `0.0.0.0:9944`)
//! - `VRSTREAM_SERVER_PORT`: server discovery port (default 9944)
//! - `VRSTREAM_BROADCAST`: comma-separated broadcast addresses overriding
//!   interface enumeration
//! - `VRSTREAM_DISCOVERY_INTERVAL_MS`, `VRSTREAM_DISCOVERY_TIMEOUT_MS`,
//!   `VRSTREAM_IDLE_TIMEOUT_MS`: session timing in milliseconds
//! - `VRSTREAM_TRACKING_INTERVAL_US`: tracking period in microseconds
//! - `VRSTREAM_FRAME_QUEUE_SIZE`: frame queue capacity before negotiation
//! - `VRSTREAM_DEVICE_NAME`: advertised device name

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_FRAME_QUEUE_SIZE, DEFAULT_PORT, DISCOVERY_INTERVAL, DISCOVERY_TIMEOUT, IDLE_TIMEOUT,
    MAX_DATAGRAM_SIZE, TRACKING_INTERVAL,
};
use crate::core::{ConfigError, DeviceDescriptor};

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local UDP address the session socket binds to.
    pub bind_addr: SocketAddr,

    /// Port the server listens on for hellos.
    pub server_port: u16,

    /// Broadcast targets; `None` enumerates local interfaces.
    pub broadcast_addresses: Option<Vec<Ipv4Addr>>,

    /// Interval between hellos while discovering.
    pub discovery_interval: Duration,

    /// Upper bound of a recovery-biased discovery attempt.
    pub discovery_timeout: Duration,

    /// Silence after which a connected session is considered lost.
    pub idle_timeout: Duration,

    /// Tracking sample period.
    pub tracking_interval: Duration,

    /// Frame queue capacity until the server negotiates one.
    pub frame_queue_size: usize,

    /// Receive buffer size for datagrams.
    pub recv_buffer_size: usize,

    /// Capabilities advertised in the hello.
    pub device: DeviceDescriptor,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            server_port: DEFAULT_PORT,
            broadcast_addresses: None,
            discovery_interval: DISCOVERY_INTERVAL,
            discovery_timeout: DISCOVERY_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
            tracking_interval: TRACKING_INTERVAL,
            frame_queue_size: DEFAULT_FRAME_QUEUE_SIZE,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            device: DeviceDescriptor::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `VRSTREAM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "VRSTREAM_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(port) = parse_var(&lookup, "VRSTREAM_SERVER_PORT")? {
            config.server_port = port;
        }
        if let Some(raw) = lookup("VRSTREAM_BROADCAST") {
            let addrs = raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<Ipv4Addr>().map_err(|_| ConfigError::InvalidValue {
                        key: "VRSTREAM_BROADCAST",
                        value: raw.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if !addrs.is_empty() {
                config.broadcast_addresses = Some(addrs);
            }
        }
        if let Some(ms) = parse_var(&lookup, "VRSTREAM_DISCOVERY_INTERVAL_MS")? {
            config.discovery_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "VRSTREAM_DISCOVERY_TIMEOUT_MS")? {
            config.discovery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "VRSTREAM_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(us) = parse_var(&lookup, "VRSTREAM_TRACKING_INTERVAL_US")? {
            config.tracking_interval = Duration::from_micros(us);
        }
        if let Some(size) = parse_var(&lookup, "VRSTREAM_FRAME_QUEUE_SIZE")? {
            config.frame_queue_size = size;
        }
        if let Some(name) = lookup("VRSTREAM_DEVICE_NAME") {
            config.device.device_name = name;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the network loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool, String); 4] = [
            (
                "discovery_interval",
                self.discovery_interval.is_zero(),
                format!("{:?}", self.discovery_interval),
            ),
            (
                "idle_timeout",
                self.idle_timeout.is_zero(),
                format!("{:?}", self.idle_timeout),
            ),
            (
                "tracking_interval",
                self.tracking_interval.is_zero(),
                format!("{:?}", self.tracking_interval),
            ),
            (
                "frame_queue_size",
                self.frame_queue_size == 0,
                self.frame_queue_size.to_string(),
            ),
        ];
        for (key, invalid, value) in checks {
            if invalid {
                return Err(ConfigError::InvalidValue { key, value });
            }
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the server discovery port.
    pub fn server_port(mut self, port: u16) -> Self {
        self.config.server_port = port;
        self
    }

    /// Use a fixed broadcast target list instead of interface enumeration.
    pub fn broadcast_addresses(mut self, addrs: Vec<Ipv4Addr>) -> Self {
        self.config.broadcast_addresses = Some(addrs);
        self
    }

    /// Set the hello interval.
    pub fn discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval = interval;
        self
    }

    /// Set the recovery-biased discovery timeout.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.discovery_timeout = timeout;
        self
    }

    /// Set the session idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the tracking period.
    pub fn tracking_interval(mut self, interval: Duration) -> Self {
        self.config.tracking_interval = interval;
        self
    }

    /// Set the initial frame queue capacity.
    pub fn frame_queue_size(mut self, size: usize) -> Self {
        self.config.frame_queue_size = size;
        self
    }

    /// Set the datagram receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the advertised device.
    pub fn device(mut self, device: DeviceDescriptor) -> Self {
        self.config.device = device;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
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
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.bind_addr.port(), 9944);
        assert_eq!(config.server_port, 9944);
        assert_eq!(config.discovery_interval, Duration::from_secs(1));
        assert_eq!(config.frame_queue_size, 10);
        assert!(config.broadcast_addresses.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfigBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .server_port(19944)
            .broadcast_addresses(vec![Ipv4Addr::LOCALHOST])
            .idle_timeout(Duration::from_millis(200))
            .device(DeviceDescriptor::default().with_name("Quest"))
            .build();

        assert_eq!(config.server_port, 19944);
        assert_eq!(config.broadcast_addresses, Some(vec![Ipv4Addr::LOCALHOST]));
        assert_eq!(config.idle_timeout, Duration::from_millis(200));
        assert_eq!(config.device.device_name, "Quest");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("VRSTREAM_BIND_ADDR", "127.0.0.1:5000"),
            ("VRSTREAM_SERVER_PORT", "6000"),
            ("VRSTREAM_BROADCAST", "192.168.1.255, 10.0.255.255"),
            ("VRSTREAM_IDLE_TIMEOUT_MS", "1500"),
            ("VRSTREAM_TRACKING_INTERVAL_US", "11111"),
            ("VRSTREAM_FRAME_QUEUE_SIZE", "3"),
            ("VRSTREAM_DEVICE_NAME", "Pico"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.server_port, 6000);
        assert_eq!(
            config.broadcast_addresses,
            Some(vec![
                Ipv4Addr::new(192, 168, 1, 255),
                Ipv4Addr::new(10, 0, 255, 255)
            ])
        );
        assert_eq!(config.idle_timeout, Duration::from_millis(1500));
        assert_eq!(config.tracking_interval, Duration::from_micros(11_111));
        assert_eq!(config.frame_queue_size, 3);
        assert_eq!(config.device.device_name, "Pico");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ClientConfig::from_lookup(lookup(&[("VRSTREAM_SERVER_PORT", "port")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "VRSTREAM_SERVER_PORT",
                value: "port".to_string()
            }
        );

        assert!(ClientConfig::from_lookup(lookup(&[("VRSTREAM_BROADCAST", "1.2.3")])).is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = ClientConfig::from_lookup(lookup(&[("VRSTREAM_IDLE_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "idle_timeout",
                ..
            }
        ));
    }
}
