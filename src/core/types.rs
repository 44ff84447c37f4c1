//! Value types shared across the session layers.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Connection lifecycle state.
///
/// Owned by the connection manager's network context; every other context
/// only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started, or between a lost session and the next discovery.
    #[default]
    Idle,
    /// Looking for a server (unicast to a recovery target or broadcast).
    Discovering,
    /// Handshake complete, streaming.
    Connected,
    /// Stop requested, tearing down.
    ShuttingDown,
    /// Socket closed, network context finished.
    Stopped,
}

impl ConnectionState {
    /// Check if the state is terminal.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Stopped
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connected => "connected",
            ConnectionState::ShuttingDown => "shutting-down",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Server address/port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionEndpoint {
    /// Server IP address.
    pub address: IpAddr,
    /// Server UDP port.
    pub port: u16,
}

impl SessionEndpoint {
    /// Create an endpoint.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    /// Socket address for sending.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<SocketAddr> for SessionEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<SessionEndpoint> for SocketAddr {
    fn from(endpoint: SessionEndpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Stream parameters negotiated by the server handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Encoded frame width in pixels.
    pub width: u32,
    /// Encoded frame height in pixels.
    pub height: u32,
    /// Codec identifier (see [`crate::core::constants::CODEC_H264`]).
    pub codec: u32,
    /// Frame queue capacity requested by the server.
    pub frame_queue_size: u32,
    /// Display refresh rate in Hz.
    pub refresh_rate: u32,
}

/// In-session settings update pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChange {
    /// Server-side test mode flags.
    pub test_mode: u32,
    /// Non-zero when the stream is suspended.
    pub suspend: u32,
    /// New frame queue capacity.
    pub frame_queue_size: u32,
}

/// One head pose sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSample {
    /// Position in meters (x, y, z).
    pub position: [f32; 3],
    /// Orientation quaternion (x, y, z, w).
    pub orientation: [f32; 4],
    /// Sample time in microseconds on the device clock.
    pub timestamp_us: u64,
}

impl TrackingSample {
    /// Create a sample.
    pub fn new(position: [f32; 3], orientation: [f32; 4], timestamp_us: u64) -> Self {
        Self {
            position,
            orientation,
            timestamp_us,
        }
    }

    /// Identity pose at the origin.
    pub fn identity(timestamp_us: u64) -> Self {
        Self::new([0.0; 3], [0.0, 0.0, 0.0, 1.0], timestamp_us)
    }
}

/// Headset capabilities advertised in the discovery datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Human-readable device name (truncated to 32 bytes on the wire).
    pub device_name: String,
    /// Supported refresh rates in Hz; unused slots are zero.
    pub refresh_rates: [u8; 4],
    /// Per-eye render target width.
    pub render_width: u32,
    /// Per-eye render target height.
    pub render_height: u32,
    /// Left/right/top/bottom field-of-view angles in degrees, left eye then right eye.
    pub fov: [f32; 8],
    /// Device family.
    pub device_type: u8,
    /// Device model within the family.
    pub device_sub_type: u8,
    /// Headset capability bits.
    pub device_capability_flags: u32,
    /// Controller capability bits.
    pub controller_capability_flags: u32,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            device_name: "Generic Headset".to_string(),
            refresh_rates: [72, 0, 0, 0],
            render_width: 1440,
            render_height: 1600,
            fov: [45.0; 8],
            device_type: 0,
            device_sub_type: 0,
            device_capability_flags: 0,
            controller_capability_flags: 0,
        }
    }
}

impl DeviceDescriptor {
    /// Set the device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the supported refresh rates (at most four are advertised).
    pub fn with_refresh_rates(mut self, rates: &[u8]) -> Self {
        self.refresh_rates = [0; 4];
        for (slot, rate) in self.refresh_rates.iter_mut().zip(rates) {
            *slot = *rate;
        }
        self
    }

    /// Set the per-eye render target size.
    pub fn with_render_size(mut self, width: u32, height: u32) -> Self {
        self.render_width = width;
        self.render_height = height;
        self
    }

    /// Set the capability flags.
    pub fn with_capabilities(mut self, device: u32, controller: u32) -> Self {
        self.device_capability_flags = device;
        self.controller_capability_flags = controller;
        self
    }
}
