//! Session constants.
//!
//! Port numbers and datagram layout values are shared with the streaming
//! server and MUST NOT be changed independently of it.

use std::net::Ipv4Addr;
use std::time::Duration;

// =============================================================================
// PORTS AND ADDRESSES
// =============================================================================

/// Well-known UDP port the client binds to and the server listens on.
pub const DEFAULT_PORT: u16 = 9944;

/// Local TCP port for the companion launcher command socket.
pub const LAUNCHER_PORT: u16 = 9944;

/// Fallback discovery target when no interface yields a broadcast address.
pub const UNIVERSAL_BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Interface name prefix of cellular/mobile data links, never used for discovery.
pub const CELLULAR_INTERFACE_PREFIX: &str = "rmnet";

// =============================================================================
// PROTOCOL
// =============================================================================

/// Datagram protocol version carried in hello and handshake packets.
pub const PROTOCOL_VERSION: u32 = 0x0001;

/// Fixed size of the device name field in the hello packet.
pub const DEVICE_NAME_SIZE: usize = 32;

/// Number of refresh rate slots advertised in the hello packet.
pub const REFRESH_RATE_SLOTS: usize = 4;

/// Field of view: left/right/top/bottom tangents for two eyes.
pub const FOV_COMPONENTS: usize = 8;

/// Codec identifier for H.264 streams.
pub const CODEC_H264: u32 = 0;

/// Codec identifier for H.265 streams.
pub const CODEC_H265: u32 = 1;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// =============================================================================
// TIMING
// =============================================================================

/// Interval between identification datagrams while discovering.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a recovery-biased discovery attempt.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected session is considered lost after this long without datagrams.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracking sample period (~72 Hz headset refresh).
pub const TRACKING_INTERVAL: Duration = Duration::from_micros(13_889);

// =============================================================================
// FRAME QUEUE
// =============================================================================

/// Default frame queue capacity before the server negotiates one.
pub const DEFAULT_FRAME_QUEUE_SIZE: usize = 10;

/// Upper bound accepted for a negotiated frame queue capacity.
pub const MAX_FRAME_QUEUE_SIZE: usize = 256;

/// Largest encoded frame accepted for reassembly.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// H.264 NAL unit type of a sequence parameter set.
pub const NAL_TYPE_SPS: u8 = 7;
