//! Transport layer: datagram formats, the session socket, discovery targets
//! and session bookkeeping.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Connection manager              │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   packets, discovery, liveness          │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod discovery;
mod packet;
mod socket;

pub use connection::{Discovery, LiveSession};
pub use discovery::{
    broadcast_addresses, local_broadcast_addresses, system_interfaces, InterfaceAddr,
};
pub use packet::{sizes, HelloMessage, Packet, PacketType, TrackingInfo};
pub use socket::{datagram_buffer, SessionSocket};
