//! # vrstream-client
//!
//! Headset-side session layer for a low-latency VR video stream. It provides:
//!
//! - **Discovery**: broadcast identification on every usable interface, or a
//!   unicast hello to a previously known server
//! - **Session lifecycle**: connect, idle detection, automatic resumption
//!   biased toward the last server
//! - **Frame delivery**: fragment reassembly into a bounded, drop-oldest
//!   queue drained by the decoder thread
//! - **Tracking uplink**: periodic head pose samples sent over the session
//!
//! ## Feature Flags
//!
//! - `transport` (default): datagram codec, session socket, broadcast discovery
//! - `client` (default): connection manager and tracking source
//! - `launcher` (default): companion launcher command socket
//!
//! ## Modules
//!
//! - [`core`]: Types, traits, constants and error types (always included)
//! - [`video`]: Fragment reassembly and the frame queue (always included)
//! - [`transport`]: Transport layer (requires `transport` feature)
//! - [`tracking`], [`client`]: Connection manager (requires `client` feature)
//! - [`launcher`]: Launcher command channel (requires `launcher` feature)
//!
//! ## Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vrstream_client::prelude::*;
//!
//! let frames = Arc::new(FrameQueue::default());
//! let (listener, mut events) = event_channel();
//! let manager = ConnectionManager::new(ClientConfig::from_env()?, frames.clone(), Arc::new(listener));
//! manager.start().await?;
//!
//! std::thread::spawn(move || loop {
//!     if let Some(unit) = frames.wait_next(Duration::from_millis(100)) {
//!         // decode unit.payload
//!         frames.recycle(unit);
//!     }
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Video path (always included)
pub mod video;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Tracking uplink (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod tracking;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Launcher command channel (feature-gated)
#[cfg(feature = "launcher")]
#[cfg_attr(docsrs, doc(cfg(feature = "launcher")))]
pub mod launcher;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;
    pub use crate::video::{FrameQueue, SharedUnit, VideoUnit};

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{Packet, PacketType, SessionSocket};

    // Client types (when enabled)
    #[cfg(feature = "client")]
    pub use crate::client::{
        event_channel, ClientConfig, ClientConfigBuilder, ClientEvent, ConnectionManager,
        SessionRecoveryStore,
    };

    // Launcher types (when enabled)
    #[cfg(feature = "launcher")]
    pub use crate::launcher::{LauncherCommand, LauncherError, LauncherSocket};
}

// Re-export commonly used items at crate root
pub use crate::core::{
    ClientError, ClientResult, ConnectionState, DeviceDescriptor, FrameSink, LifecycleListener,
    SessionEndpoint, StreamSettings, TrackingProvider, TrackingSample,
};
pub use crate::video::{FrameQueue, VideoUnit};

#[cfg(feature = "client")]
pub use crate::client::{ClientConfig, ConnectionManager, SessionRecoveryStore};
