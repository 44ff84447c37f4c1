//! Capability traits at the seams of the connection manager.
//!
//! The manager never knows who consumes frames or who listens for lifecycle
//! events; it holds trait objects for both.

use super::types::{SessionEndpoint, SettingsChange, StreamSettings, TrackingSample};
use crate::video::VideoUnit;

/// Destination for reassembled video units.
///
/// Implemented by [`crate::video::FrameQueue`]. All methods are called from
/// the network context only and must not block beyond a short critical
/// section.
pub trait FrameSink: Send + Sync {
    /// Admit a unit, evicting the oldest one when full.
    ///
    /// Returns the frame index of the evicted unit, if any.
    fn enqueue(&self, unit: VideoUnit) -> Option<u64>;

    /// Drop every queued unit and release waiting consumers.
    fn flush(&self);

    /// Flush and adopt a new capacity (new session).
    fn reset(&self, capacity: usize);

    /// Adopt a new capacity without leaving the session.
    fn set_capacity(&self, capacity: usize);

    /// Storage for a unit of `len` bytes, reused where possible.
    fn take_buffer(&self, len: usize) -> Vec<u8> {
        Vec::with_capacity(len)
    }
}

/// Upstream lifecycle callbacks.
///
/// Callbacks run on the network context; implementations should hand work
/// off rather than block.
pub trait LifecycleListener: Send + Sync {
    /// Handshake completed with the negotiated stream parameters.
    fn on_connected(&self, settings: &StreamSettings);

    /// Server changed settings mid-session.
    fn on_change_settings(&self, change: &SettingsChange);

    /// The connected session ended; discovery resumes unless stopping.
    fn on_disconnect(&self);

    /// Final event of a run, carrying the last known server endpoint.
    fn on_shutdown(&self, last_server: Option<SessionEndpoint>);

    /// A tracking sample was transmitted while connected.
    fn on_tracking(&self, position: [f32; 3], orientation: [f32; 4]) {
        let _ = (position, orientation);
    }
}

/// Source of head pose samples, polled on the tracking schedule.
pub trait TrackingProvider: Send + 'static {
    /// Produce the current pose, or `None` if tracking is unavailable.
    fn sample(&mut self) -> Option<TrackingSample>;
}

impl<F> TrackingProvider for F
where
    F: FnMut() -> Option<TrackingSample> + Send + 'static,
{
    fn sample(&mut self) -> Option<TrackingSample> {
        self()
    }
}
