//! Tracking uplink: a periodic sampler feeding a single-slot buffer that the
//! connection manager drains onto the session socket.

mod slot;
mod source;

pub use slot::TrackingSlot;
pub use source::{SharedProvider, TrackingSource};
