//! Video path: fragment reassembly and the decoder-facing frame queue.
//!
//! ```text
//! datagrams ──► NalAssembler ──► FrameQueue ──► decoder thread
//!  (network)     (network)        (shared)       wait_next / recycle
//! ```

mod frame_queue;
mod reassembly;

pub use frame_queue::{FrameQueue, SharedUnit, VideoUnit};
pub use reassembly::{NalAssembler, VideoFragment};
