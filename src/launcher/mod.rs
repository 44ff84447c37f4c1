//! Companion launcher command channel.
//!
//! A local TCP socket over which a companion process starts and stops the
//! streaming client. Frames are length-prefixed JSON; see [`codec`].

pub mod codec;
mod socket;

pub use codec::{CommandReader, LauncherCommand, LauncherError, MAX_COMMAND_SIZE};
pub use socket::LauncherSocket;
