//! Client API: the connection manager and its collaborators.

mod config;
mod events;
mod manager;
mod recovery;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use events::{event_channel, ClientEvent};
pub use manager::ConnectionManager;
pub use recovery::SessionRecoveryStore;
