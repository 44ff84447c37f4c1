//! Channel-backed lifecycle listener.

use tokio::sync::mpsc;

use crate::core::{LifecycleListener, SessionEndpoint, SettingsChange, StreamSettings};

/// Lifecycle events delivered over a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake completed.
    Connected(StreamSettings),
    /// Server changed settings mid-session.
    SettingsChanged(SettingsChange),
    /// Connected session ended.
    Disconnected,
    /// Manager stopped; final event of a run.
    Shutdown(Option<SessionEndpoint>),
    /// Tracking sample transmitted.
    Tracking {
        /// Position in meters.
        position: [f32; 3],
        /// Orientation quaternion.
        orientation: [f32; 4],
    },
}

impl ClientEvent {
    /// Check if this is the final event of a run.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ClientEvent::Shutdown(_))
    }
}

/// Events are dropped once the receiver is gone.
impl LifecycleListener for mpsc::UnboundedSender<ClientEvent> {
    fn on_connected(&self, settings: &StreamSettings) {
        let _ = self.send(ClientEvent::Connected(*settings));
    }

    fn on_change_settings(&self, change: &SettingsChange) {
        let _ = self.send(ClientEvent::SettingsChanged(*change));
    }

    fn on_disconnect(&self) {
        let _ = self.send(ClientEvent::Disconnected);
    }

    fn on_shutdown(&self, last_server: Option<SessionEndpoint>) {
        let _ = self.send(ClientEvent::Shutdown(last_server));
    }

    fn on_tracking(&self, position: [f32; 3], orientation: [f32; 4]) {
        let _ = self.send(ClientEvent::Tracking {
            position,
            orientation,
        });
    }
}

/// Create a listener and the receiving end of its event stream.
pub fn event_channel() -> (
    mpsc::UnboundedSender<ClientEvent>,
    mpsc::UnboundedReceiver<ClientEvent>,
) {
    mpsc::unbounded_channel()
}
