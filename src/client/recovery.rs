//! Last known server endpoint, kept across manager runs.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::SessionEndpoint;

/// Process-held record of the last server the client was connected to.
///
/// The application records the endpoint reported on shutdown and hands it
/// back as the recovery hint on the next start. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct SessionRecoveryStore {
    last: Arc<Mutex<Option<SessionEndpoint>>>,
}

impl SessionRecoveryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `endpoint`. A `None` keeps the previous record.
    pub fn record(&self, endpoint: Option<SessionEndpoint>) {
        if let Some(endpoint) = endpoint {
            tracing::debug!(%endpoint, "recorded recovery endpoint");
            *self.last.lock() = Some(endpoint);
        }
    }

    /// The last recorded endpoint.
    pub fn load(&self) -> Option<SessionEndpoint> {
        *self.last.lock()
    }

    /// Forget the record.
    pub fn clear(&self) {
        self.last.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_record_load_clear() {
        let store = SessionRecoveryStore::new();
        assert_eq!(store.load(), None);

        let endpoint = SessionEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4)), 9944);
        store.record(Some(endpoint));
        assert_eq!(store.load(), Some(endpoint));

        // A run that never connected does not erase the hint.
        store.record(None);
        assert_eq!(store.load(), Some(endpoint));

        let shared = store.clone();
        shared.clear();
        assert_eq!(store.load(), None);
    }
}
