//! Session bookkeeping for the connection manager.
//!
//! [`Discovery`] tracks where identification datagrams go and whose replies
//! are accepted; [`LiveSession`] tracks the single connected peer and its
//! liveness.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::core::{SessionEndpoint, StreamSettings};

/// Discovery attempt state.
///
/// A discovery attempt may be biased toward a recovery endpoint. While the
/// bias holds, hellos go unicast to that endpoint and only its IP address may
/// complete the handshake. The bias expires after the discovery timeout and
/// the attempt continues as plain broadcast discovery.
#[derive(Debug, Clone)]
pub struct Discovery {
    target: Option<SessionEndpoint>,
    bias_deadline: Option<Instant>,
    next_hello: Instant,
    hellos_sent: u64,
}

impl Discovery {
    /// Start a broadcast attempt.
    pub fn broadcast(now: Instant) -> Self {
        Self {
            target: None,
            bias_deadline: None,
            next_hello: now,
            hellos_sent: 0,
        }
    }

    /// Start an attempt biased toward `target` for at most `timeout`.
    pub fn biased(target: SessionEndpoint, now: Instant, timeout: Duration) -> Self {
        Self {
            target: Some(target),
            bias_deadline: Some(now + timeout),
            next_hello: now,
            hellos_sent: 0,
        }
    }

    /// Start an attempt, biased if a target is known.
    pub fn new(target: Option<SessionEndpoint>, now: Instant, timeout: Duration) -> Self {
        match target {
            Some(target) => Self::biased(target, now, timeout),
            None => Self::broadcast(now),
        }
    }

    /// Current recovery target, if the bias still holds.
    pub fn target(&self) -> Option<SessionEndpoint> {
        self.target
    }

    /// Check if the recovery bias has run out at `now`.
    pub fn bias_expired(&self, now: Instant) -> bool {
        self.bias_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Drop the recovery bias, returning the abandoned target.
    pub fn drop_bias(&mut self) -> Option<SessionEndpoint> {
        self.bias_deadline = None;
        self.target.take()
    }

    /// Check if a handshake reply from `from` may complete discovery.
    ///
    /// Matching is by IP only: the server may answer from a different port
    /// than the one the hello was sent to.
    pub fn accepts(&self, from: SocketAddr) -> bool {
        match self.target {
            Some(target) => target.address == from.ip(),
            None => true,
        }
    }

    /// Check if a hello is due at `now`.
    pub fn hello_due(&self, now: Instant) -> bool {
        now >= self.next_hello
    }

    /// Destinations for the next hello.
    pub fn hello_targets(&self, broadcast: &[Ipv4Addr], port: u16) -> Vec<SocketAddr> {
        match self.target {
            Some(target) => vec![target.socket_addr()],
            None => broadcast
                .iter()
                .map(|addr| SocketAddr::new(IpAddr::V4(*addr), port))
                .collect(),
        }
    }

    /// Record a sent hello and schedule the next one.
    pub fn on_hello_sent(&mut self, now: Instant, interval: Duration) {
        self.hellos_sent += 1;
        self.next_hello = now + interval;
    }

    /// Number of hellos sent in this attempt.
    pub fn hellos_sent(&self) -> u64 {
        self.hellos_sent
    }

    /// Earliest instant the network loop must wake up for.
    pub fn next_deadline(&self) -> Instant {
        match self.bias_deadline {
            Some(deadline) => deadline.min(self.next_hello),
            None => self.next_hello,
        }
    }
}

/// The connected peer.
#[derive(Debug, Clone)]
pub struct LiveSession {
    /// Peer that completed the handshake.
    pub endpoint: SessionEndpoint,
    /// Negotiated stream parameters.
    pub settings: StreamSettings,
    /// When the handshake completed.
    pub established: Instant,
    /// When the last datagram of any kind arrived from the peer.
    pub last_received: Instant,
    /// Tracking samples sent during the session.
    pub tracking_sent: u64,
}

impl LiveSession {
    /// Create a session established at `now`.
    pub fn new(endpoint: SessionEndpoint, settings: StreamSettings, now: Instant) -> Self {
        Self {
            endpoint,
            settings,
            established: now,
            last_received: now,
            tracking_sent: 0,
        }
    }

    /// Check if a datagram came from the session peer.
    pub fn is_peer(&self, from: SocketAddr) -> bool {
        SessionEndpoint::from(from) == self.endpoint
    }

    /// Update liveness after a datagram from the peer.
    pub fn on_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Instant at which the session times out without further datagrams.
    pub fn idle_deadline(&self, timeout: Duration) -> Instant {
        self.last_received + timeout
    }

    /// Check if the session has been silent for longer than `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now >= self.idle_deadline(timeout)
    }
}
