//! Connection manager: discovery, session lifecycle, video intake and
//! tracking uplink.
//!
//! ```text
//!            start                 handshake reply
//!   Idle ───────────► Discovering ─────────────────► Connected
//!    ▲                    ▲                              │
//!    │                    └──────── Idle ◄───────────────┘
//!    │                  (biased)        disconnect / idle / io error
//!    │
//!  stop (any state) ──► ShuttingDown ──► Stopped
//! ```
//!
//! All state transitions happen on one network task. Other contexts observe
//! the state through a watch channel and exchange data with the task through
//! the frame sink and the tracking slot.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::core::{
    ClientError, ClientResult, ConnectionState, FrameSink, LifecycleListener, SessionEndpoint,
    StreamSettings, TrackingProvider, TrackingSample,
};
use crate::tracking::{SharedProvider, TrackingSlot, TrackingSource};
use crate::transport::{
    datagram_buffer, local_broadcast_addresses, Discovery, HelloMessage, LiveSession, Packet,
    SessionSocket, TrackingInfo,
};
use crate::video::NalAssembler;

use super::config::ClientConfig;

/// Pause after a failed receive so a broken socket cannot spin the loop.
const RECV_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Handles of a running network context.
#[derive(Debug)]
struct Running {
    shutdown: watch::Sender<bool>,
    network: JoinHandle<()>,
    tracking: Option<TrackingSource>,
}

/// Client-side session owner.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use vrstream_client::prelude::*;
///
/// let frames = Arc::new(FrameQueue::default());
/// let (listener, mut events) = event_channel();
/// let manager = ConnectionManager::new(ClientConfig::default(), frames.clone(), Arc::new(listener))
///     .with_recovery(store.load());
///
/// manager.start().await?;
/// // decoder thread: frames.wait_next(..) / frames.recycle(..)
/// manager.stop().await;
/// ```
pub struct ConnectionManager {
    config: ClientConfig,
    frames: Arc<dyn FrameSink>,
    listener: Arc<dyn LifecycleListener>,
    recovery: Option<SessionEndpoint>,
    provider: Option<SharedProvider>,
    tracking: Arc<TrackingSlot>,
    state: Arc<watch::Sender<ConnectionState>>,
    live: Arc<Mutex<Option<SessionEndpoint>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    /// Create a manager delivering video units to `frames` and lifecycle
    /// events to `listener`.
    pub fn new(
        config: ClientConfig,
        frames: Arc<dyn FrameSink>,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            frames,
            listener,
            recovery: None,
            provider: None,
            tracking: Arc::new(TrackingSlot::new()),
            state: Arc::new(state),
            live: Arc::new(Mutex::new(None)),
            local_addr: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Bias the first discovery toward a previously known server.
    pub fn with_recovery(mut self, endpoint: Option<SessionEndpoint>) -> Self {
        self.recovery = endpoint;
        self
    }

    /// Sample poses from `provider` on the configured tracking interval.
    pub fn with_tracking<P: TrackingProvider>(mut self, provider: P) -> Self {
        self.provider = Some(SharedProvider::new(provider));
        self
    }

    /// Open the session socket and begin discovery.
    ///
    /// Returns once the socket is bound (or failed to bind); the handshake
    /// completes in the background. Use [`Self::wait_for_state`] to wait for
    /// [`ConnectionState::Connected`].
    pub async fn start(&self) -> ClientResult<()> {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut running = self.running.lock();
            if running.is_some() {
                return Err(ClientError::AlreadyRunning);
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let context = NetworkContext {
                config: self.config.clone(),
                frames: Arc::clone(&self.frames),
                listener: Arc::clone(&self.listener),
                tracking: Arc::clone(&self.tracking),
                state: Arc::clone(&self.state),
                live: Arc::clone(&self.live),
            };
            let network = tokio::spawn(run_network(
                context,
                self.recovery,
                ready_tx,
                shutdown_rx.clone(),
            ));
            let tracking = self.provider.clone().map(|provider| {
                TrackingSource::spawn(
                    provider,
                    self.config.tracking_interval,
                    Arc::clone(&self.tracking),
                    self.state.subscribe(),
                    shutdown_rx,
                )
            });
            *running = Some(Running {
                shutdown: shutdown_tx,
                network,
                tracking,
            });
        }

        match ready_rx.await {
            Ok(Ok(addr)) => {
                // A stop racing this start has already torn the session down.
                let running = self.running.lock();
                if running.is_some() {
                    *self.local_addr.lock() = Some(addr);
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.reap().await;
                Err(e)
            }
            Err(_) => Err(ClientError::Stopped),
        }
    }

    /// Stop the session and wait for the network context to finish.
    ///
    /// Releases a consumer blocked on the frame queue, closes the socket and
    /// emits the final `on_shutdown`. No callbacks fire after this returns.
    /// Does nothing if the manager is not running.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            tracing::debug!("stop requested while not running");
            return;
        };
        tracing::info!("stopping connection manager");

        let _ = running.shutdown.send(true);
        self.frames.flush();
        Self::join(running).await;
        *self.local_addr.lock() = None;
    }

    /// Join a network context that ended on its own (socket init failure).
    async fn reap(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            Self::join(running).await;
        }
    }

    async fn join(running: Running) {
        if let Err(e) = running.network.await {
            tracing::warn!(error = %e, "network task failed");
        }
        if let Some(tracking) = running.tracking {
            tracking.join().await;
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the state equals `target`.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        )
    }

    /// Check if a network context is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Server of the current or most recent session of this run.
    pub fn live_endpoint(&self) -> Option<SessionEndpoint> {
        *self.live.lock()
    }

    /// Local address of the session socket while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Frame sink receiving reassembled units.
    pub fn frames(&self) -> &Arc<dyn FrameSink> {
        &self.frames
    }

    /// Store the latest pose for the next tracking send.
    pub fn accept_tracking(&self, sample: TrackingSample) {
        self.tracking.accept(sample);
    }

    /// Transmit the latest pose now. Dropped unless connected.
    pub fn send_tracking_now(&self) {
        self.tracking.send_now();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("recovery", &self.recovery)
            .field("live", &self.live_endpoint())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Signal shutdown if stop was never awaited
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

/// Shared handles moved into the network task.
struct NetworkContext {
    config: ClientConfig,
    frames: Arc<dyn FrameSink>,
    listener: Arc<dyn LifecycleListener>,
    tracking: Arc<TrackingSlot>,
    state: Arc<watch::Sender<ConnectionState>>,
    live: Arc<Mutex<Option<SessionEndpoint>>>,
}

impl NetworkContext {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(%prev, %next, "state transition");
        }
    }
}

enum Phase {
    Discovering(Discovery),
    Connected(LiveSession),
}

/// Session state owned by the network task.
struct Session {
    ctx: NetworkContext,
    socket: SessionSocket,
    broadcast: Vec<Ipv4Addr>,
    hello: Vec<u8>,
    assembler: NalAssembler,
    phase: Phase,
}

async fn run_network(
    ctx: NetworkContext,
    recovery: Option<SessionEndpoint>,
    ready: oneshot::Sender<ClientResult<SocketAddr>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match SessionSocket::bind(ctx.config.bind_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(addr = %ctx.config.bind_addr, error = %e, "failed to open session socket");
            ctx.set_state(ConnectionState::Stopped);
            ctx.listener.on_shutdown(None);
            let _ = ready.send(Err(ClientError::SocketInit(e)));
            return;
        }
    };
    let local_addr = match socket.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            drop(socket);
            ctx.set_state(ConnectionState::Stopped);
            ctx.listener.on_shutdown(None);
            let _ = ready.send(Err(ClientError::SocketInit(e)));
            return;
        }
    };

    let broadcast = ctx
        .config
        .broadcast_addresses
        .clone()
        .filter(|addrs| !addrs.is_empty())
        .unwrap_or_else(local_broadcast_addresses);
    tracing::info!(
        %local_addr,
        broadcast = ?broadcast,
        recovery = ?recovery,
        "session socket open"
    );

    ctx.frames.reset(ctx.config.frame_queue_size);
    *ctx.live.lock() = None;

    let hello = Packet::Hello(HelloMessage::new(ctx.config.device.clone())).encode();
    let discovery = Discovery::new(recovery, Instant::now(), ctx.config.discovery_timeout);
    let mut buf = datagram_buffer(ctx.config.recv_buffer_size);
    let receiver = socket.clone();
    let tracking = Arc::clone(&ctx.tracking);

    let mut session = Session {
        ctx,
        socket,
        broadcast,
        hello,
        assembler: NalAssembler::default(),
        phase: Phase::Discovering(discovery),
    };
    session.ctx.set_state(ConnectionState::Discovering);
    let _ = ready.send(Ok(local_addr));

    loop {
        let deadline = tokio::time::Instant::from_std(session.next_deadline());
        let connected = session.is_connected();

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tracking.notified(), if connected => {
                session.send_tracking().await;
            }
            received = receiver.recv_from(&mut buf) => match received {
                Ok((data, from)) => session.handle_datagram(data, from),
                Err(e) => {
                    session.on_recv_error(e);
                    tokio::time::sleep(RECV_ERROR_PAUSE).await;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                session.on_timer().await;
            }
        }
    }

    drop(receiver);
    session.shutdown();
}

impl Session {
    fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected(_))
    }

    fn next_deadline(&self) -> Instant {
        match &self.phase {
            Phase::Discovering(discovery) => discovery.next_deadline(),
            Phase::Connected(live) => live.idle_deadline(self.ctx.config.idle_timeout),
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%from, len = data.len(), error = %ClientError::from(e), "dropping datagram");
                return;
            }
        };
        let now = Instant::now();

        match &mut self.phase {
            Phase::Discovering(discovery) => match packet {
                Packet::ConnectionReply(settings) => {
                    if !discovery.accepts(from) {
                        tracing::debug!(%from, target = ?discovery.target(), "ignoring handshake from other server");
                        return;
                    }
                    self.enter_connected(SessionEndpoint::from(from), settings, now);
                }
                other => {
                    tracing::trace!(%from, packet = ?other.packet_type(), "ignoring packet while discovering");
                }
            },
            Phase::Connected(live) => {
                if !live.is_peer(from) {
                    tracing::trace!(%from, peer = %live.endpoint, "ignoring datagram from unknown sender");
                    return;
                }
                live.on_received(now);

                match packet {
                    Packet::Video(fragment) => {
                        if let Err(e) = self.assembler.push(fragment, self.ctx.frames.as_ref()) {
                            tracing::debug!(error = %ClientError::from(e), "dropping video fragment");
                        }
                    }
                    Packet::KeepAlive => {}
                    Packet::ChangeSettings(change) => {
                        tracing::info!(
                            test_mode = change.test_mode,
                            suspend = change.suspend,
                            frame_queue_size = change.frame_queue_size,
                            "settings changed"
                        );
                        self.ctx.frames.set_capacity(change.frame_queue_size as usize);
                        self.ctx.listener.on_change_settings(&change);
                    }
                    Packet::Disconnect => self.leave_connected("server disconnected"),
                    Packet::ConnectionReply(_) => {
                        tracing::warn!(%from, "rejecting handshake reply while connected");
                    }
                    other => {
                        tracing::trace!(%from, packet = ?other.packet_type(), "ignoring client-bound packet");
                    }
                }
            }
        }
    }

    fn enter_connected(&mut self, endpoint: SessionEndpoint, settings: StreamSettings, now: Instant) {
        tracing::info!(
            %endpoint,
            width = settings.width,
            height = settings.height,
            codec = settings.codec,
            frame_queue_size = settings.frame_queue_size,
            refresh_rate = settings.refresh_rate,
            "connected"
        );
        self.ctx.frames.reset(settings.frame_queue_size as usize);
        self.assembler.reset(settings.codec);
        self.ctx.tracking.clear();
        *self.ctx.live.lock() = Some(endpoint);

        self.phase = Phase::Connected(LiveSession::new(endpoint, settings, now));
        self.ctx.set_state(ConnectionState::Connected);
        self.ctx.listener.on_connected(&settings);
    }

    /// Connected → Idle → Discovering, biased toward the lost server.
    fn leave_connected(&mut self, reason: &str) {
        let Some(endpoint) = self.end_session(reason, ConnectionState::Idle) else {
            return;
        };
        self.phase = Phase::Discovering(Discovery::biased(
            endpoint,
            Instant::now(),
            self.ctx.config.discovery_timeout,
        ));
        self.ctx.set_state(ConnectionState::Discovering);
    }

    /// Tear down a connected session, returning its endpoint.
    fn end_session(&mut self, reason: &str, next: ConnectionState) -> Option<SessionEndpoint> {
        let Phase::Connected(live) = &self.phase else {
            return None;
        };
        let endpoint = live.endpoint;
        let err = ClientError::SessionLost(reason.to_string());
        tracing::info!(
            %endpoint,
            error = %err,
            uptime_ms = live.established.elapsed().as_millis() as u64,
            tracking_sent = live.tracking_sent,
            "session ended"
        );

        self.ctx.frames.flush();
        self.assembler.reset(self.assembler.codec());
        self.ctx.tracking.clear();
        self.ctx.set_state(next);
        self.ctx.listener.on_disconnect();
        Some(endpoint)
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        match &mut self.phase {
            Phase::Discovering(discovery) => {
                if discovery.bias_expired(now) {
                    if let Some(target) = discovery.drop_bias() {
                        tracing::info!(
                            %target,
                            error = %ClientError::HandshakeTimeout,
                            "recovery server silent, falling back to broadcast"
                        );
                    }
                }
                if discovery.hello_due(now) {
                    self.send_hello(now).await;
                }
            }
            Phase::Connected(live) => {
                if live.is_idle(now, self.ctx.config.idle_timeout) {
                    self.leave_connected("idle timeout");
                }
            }
        }
    }

    async fn send_hello(&mut self, now: Instant) {
        let Phase::Discovering(discovery) = &mut self.phase else {
            return;
        };
        let targets = discovery.hello_targets(&self.broadcast, self.ctx.config.server_port);
        for target in &targets {
            if let Err(e) = self.socket.send_to(&self.hello, *target).await {
                tracing::debug!(%target, error = %e, "failed to send hello");
            }
        }
        discovery.on_hello_sent(now, self.ctx.config.discovery_interval);
        tracing::trace!(targets = ?targets, sent = discovery.hellos_sent(), "hello sent");
    }

    async fn send_tracking(&mut self) {
        let Phase::Connected(live) = &mut self.phase else {
            return;
        };
        let Some(sample) = self.ctx.tracking.take() else {
            return;
        };
        let packet = Packet::Tracking(TrackingInfo { flags: 0, sample });

        match self.socket.send_packet(&packet, live.endpoint.socket_addr()).await {
            Ok(_) => {
                live.tracking_sent += 1;
                self.ctx
                    .listener
                    .on_tracking(sample.position, sample.orientation);
            }
            Err(e) => {
                tracing::warn!(error = %e, "tracking send failed");
                self.leave_connected("send failed");
            }
        }
    }

    fn on_recv_error(&mut self, e: std::io::Error) {
        if self.is_connected() {
            tracing::warn!(error = %e, "receive failed");
            self.leave_connected("receive failed");
        } else {
            tracing::debug!(error = %e, "receive failed while discovering");
        }
    }

    /// Any state → ShuttingDown → Stopped. Consumes the session so the
    /// socket is closed before the final event.
    fn shutdown(mut self) {
        self.ctx.set_state(ConnectionState::ShuttingDown);
        self.end_session("stopped", ConnectionState::ShuttingDown);
        self.ctx.frames.flush();

        let Session { ctx, socket, .. } = self;
        drop(socket);

        let last_server = ctx.live.lock().take();
        ctx.set_state(ConnectionState::Stopped);
        tracing::info!(last_server = ?last_server, "connection manager stopped");
        ctx.listener.on_shutdown(last_server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{event_channel, ClientConfigBuilder, ClientEvent};
    use crate::video::FrameQueue;

    fn loopback_config() -> ClientConfig {
        ClientConfigBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .broadcast_addresses(vec![Ipv4Addr::LOCALHOST])
            .server_port(9)
            .build()
    }

    #[tokio::test]
    async fn test_start_stop_emits_shutdown() {
        let (listener, mut events) = event_channel();
        let manager = ConnectionManager::new(
            loopback_config(),
            Arc::new(FrameQueue::default()),
            Arc::new(listener),
        );

        manager.start().await.unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.state(), ConnectionState::Discovering);
        assert!(manager.local_addr().is_some());

        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert!(!manager.is_running());
        assert_eq!(events.recv().await, Some(ClientEvent::Shutdown(None)));
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (listener, _events) = event_channel();
        let manager = ConnectionManager::new(
            loopback_config(),
            Arc::new(FrameQueue::default()),
            Arc::new(listener),
        );

        manager.start().await.unwrap();
        assert!(matches!(
            manager.start().await,
            Err(ClientError::AlreadyRunning)
        ));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_socket_init_failure_is_reported() {
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let taken = blocker.local_addr().unwrap();

        let (listener, mut events) = event_channel();
        let config = ClientConfigBuilder::new().bind_addr(taken).build();
        let manager =
            ConnectionManager::new(config, Arc::new(FrameQueue::default()), Arc::new(listener));

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, ClientError::SocketInit(_)));
        assert!(!err.is_recoverable());
        assert!(!manager.is_running());
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert_eq!(events.recv().await, Some(ClientEvent::Shutdown(None)));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (listener, _events) = event_channel();
        let manager = ConnectionManager::new(
            loopback_config(),
            Arc::new(FrameQueue::default()),
            Arc::new(listener),
        );

        manager.start().await.unwrap();
        manager.stop().await;
        manager.start().await.unwrap();
        assert!(
            manager
                .wait_for_state(ConnectionState::Discovering, Duration::from_secs(1))
                .await
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_tracking_dropped_while_discovering() {
        let (listener, mut events) = event_channel();
        let manager = ConnectionManager::new(
            loopback_config(),
            Arc::new(FrameQueue::default()),
            Arc::new(listener),
        );
        manager.start().await.unwrap();

        manager.accept_tracking(TrackingSample::identity(1));
        manager.send_tracking_now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop().await;

        // Only the shutdown event: nothing was transmitted.
        assert_eq!(events.recv().await, Some(ClientEvent::Shutdown(None)));
        assert!(events.try_recv().is_err());
    }
}
