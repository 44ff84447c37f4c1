//! Connection manager lifecycle against a fake streaming server on loopback.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use vrstream_client::client::{event_channel, ClientConfigBuilder, ClientEvent};
use vrstream_client::prelude::*;
use vrstream_client::transport::{HelloMessage, Packet, TrackingInfo};
use vrstream_client::video::VideoFragment;

const STEP: Duration = Duration::from_secs(2);

struct FakeServer {
    socket: UdpSocket,
}

impl FakeServer {
    async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn send(&self, packet: Packet<'_>, to: SocketAddr) {
        self.socket.send_to(&packet.encode(), to).await.unwrap();
    }

    /// Next hello, skipping other traffic.
    async fn recv_hello(&self) -> (HelloMessage, SocketAddr) {
        let mut buf = vec![0u8; 65535];
        tokio::time::timeout(STEP, async {
            loop {
                let (len, from) = self.socket.recv_from(&mut buf).await.unwrap();
                if let Ok(Packet::Hello(hello)) = Packet::decode(&buf[..len]) {
                    return (hello, from);
                }
            }
        })
        .await
        .expect("no hello received")
    }

    /// Next tracking packet, skipping other traffic.
    async fn recv_tracking(&self) -> TrackingInfo {
        let mut buf = vec![0u8; 65535];
        tokio::time::timeout(STEP, async {
            loop {
                let (len, _) = self.socket.recv_from(&mut buf).await.unwrap();
                if let Ok(Packet::Tracking(info)) = Packet::decode(&buf[..len]) {
                    return info;
                }
            }
        })
        .await
        .expect("no tracking received")
    }
}

fn settings() -> StreamSettings {
    StreamSettings {
        width: 1832,
        height: 1920,
        codec: 0,
        frame_queue_size: 2,
        refresh_rate: 72,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(STEP, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn p_frame(len: usize) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1, 0x41];
    data.resize(len, 0x5A);
    data
}

#[tokio::test]
async fn test_broadcast_discovery_connects() {
    let server = FakeServer::bind().await;
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .server_port(server.addr().port())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)])
        .discovery_interval(Duration::from_millis(50))
        .device(DeviceDescriptor::default().with_name("Test Headset"))
        .build();

    let frames = Arc::new(FrameQueue::default());
    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, frames.clone(), Arc::new(listener));
    manager.start().await.unwrap();

    let (hello, client_addr) = server.recv_hello().await;
    assert_eq!(hello.device.device_name, "Test Headset");
    assert_eq!(Some(client_addr), manager.local_addr());

    server.send(Packet::ConnectionReply(settings()), client_addr).await;

    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));
    assert!(
        manager
            .wait_for_state(ConnectionState::Connected, STEP)
            .await
    );
    assert_eq!(manager.live_endpoint(), Some(SessionEndpoint::from(server.addr())));
    assert_eq!(frames.capacity(), 2);

    // A two-fragment frame reaches the decoder side.
    let data = p_frame(48);
    server
        .send(
            Packet::Video(VideoFragment::Start {
                packet_counter: 1,
                presentation_time: 1000,
                frame_index: 1,
                frame_byte_size: 48,
                data: &data[..30],
            }),
            client_addr,
        )
        .await;
    server
        .send(
            Packet::Video(VideoFragment::Continuation {
                packet_counter: 2,
                data: &data[30..],
            }),
            client_addr,
        )
        .await;

    let consumer = frames.clone();
    let unit = tokio::task::spawn_blocking(move || consumer.wait_next(STEP))
        .await
        .unwrap()
        .expect("frame not delivered");
    assert_eq!(unit.frame_index, 1);
    assert_eq!(unit.payload, data);
    frames.recycle(unit);

    manager.stop().await;
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Disconnected
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Shutdown(Some(SessionEndpoint::from(server.addr())))
    );
    assert_eq!(manager.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_idle_timeout_resumes_toward_last_server() {
    let server = FakeServer::bind().await;
    // Broadcast goes nowhere the server listens: any hello it receives is unicast.
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .server_port(server.addr().port())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 2)])
        .discovery_interval(Duration::from_millis(50))
        .idle_timeout(Duration::from_millis(200))
        .build();

    let frames = Arc::new(FrameQueue::default());
    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, frames.clone(), Arc::new(listener));
    manager.start().await.unwrap();
    let client_addr = manager.local_addr().unwrap();

    server.send(Packet::ConnectionReply(settings()), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));

    // Keep-alives hold the session open past the idle timeout.
    let connected_at = Instant::now();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        server.send(Packet::KeepAlive, client_addr).await;
    }
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(connected_at.elapsed() > Duration::from_millis(200));

    // Silence: the session is lost and discovery resumes, biased toward us.
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(frames.is_empty());
    let (_, from) = server.recv_hello().await;
    assert_eq!(from, client_addr);
    assert_eq!(manager.state(), ConnectionState::Discovering);

    // The known server completes the handshake again.
    server.send(Packet::ConnectionReply(settings()), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));

    manager.stop().await;
}

#[tokio::test]
async fn test_recovery_target_filters_other_servers() {
    let known = FakeServer::bind().await;
    let stranger = FakeServer::bind().await;
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .server_port(known.addr().port())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 2)])
        .discovery_interval(Duration::from_millis(50))
        .build();

    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, Arc::new(FrameQueue::default()), Arc::new(listener))
        .with_recovery(Some(SessionEndpoint::new(
            Ipv4Addr::new(127, 0, 0, 3).into(),
            known.addr().port(),
        )));
    manager.start().await.unwrap();
    let client_addr = manager.local_addr().unwrap();

    // Reply from an address other than the recovery target is ignored.
    stranger.send(Packet::ConnectionReply(settings()), client_addr).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConnectionState::Discovering);
    assert!(events.try_recv().is_err());

    manager.stop().await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Shutdown(None));
}

#[tokio::test]
async fn test_tracking_forwarded_while_connected() {
    let server = FakeServer::bind().await;
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .server_port(server.addr().port())
        .broadcast_addresses(vec![Ipv4Addr::LOCALHOST])
        .discovery_interval(Duration::from_millis(50))
        .tracking_interval(Duration::from_millis(10))
        .build();

    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, Arc::new(FrameQueue::default()), Arc::new(listener))
        .with_tracking(|| Some(TrackingSample::new([0.0, 1.6, 0.0], [0.0, 0.0, 0.0, 1.0], 99)));
    manager.start().await.unwrap();

    let (_, client_addr) = server.recv_hello().await;
    server.send(Packet::ConnectionReply(settings()), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));

    let info = server.recv_tracking().await;
    assert_eq!(info.sample.position, [0.0, 1.6, 0.0]);
    assert_eq!(info.sample.timestamp_us, 99);
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Tracking { position: [_, y, _], .. } if y == 1.6
    ));

    manager.stop().await;
}

#[tokio::test]
async fn test_stop_releases_blocked_consumer() {
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 2)])
        .build();
    let frames = Arc::new(FrameQueue::default());
    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, frames.clone(), Arc::new(listener));
    manager.start().await.unwrap();

    let consumer = frames.clone();
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let decoder = std::thread::spawn(move || {
        let started = Instant::now();
        let unit = consumer.wait_next(Duration::from_secs(30));
        done_tx.send((unit.is_none(), started.elapsed())).unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(STEP, manager.stop()).await.unwrap();

    let (no_data, waited) = done_rx.recv_timeout(STEP).unwrap();
    assert!(no_data);
    assert!(waited < Duration::from_secs(5));
    decoder.join().unwrap();

    assert!(next_event(&mut events).await.is_shutdown());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_before_start_completes() {
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 2)])
        .build();
    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, Arc::new(FrameQueue::default()), Arc::new(listener));

    // Never started: nothing to tear down.
    tokio::time::timeout(STEP, manager.stop()).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Idle);

    // Stop racing a pending start.
    let (started, ()) = tokio::time::timeout(STEP, async {
        tokio::join!(manager.start(), manager.stop())
    })
    .await
    .unwrap();
    assert!(started.is_ok());
    assert_eq!(manager.state(), ConnectionState::Stopped);
    assert!(!manager.is_running());
    assert_eq!(manager.local_addr(), None);
    assert_eq!(next_event(&mut events).await, ClientEvent::Shutdown(None));
}

/// Manager connected to `server`, with broadcast aimed away from it.
async fn connected_client(
    server: &FakeServer,
) -> (
    ConnectionManager,
    Arc<FrameQueue>,
    mpsc::UnboundedReceiver<ClientEvent>,
    SocketAddr,
) {
    let config = ClientConfigBuilder::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .server_port(server.addr().port())
        .broadcast_addresses(vec![Ipv4Addr::new(127, 0, 0, 2)])
        .discovery_interval(Duration::from_millis(50))
        .build();

    let frames = Arc::new(FrameQueue::default());
    let (listener, mut events) = event_channel();
    let manager = ConnectionManager::new(config, frames.clone(), Arc::new(listener));
    manager.start().await.unwrap();
    let client_addr = manager.local_addr().unwrap();

    server.send(Packet::ConnectionReply(settings()), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));
    (manager, frames, events, client_addr)
}

async fn send_whole_frame(server: &FakeServer, to: SocketAddr, counter: u32, frame_index: u64) {
    let data = p_frame(24);
    server
        .send(
            Packet::Video(VideoFragment::Start {
                packet_counter: counter,
                presentation_time: frame_index * 1000,
                frame_index,
                frame_byte_size: data.len() as u32,
                data: &data,
            }),
            to,
        )
        .await;
}

async fn wait_for_len(frames: &FrameQueue, len: usize) {
    let deadline = Instant::now() + STEP;
    while frames.len() != len {
        assert!(Instant::now() < deadline, "queue never reached {len} units");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_settings_change_applied_in_place() {
    let server = FakeServer::bind().await;
    let (manager, frames, mut events, client_addr) = connected_client(&server).await;
    assert_eq!(frames.capacity(), 2);

    let change = SettingsChange {
        test_mode: 0,
        suspend: 1,
        frame_queue_size: 5,
    };
    server.send(Packet::ChangeSettings(change), client_addr).await;

    assert_eq!(next_event(&mut events).await, ClientEvent::SettingsChanged(change));
    assert_eq!(frames.capacity(), 5);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.live_endpoint(), Some(SessionEndpoint::from(server.addr())));

    manager.stop().await;
}

#[tokio::test]
async fn test_server_disconnect_resumes_biased_discovery() {
    let server = FakeServer::bind().await;
    let (manager, frames, mut events, client_addr) = connected_client(&server).await;

    send_whole_frame(&server, client_addr, 1, 1).await;
    wait_for_len(&frames, 1).await;

    server.send(Packet::Disconnect, client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(frames.is_empty());
    assert!(
        manager
            .wait_for_state(ConnectionState::Discovering, STEP)
            .await
    );

    // Broadcast never reaches the server, so this hello is the unicast retry.
    let (_, from) = server.recv_hello().await;
    assert_eq!(from, client_addr);

    server.send(Packet::ConnectionReply(settings()), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Connected(settings()));

    manager.stop().await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Shutdown(Some(SessionEndpoint::from(server.addr())))
    );
}

#[tokio::test]
async fn test_second_handshake_does_not_reset_session() {
    let server = FakeServer::bind().await;
    let (manager, frames, mut events, client_addr) = connected_client(&server).await;

    send_whole_frame(&server, client_addr, 1, 1).await;
    wait_for_len(&frames, 1).await;

    let renegotiated = StreamSettings {
        frame_queue_size: 7,
        ..settings()
    };
    server.send(Packet::ConnectionReply(renegotiated), client_addr).await;

    // A later datagram marks the rejected reply as processed.
    let change = SettingsChange {
        test_mode: 0,
        suspend: 0,
        frame_queue_size: 2,
    };
    server.send(Packet::ChangeSettings(change), client_addr).await;
    assert_eq!(next_event(&mut events).await, ClientEvent::SettingsChanged(change));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames.capacity(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.live_endpoint(), Some(SessionEndpoint::from(server.addr())));

    manager.stop().await;
    assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
    assert!(next_event(&mut events).await.is_shutdown());
}
