//! vrstream headset demo
//!
//! Runs the connection manager against a streaming server on the local
//! network, drains the frame queue on a decoder thread and reports what it
//! receives.
//!
//! Environment variables:
//! - `VRSTREAM_*`: client configuration (see `ClientConfig::from_env`)
//! - `VRSTREAM_LAUNCHER`: set to `1` to accept launcher commands on TCP 9944
//! - `VRSTREAM_LOG_LEVEL`: trace|debug|info|warn|error (when `RUST_LOG` is unset)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vrstream_client::core::constants::LAUNCHER_PORT;
use vrstream_client::launcher::{LauncherCommand, LauncherError, LauncherSocket};
use vrstream_client::prelude::*;

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),

    #[error("failed to start decoder thread: {0}")]
    Decoder(#[from] std::io::Error),
}

/// Logs lifecycle events and remembers the last server for the next run.
struct HeadsetListener {
    store: SessionRecoveryStore,
}

impl LifecycleListener for HeadsetListener {
    fn on_connected(&self, settings: &StreamSettings) {
        tracing::info!(
            width = settings.width,
            height = settings.height,
            codec = settings.codec,
            refresh_rate = settings.refresh_rate,
            "stream started"
        );
    }

    fn on_change_settings(&self, change: &SettingsChange) {
        tracing::info!(suspend = change.suspend, "stream settings changed");
    }

    fn on_disconnect(&self) {
        tracing::info!("stream lost, searching for server");
    }

    fn on_shutdown(&self, last_server: Option<SessionEndpoint>) {
        self.store.record(last_server);
    }
}

/// Slow head sway so the server sees a moving pose.
fn synthetic_pose(epoch: Instant) -> impl FnMut() -> Option<TrackingSample> + Send + 'static {
    move || {
        let elapsed = epoch.elapsed();
        let yaw = (elapsed.as_secs_f32() * 0.5).sin() * 0.3;
        let half = yaw / 2.0;
        Some(TrackingSample::new(
            [0.0, 1.6, 0.0],
            [0.0, half.sin(), 0.0, half.cos()],
            elapsed.as_micros() as u64,
        ))
    }
}

fn build_manager(
    config: &ClientConfig,
    frames: &Arc<FrameQueue>,
    store: &SessionRecoveryStore,
) -> ConnectionManager {
    let listener = HeadsetListener {
        store: store.clone(),
    };
    let frames: Arc<dyn FrameSink> = frames.clone();
    ConnectionManager::new(config.clone(), frames, Arc::new(listener))
        .with_recovery(store.load())
        .with_tracking(synthetic_pose(Instant::now()))
}

fn spawn_decoder(frames: Arc<FrameQueue>, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("decoder".into())
        .spawn(move || {
            let mut decoded: u64 = 0;
            while running.load(Ordering::Acquire) {
                let Some(unit) = frames.wait_next(Duration::from_millis(100)) else {
                    continue;
                };
                decoded += 1;
                tracing::trace!(
                    frame_index = unit.frame_index,
                    len = unit.len(),
                    backlog = frames.len(),
                    "decoded unit"
                );
                if decoded % 300 == 0 {
                    tracing::info!(decoded, dropped = frames.dropped(), "decoder progress");
                }
                frames.recycle(unit);
            }
            tracing::info!(decoded, "decoder stopped");
        })
}

async fn next_command(launcher: &mut Option<mpsc::Receiver<LauncherCommand>>) -> Option<LauncherCommand> {
    match launcher {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("VRSTREAM_LOG_LEVEL"))
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env()?;
    tracing::info!(device = %config.device.device_name, bind = %config.bind_addr, "starting headset client");

    let store = SessionRecoveryStore::new();
    let frames = Arc::new(FrameQueue::new(config.frame_queue_size));
    let running = Arc::new(AtomicBool::new(true));
    let decoder = spawn_decoder(Arc::clone(&frames), Arc::clone(&running))?;

    let (launcher, mut commands) = if std::env::var("VRSTREAM_LAUNCHER").is_ok_and(|v| v == "1") {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), LAUNCHER_PORT);
        let (socket, rx) = LauncherSocket::listen(addr).await?;
        (Some(socket), Some(rx))
    } else {
        (None, None)
    };

    let mut manager = build_manager(&config, &frames, &store);
    manager.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            command = next_command(&mut commands) => {
                let Some(command) = command else {
                    commands = None;
                    continue;
                };
                match command.command.as_str() {
                    "stop" => manager.stop().await,
                    "start" if !manager.is_running() => {
                        manager = build_manager(&config, &frames, &store);
                        manager.start().await?;
                    }
                    "start" => tracing::debug!("already running"),
                    other => tracing::warn!(command = other, "unknown launcher command"),
                }
            }
        }
    }

    manager.stop().await;
    running.store(false, Ordering::Release);
    frames.flush();
    if decoder.join().is_err() {
        tracing::warn!("decoder thread panicked");
    }
    if let Some(launcher) = launcher {
        launcher.close().await;
    }
    tracing::info!(last_server = ?store.load(), "bye");
    Ok(())
}
