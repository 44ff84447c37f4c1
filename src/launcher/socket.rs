//! Local TCP command socket for the companion launcher.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::codec::{CommandReader, LauncherCommand, LauncherError};

/// Capacity of the incoming command channel.
const COMMAND_CHANNEL_SIZE: usize = 32;

/// Read chunk size for the companion stream.
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug)]
struct Shared {
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    next_request_id: AtomicU32,
}

/// Listener accepting a single companion launcher connection at a time.
///
/// Commands received from the companion are forwarded on the channel
/// returned by [`LauncherSocket::listen`]. Connection attempts while a
/// companion is attached are dropped.
#[derive(Debug)]
pub struct LauncherSocket {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl LauncherSocket {
    /// Bind to `addr` and start accepting.
    pub async fn listen(
        addr: SocketAddr,
    ) -> Result<(Self, mpsc::Receiver<LauncherCommand>), LauncherError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            next_request_id: AtomicU32::new(1),
        });

        tracing::info!(%local_addr, "launcher socket listening");
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            commands_tx,
            shutdown_rx,
        ));

        Ok((
            Self {
                local_addr,
                shared,
                shutdown,
                accept_task,
            },
            commands_rx,
        ))
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if a companion is attached.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Send `command` to the companion, returning its request id.
    pub async fn send_command(&self, command: &str) -> Result<u32, LauncherError> {
        let mut writer = self.shared.writer.lock().await;
        let stream = writer.as_mut().ok_or(LauncherError::NotConnected)?;

        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = LauncherCommand::new(request_id, command).encode()?;
        stream.write_all(&frame).await?;
        tracing::debug!(request_id, command, "sent launcher command");
        Ok(request_id)
    }

    /// Stop listening and drop the companion connection.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept_task.await {
            tracing::warn!(error = %e, "launcher accept task failed");
        }
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.connected.store(false, Ordering::Release);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    commands: mpsc::Sender<LauncherCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader_task: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "launcher accept failed");
                        continue;
                    }
                };
                if shared.connected.load(Ordering::Acquire) {
                    tracing::info!(%peer, "ignoring launcher connection while connected");
                    drop(stream);
                    continue;
                }
                tracing::info!(%peer, "launcher connected");
                reader_task = Some(attach(stream, &shared, commands.clone(), shutdown.clone()).await);
            }
        }
    }

    if let Some(task) = reader_task {
        let _ = task.await;
    }
}

async fn attach(
    stream: TcpStream,
    shared: &Arc<Shared>,
    commands: mpsc::Sender<LauncherCommand>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let (read_half, write_half) = stream.into_split();
    *shared.writer.lock().await = Some(write_half);
    shared.connected.store(true, Ordering::Release);

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut read_half = read_half;
        let mut shutdown = shutdown;
        let mut reader = CommandReader::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        'read: loop {
            let n = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("launcher disconnected");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "launcher read failed");
                        break;
                    }
                },
            };

            match reader.push(&buf[..n]) {
                Ok(received) => {
                    for command in received {
                        tracing::debug!(request_id = command.request_id, command = %command.command, "launcher command");
                        if commands.send(command).await.is_err() {
                            break 'read;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "closing launcher connection");
                    break;
                }
            }
        }

        shared.writer.lock().await.take();
        shared.connected.store(false, Ordering::Release);
    })
}
