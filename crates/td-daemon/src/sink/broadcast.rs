//! Broadcast sink over a Unix socket
//!
//! Every client that connects becomes its own bounded hub sink and receives
//! one line per event published after it connected. Clients never send
//! anything; their read side is only watched for EOF.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use td_protocol::{TouchEventCodec, WireFormat};

use super::SinkError;
use crate::coordinator::ShutdownListener;
use crate::hub::{SinkCapacity, SinkReceiver, SinkRegistry};
use crate::socket::{bind_unix_socket, remove_socket_file};

/// A client that cannot take a line within this long is dropped
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket server streaming touch events to subscribers
pub struct BroadcastSink {
    path: PathBuf,
    listener: UnixListener,
    format: WireFormat,
    client_buffer: usize,
    registry: Arc<SinkRegistry>,
    next_client: AtomicU64,
}

impl BroadcastSink {
    /// Bind the broadcast socket; failure here is fatal for the daemon
    pub fn bind(
        path: &Path,
        format: WireFormat,
        client_buffer: usize,
        registry: Arc<SinkRegistry>,
    ) -> Result<Self, SinkError> {
        let listener = bind_unix_socket(path).map_err(|source| SinkError::Bind {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("Broadcasting touch events on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            format,
            client_buffer,
            registry,
            next_client: AtomicU64::new(1),
        })
    }

    /// Socket path clients connect to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept subscribers until shutdown is requested
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let cancel = CancellationToken::new();
        let clients = TaskTracker::new();

        let ack = loop {
            tokio::select! {
                ack = shutdown.requested() => break ack,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
                        // Registered before the task starts so nothing published
                        // after the accept is missed
                        let receiver = self.registry.register(
                            format!("socket-client-{id}"),
                            SinkCapacity::Bounded(self.client_buffer),
                        );
                        tracing::debug!("Subscriber {} connected", id);
                        clients.spawn(serve_client(
                            stream,
                            receiver,
                            TouchEventCodec::new(self.format),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        tracing::debug!("Failed to accept subscriber: {}", e);
                    }
                },
            }
        };

        let Self { path, listener, .. } = self;
        drop(listener);

        cancel.cancel();
        clients.close();
        clients.wait().await;

        if let Err(e) = remove_socket_file(&path) {
            tracing::warn!("Failed to remove socket {}: {}", path.display(), e);
        }
        tracing::debug!("Broadcast sink closed");
        ack.acknowledge();
    }
}

/// Forward events to one subscriber until it leaves, lags or shutdown
async fn serve_client(
    stream: UnixStream,
    mut receiver: SinkReceiver,
    codec: TouchEventCodec,
    cancel: CancellationToken,
) {
    let (mut reader, writer) = stream.into_split();
    let mut writer = FramedWrite::new(writer, codec);
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = receiver.recv() => {
                let Some(event) = event else {
                    tracing::debug!("{} dropped by hub", receiver.name());
                    break;
                };
                let sent = tokio::select! {
                    result = tokio::time::timeout(CLIENT_WRITE_TIMEOUT, writer.send(event)) => result,
                    _ = cancel.cancelled() => break,
                };
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!("{} write failed: {}", receiver.name(), e);
                        break;
                    }
                    Err(_) => {
                        tracing::debug!("{} write timed out", receiver.name());
                        break;
                    }
                }
            }
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => {
                    tracing::debug!("{} disconnected", receiver.name());
                    break;
                }
                Ok(_) => {}
            },
        }
    }
    // Dropping the receiver unregisters the client; dropping the halves
    // closes the connection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ExitCoordinator;
    use td_protocol::{TouchEvent, TouchSource};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn wait_for_clients(registry: &SinkRegistry, count: usize) {
        for _ in 0..100 {
            if registry.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} clients, have {}", count, registry.len());
    }

    #[tokio::test]
    async fn test_client_receives_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");
        let registry = Arc::new(SinkRegistry::new());
        let coordinator = ExitCoordinator::new();

        let sink = BroadcastSink::bind(&path, WireFormat::Text, 8, Arc::clone(&registry)).unwrap();
        let listener = coordinator.register("socket").await.unwrap();
        tokio::spawn(sink.run(listener));

        let client = UnixStream::connect(&path).await.unwrap();
        wait_for_clients(&registry, 1).await;

        registry.fan_out(TouchEvent::started(TouchSource::U2f));
        registry.fan_out(TouchEvent::stopped(TouchSource::U2f));

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "U2F 1");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "U2F 0");

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients_and_removes_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");
        let registry = Arc::new(SinkRegistry::new());
        let coordinator = ExitCoordinator::new();

        let sink = BroadcastSink::bind(&path, WireFormat::Json, 8, Arc::clone(&registry)).unwrap();
        let listener = coordinator.register("socket").await.unwrap();
        tokio::spawn(sink.run(listener));

        let client = UnixStream::connect(&path).await.unwrap();
        wait_for_clients(&registry, 1).await;

        let report = coordinator.shutdown().await;
        assert_eq!(report.acknowledged, 1);
        assert!(!path.exists());
        assert!(registry.is_empty());

        // The server side is closed, so the client reads EOF
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disconnected_client_unregisters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("td.socket");
        let registry = Arc::new(SinkRegistry::new());
        let coordinator = ExitCoordinator::new();

        let sink = BroadcastSink::bind(&path, WireFormat::Text, 8, Arc::clone(&registry)).unwrap();
        let listener = coordinator.register("socket").await.unwrap();
        tokio::spawn(sink.run(listener));

        let client = UnixStream::connect(&path).await.unwrap();
        wait_for_clients(&registry, 1).await;

        drop(client);
        wait_for_clients(&registry, 0).await;

        coordinator.shutdown().await;
    }
}
