//! SSH agent proxy
//!
//! Clients point `SSH_AUTH_SOCK` at the proxy socket. Every connection is
//! relayed to the real agent; a sign request on the way up asks the GPG
//! trigger to check, since gpg-agent serves SSH keys from the same card.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::trigger::CheckRequester;
use super::DetectorError;
use crate::coordinator::ShutdownListener;
use crate::socket::{bind_unix_socket, remove_socket_file};

/// Agent protocol message type of a signature request
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;

/// Largest agent message relayed
pub const MAX_AGENT_MESSAGE: usize = 256 * 1024;

/// Whether an agent message body is a sign request
pub fn is_sign_request(message: &[u8]) -> bool {
    message.first() == Some(&SSH_AGENTC_SIGN_REQUEST)
}

fn agent_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_AGENT_MESSAGE)
        .new_codec()
}

/// Relays agent connections and reports sign requests
pub struct SshWatcher {
    proxy_path: PathBuf,
    upstream_path: PathBuf,
    requester: CheckRequester,
}

impl SshWatcher {
    pub fn new(proxy_path: PathBuf, upstream_path: PathBuf, requester: CheckRequester) -> Self {
        Self {
            proxy_path,
            upstream_path,
            requester,
        }
    }

    /// Relay connections until shutdown is requested
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let listener = match bind_unix_socket(&self.proxy_path) {
            Ok(listener) => listener,
            Err(e) => {
                // SSH detection is optional; keep the handle so shutdown stays orderly
                tracing::warn!(
                    "SSH detection disabled, cannot bind {}: {}",
                    self.proxy_path.display(),
                    e
                );
                let ack = shutdown.requested().await;
                drop(self);
                ack.acknowledge();
                return;
            }
        };
        tracing::info!(
            "Proxying SSH agent {} on {}",
            self.upstream_path.display(),
            self.proxy_path.display()
        );

        let cancel = CancellationToken::new();
        let connections = TaskTracker::new();

        let ack = loop {
            tokio::select! {
                ack = shutdown.requested() => break ack,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let upstream = self.upstream_path.clone();
                        let requester = self.requester.clone();
                        let cancel = cancel.child_token();
                        connections.spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                result = relay(stream, &upstream, requester) => {
                                    if let Err(e) = result {
                                        tracing::debug!("SSH agent relay ended: {}", e);
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("Failed to accept SSH agent client: {}", e);
                    }
                },
            }
        };

        drop(listener);
        cancel.cancel();
        connections.close();
        connections.wait().await;

        // Relays are gone; dropping the last requester lets the trigger settle
        let Self {
            proxy_path,
            requester,
            ..
        } = self;
        drop(requester);

        if let Err(e) = remove_socket_file(&proxy_path) {
            tracing::warn!("Failed to remove socket {}: {}", proxy_path.display(), e);
        }
        tracing::debug!("SSH watcher stopped");
        ack.acknowledge();
    }
}

/// Relay one client to the upstream agent.
///
/// A client that half-closes still gets the agent's pending replies: the
/// close is passed on upstream and the relay ends once the agent closes.
async fn relay(
    client: UnixStream,
    upstream_path: &Path,
    requester: CheckRequester,
) -> Result<(), DetectorError> {
    let upstream = UnixStream::connect(upstream_path).await?;

    let (client_read, mut client_write) = client.into_split();
    let (mut upstream_read, upstream_write) = upstream.into_split();

    let mut requests = FramedRead::new(client_read, agent_codec());
    let mut forward = FramedWrite::new(upstream_write, agent_codec());

    let upward = async move {
        while let Some(frame) = requests.next().await {
            let frame: BytesMut = frame?;
            if is_sign_request(&frame) {
                tracing::debug!("SSH sign request");
                requester.request();
            }
            forward.send(frame.freeze()).await?;
        }
        forward.into_inner().shutdown().await?;
        Ok::<_, DetectorError>(())
    };

    let downward = async move {
        tokio::io::copy(&mut upstream_read, &mut client_write).await?;
        client_write.shutdown().await?;
        Ok::<_, DetectorError>(())
    };
    tokio::pin!(downward);

    // The agent closing ends the conversation; the client closing only
    // ends the requests
    let client_done = tokio::select! {
        result = upward => {
            result?;
            true
        }
        result = &mut downward => {
            result?;
            false
        }
    };
    if client_done {
        downward.await?;
    }
    Ok(())
}
