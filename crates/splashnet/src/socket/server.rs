use super::{MessageCodec, SyncState};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// TCP server answering tree requests from [`SocketClient`](super::SocketClient)s.
pub struct SocketServer {
    local_addr: SocketAddr,
    state: Arc<SyncState>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SocketServer {
    /// Bind `addr` and start accepting connections.
    pub async fn bind(addr: SocketAddr, state: Arc<SyncState>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Tree server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, state.clone(), shutdown.clone()));

        Ok(Self {
            local_addr,
            state,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Stop accepting and close every connection.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Tree server task failed: {}", e);
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<SyncState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, state.clone(), shutdown.child_token()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }
    info!("Tree server stopped");
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<SyncState>, shutdown: CancellationToken) {
    let id = state.open();
    debug!("Client {} connected as {}", peer, id);
    let mut framed = Framed::new(stream, MessageCodec);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = framed.next() => match next {
                Some(Ok(message)) => {
                    let Some(reply) = state.handle(id, message) else {
                        continue;
                    };
                    if let Err(e) = framed.send(reply).await {
                        warn!("Could not reply to {}: {}", peer, e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Dropping client {}: {}", peer, e);
                    break;
                }
                None => break,
            },
        }
    }

    state.on_close(id);
    debug!("Client {} disconnected", peer);
}
