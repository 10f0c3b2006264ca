//! Tree synchronisation over WebSockets.
//!
//! Same protocol as the TCP server: every binary frame holds one complete
//! message. Text frames are ignored.

use crate::socket::SyncState;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use splashproto::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct WebsocketServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebsocketServer {
    pub async fn bind(addr: SocketAddr, state: Arc<SyncState>) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket tree server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let shutdown_srv = shutdown.clone();
        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            shutdown_srv.cancelled().await;
            debug!("WebSocket server shutdown signal received");
        });
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("WebSocket server shutdown with error: {:?}", e);
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WebsocketServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn router(state: Arc<SyncState>) -> Router {
    Router::new().route("/", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<Arc<SyncState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<SyncState>) {
    let id = state.open();
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(frame)) = receiver.next().await {
        let data = match frame {
            WsMessage::Binary(data) => data,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let message = match Message::from_frame(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping WebSocket client {}: {}", id, e);
                break;
            }
        };
        let Some(reply) = state.handle(id, message) else {
            continue;
        };
        let frame = match reply.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Could not encode reply for {}: {}", id, e);
                continue;
            }
        };
        if sender.send(WsMessage::Binary(frame)).await.is_err() {
            break;
        }
    }

    state.on_close(id);
    debug!("WebSocket client {} disconnected", id);
}
