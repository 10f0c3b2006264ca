//! TCP client side of tree synchronisation.

use super::{MessageCodec, SocketError};
use futures::{SinkExt, StreamExt};
use splashconf::SyncConfig;
use splashcore::Tree;
use splashproto::{IdAllocator, Message, MessageType, Seed};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Frames of another type tolerated while waiting for a reply.
const MAX_SKIPPED_REPLIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A request is waiting for its reply.
    Syncing,
    Idle,
}

/// Client pulling a tree from, and pushing updates to, a [`SocketServer`](super::SocketServer).
///
/// Any transport error closes the connection; reconnecting is up to the caller.
pub struct SocketClient {
    ids: IdAllocator,
    framed: Option<Framed<TcpStream, MessageCodec>>,
    state: ConnectionState,
    connect_timeout: Duration,
    receive_timeout: Duration,
}

impl Default for SocketClient {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SocketClient {
    pub fn new(connect_timeout: Duration, receive_timeout: Duration) -> Self {
        Self {
            ids: IdAllocator::new(),
            framed: None,
            state: ConnectionState::Disconnected,
            connect_timeout,
            receive_timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.receive_timeout_ms),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Connect to the first IPv4 address `host` resolves to.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), SocketError> {
        self.disconnect().await;
        self.state = ConnectionState::Connecting;

        let addr = match lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.find(SocketAddr::is_ipv4),
            Err(e) => return self.fail(e.into()),
        };
        let Some(addr) = addr else {
            return self.fail(SocketError::Resolve(host.to_string()));
        };

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(e.into()),
            Err(_) => return self.fail(SocketError::Timeout(self.connect_timeout)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        self.framed = Some(Framed::new(stream, MessageCodec));
        self.state = ConnectionState::Connected;
        info!("Connected to tree server at {}", addr);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = framed.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), SocketError> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(SocketError::NotConnected);
        };
        match framed.send(message.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e.into()),
        }
    }

    /// Wait for the next message. `None` waits forever.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<Message, SocketError> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(SocketError::NotConnected);
        };
        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
                Ok(next) => next,
                Err(_) => return self.fail(SocketError::Timeout(limit)),
            },
            None => framed.next().await,
        };
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => self.fail(e.into()),
            None => self.fail(SocketError::Closed),
        }
    }

    /// Ask for the whole tree and the seeds rebuilding it.
    pub async fn fetch_tree(&mut self) -> Result<Vec<Seed>, SocketError> {
        let id = self.ids.next_id();
        let reply = self.request(Message::ask_tree(id), MessageType::SendTree).await?;
        self.decode_seeds(&reply)
    }

    /// Ask for the seeds recorded for this connection since the last request.
    pub async fn fetch_updates(&mut self) -> Result<Vec<Seed>, SocketError> {
        let id = self.ids.next_id();
        let reply = self.request(Message::ask_updates(id), MessageType::SendUpdates).await?;
        self.decode_seeds(&reply)
    }

    /// Replace `tree` with the server's tree.
    pub async fn get_tree_from_server(&mut self, tree: &mut Tree) -> Result<(), SocketError> {
        let seeds = self.fetch_tree().await?;
        tree.cutdown();
        tree.add_seeds_to_queue(seeds);
        let report = tree.process_queue(false);
        debug!("Rebuilt tree from server: {:?}", report);
        Ok(())
    }

    /// Queue the server's pending updates on `tree`. They apply on the next
    /// `process_queue`.
    pub async fn get_tree_updates(&mut self, tree: &Tree) -> Result<(), SocketError> {
        let seeds = self.fetch_updates().await?;
        tree.add_seeds_to_queue(seeds);
        Ok(())
    }

    /// Send the seeds recorded locally since the last call.
    pub async fn send_updates_to_server(&mut self, tree: &mut Tree) -> Result<(), SocketError> {
        let seeds = tree.get_update_seed_list();
        self.send_seeds(&seeds).await
    }

    /// Send `seeds` as a `SEND_UPDATES` message. Nothing goes out for an empty list.
    pub async fn send_seeds(&mut self, seeds: &[Seed]) -> Result<(), SocketError> {
        if seeds.is_empty() {
            return Ok(());
        }
        let message = Message::with_seeds(self.ids.next_id(), MessageType::SendUpdates, seeds);
        self.send(&message).await
    }

    async fn request(&mut self, request: Message, expected: MessageType) -> Result<Message, SocketError> {
        self.send(&request).await?;
        self.state = ConnectionState::Syncing;

        for _ in 0..MAX_SKIPPED_REPLIES {
            let reply = self.receive(Some(self.receive_timeout)).await?;
            if reply.kind == expected {
                if reply.id != request.id {
                    debug!("Reply id {} does not match request {}", reply.id, request.id);
                }
                self.state = ConnectionState::Idle;
                return Ok(reply);
            }
            debug!("Skipping {:?} while waiting for {:?}", reply.kind, expected);
        }
        self.fail(SocketError::NoReply(expected))
    }

    fn decode_seeds(&mut self, reply: &Message) -> Result<Vec<Seed>, SocketError> {
        match reply.seeds() {
            Ok(seeds) => Ok(seeds),
            Err(e) => self.fail(e.into()),
        }
    }

    fn fail<T>(&mut self, error: SocketError) -> Result<T, SocketError> {
        warn!("Tree client error: {}", error);
        self.framed = None;
        self.state = ConnectionState::Disconnected;
        Err(error)
    }
}
