//! ZMQ channels over `ipc://` endpoints.
//!
//! Every process binds two SUB sockets under its own name, one for attribute
//! messages and one for buffers. Connecting to a peer opens a matching pair
//! of PUB sockets towards the peer's endpoints.
//!
//! The PUB sockets are owned by a single reactor task. The output only sends
//! commands to it, so `send_*` never waits on the network.

use super::{BufferTracker, ChannelConfig, ChannelError, ChannelInput, ChannelOutput, InputHandlers};
use crate::socket_config::{
    create_publisher_and_connect, create_subscriber_and_bind, ensure_socket_dir, frames_to_multipart,
    libzmq_version, multipart_to_frames, ZmqContext,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use splashproto::SerializedObject;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Command {
    Connect {
        peer: String,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Disconnect {
        peer: String,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Message(Bytes),
    Buffer(SerializedObject),
}

struct PeerSockets {
    messages: tmq::publish::Publish,
    buffers: tmq::publish::Publish,
}

/// Sending half: a handle to the reactor task.
pub struct ZmqOutput {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    tracker: BufferTracker,
}

impl ZmqOutput {
    /// Start the reactor for an output sending as `name`.
    pub fn new(config: &ChannelConfig, name: &str) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let tracker = BufferTracker::new();
        let reactor = Reactor {
            name: name.to_string(),
            config: config.clone(),
            context: ZmqContext::new(),
            peers: BTreeMap::new(),
            tracker: tracker.clone(),
        };
        tokio::spawn(reactor.run(rx));
        debug!("{}: ZMQ output started (libzmq {})", name, libzmq_version());

        Self {
            name: name.to_string(),
            commands,
            tracker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), ChannelError>>) -> Command,
    ) -> Result<(), ChannelError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)?
    }
}

#[async_trait]
impl ChannelOutput for ZmqOutput {
    async fn connect_to(&self, peer: &str) -> Result<(), ChannelError> {
        let peer = peer.to_string();
        self.request(|reply| Command::Connect { peer, reply }).await
    }

    async fn disconnect_from(&self, peer: &str) -> Result<(), ChannelError> {
        let peer = peer.to_string();
        self.request(|reply| Command::Disconnect { peer, reply }).await
    }

    fn send_message(&self, message: Bytes) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Message(message))
            .map_err(|_| ChannelError::Closed)
    }

    fn send_buffer(&self, buffer: SerializedObject) -> Result<(), ChannelError> {
        self.tracker.start();
        if self.commands.send(Command::Buffer(buffer)).is_err() {
            self.tracker.finish();
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    async fn wait_for_buffer_sending(&self, max_wait: Duration) -> bool {
        self.tracker.wait_idle(max_wait).await
    }
}

struct Reactor {
    name: String,
    config: ChannelConfig,
    context: ZmqContext,
    peers: BTreeMap<String, PeerSockets>,
    tracker: BufferTracker,
}

impl Reactor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Connect { peer, reply } => {
                    let _ = reply.send(self.connect(&peer));
                }
                Command::Disconnect { peer, reply } => {
                    if self.peers.remove(&peer).is_some() {
                        debug!("{}: disconnected from {}", self.name, peer);
                    }
                    let _ = reply.send(Ok(()));
                }
                Command::Message(bytes) => {
                    let frames = [bytes];
                    for (peer, sockets) in self.peers.iter_mut() {
                        if let Err(e) = sockets.messages.send(frames_to_multipart(&frames)).await {
                            warn!("{}: failed to send message to {}: {}", self.name, peer, e);
                        }
                    }
                }
                Command::Buffer(buffer) => {
                    let frames = [buffer.into_bytes()];
                    for (peer, sockets) in self.peers.iter_mut() {
                        if let Err(e) = sockets.buffers.send(frames_to_multipart(&frames)).await {
                            warn!("{}: failed to send buffer to {}: {}", self.name, peer, e);
                        }
                    }
                    self.tracker.finish();
                }
            }
        }
        debug!("{}: ZMQ output stopped", self.name);
    }

    fn connect(&mut self, peer: &str) -> Result<(), ChannelError> {
        if self.peers.contains_key(peer) {
            return Ok(());
        }
        let messages = create_publisher_and_connect(
            &self.context,
            &self.config.message_endpoint(peer),
            &format!("{}->{} messages", self.name, peer),
        )?;
        let buffers = create_publisher_and_connect(
            &self.context,
            &self.config.buffer_endpoint(peer),
            &format!("{}->{} buffers", self.name, peer),
        )?;
        self.peers
            .insert(peer.to_string(), PeerSockets { messages, buffers });
        info!("{}: connected to {}", self.name, peer);
        Ok(())
    }
}

/// Receiving half: the two bound SUB sockets and their task.
pub struct ZmqInput {
    name: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ZmqInput {
    /// Bind the endpoints for `name` and start dispatching to `handlers`.
    pub fn bind(config: &ChannelConfig, name: &str, handlers: InputHandlers) -> Result<Self, ChannelError> {
        ensure_socket_dir(&config.socket_dir);
        let context = ZmqContext::new();
        let mut messages = create_subscriber_and_bind(
            &context,
            &config.message_endpoint(name),
            &format!("{} messages", name),
        )?;
        let mut buffers = create_subscriber_and_bind(
            &context,
            &config.buffer_endpoint(name),
            &format!("{} buffers", name),
        )?;
        info!("{}: listening on {}", name, config.message_endpoint(name));

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    Some(result) = messages.next() => match result {
                        Ok(mp) => {
                            for frame in multipart_to_frames(mp) {
                                (handlers.on_message)(frame);
                            }
                        }
                        Err(e) => warn!("{}: message receive failed: {}", task_name, e),
                    },
                    Some(result) = buffers.next() => match result {
                        Ok(mp) => {
                            for frame in multipart_to_frames(mp) {
                                (handlers.on_buffer)(SerializedObject::from_bytes(frame));
                            }
                        }
                        Err(e) => warn!("{}: buffer receive failed: {}", task_name, e),
                    },
                    else => break,
                }
            }
            debug!("{}: ZMQ input stopped", task_name);
        });

        Ok(Self {
            name: name.to_string(),
            token,
            task,
        })
    }
}

impl ChannelInput for ZmqInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ZmqInput {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
