//! Transports under a [`Link`](crate::link::Link).
//!
//! A channel has two halves. The output sends serialized attribute messages
//! and buffers to every connected peer; the input owns a receive task that
//! hands what arrives to the link's handlers. Two implementations exist:
//!
//! - [`zmq`]: PUB/SUB sockets over `ipc://` endpoints, one pair per peer
//! - [`local`]: tokio channels inside one process, for tests and `--local`

pub mod local;
pub mod tracker;
pub mod zmq;

pub use local::{LocalHub, LocalInput, LocalOutput, Packet};
pub use tracker::BufferTracker;
pub use zmq::{ZmqInput, ZmqOutput};

use async_trait::async_trait;
use bytes::Bytes;
use splashproto::SerializedObject;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("ZMQ error on {endpoint}: {source}")]
    Zmq {
        endpoint: String,
        source: tmq::TmqError,
    },
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Channel closed")]
    Closed,
    #[error("An input named {0} is already bound")]
    AlreadyBound(String),
}

/// Called with the raw bytes of an attribute message.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Called with every buffer received.
pub type BufferHandler = Arc<dyn Fn(SerializedObject) + Send + Sync>;

/// What an input does with incoming traffic.
#[derive(Clone)]
pub struct InputHandlers {
    pub on_message: MessageHandler,
    pub on_buffer: BufferHandler,
}

/// Sending half of a channel.
///
/// Sends only enqueue; delivery happens on the transport's own task.
#[async_trait]
pub trait ChannelOutput: Send + Sync {
    async fn connect_to(&self, peer: &str) -> Result<(), ChannelError>;

    async fn disconnect_from(&self, peer: &str) -> Result<(), ChannelError>;

    fn send_message(&self, message: Bytes) -> Result<(), ChannelError>;

    fn send_buffer(&self, buffer: SerializedObject) -> Result<(), ChannelError>;

    /// True once every buffer handed over so far has reached the transport,
    /// false if that takes longer than `max_wait`.
    async fn wait_for_buffer_sending(&self, max_wait: Duration) -> bool;
}

/// Receiving half of a channel. Dropping it stops the receive task.
pub trait ChannelInput: Send + Sync {
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;
}

/// Where ZMQ channels put their sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub socket_dir: PathBuf,
}

impl ChannelConfig {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn from_config(config: &splashconf::SplashConfig) -> Self {
        Self::new(config.infra.paths.socket_dir.clone())
    }

    /// Endpoint receiving attribute messages for `name`.
    pub fn message_endpoint(&self, name: &str) -> String {
        format!("ipc://{}/splash_msg_{}", self.socket_dir.display(), name)
    }

    /// Endpoint receiving buffers for `name`.
    pub fn buffer_endpoint(&self, name: &str) -> String {
        format!("ipc://{}/splash_buf_{}", self.socket_dir.display(), name)
    }
}
