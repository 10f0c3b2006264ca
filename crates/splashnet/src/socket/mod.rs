//! Tree synchronisation over TCP and WebSockets.
//!
//! Both transports speak the same four messages, framed as
//! `[id:u32 BE][type:u32 BE][len:u32 BE][payload]`:
//!
//! | type           | direction        | payload                     |
//! |----------------|------------------|-----------------------------|
//! | `ASK_TREE`     | client → server  | empty                       |
//! | `SEND_TREE`    | server → client  | seeds rebuilding `/`        |
//! | `ASK_UPDATES`  | client → server  | empty                       |
//! | `SEND_UPDATES` | both             | seeds since the last request |
//!
//! A reply carries the id of the request it answers.

pub mod client;
pub mod codec;
pub mod server;
pub mod sync_state;

pub use client::{ConnectionState, SocketClient};
pub use codec::MessageCodec;
pub use server::SocketServer;
pub use sync_state::{ConnectionId, SyncState};

use splashproto::{FrameError, MessageType, SerialError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Invalid seed payload: {0}")]
    Payload(#[from] SerialError),
    #[error("No IPv4 address found for {0}")]
    Resolve(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Not connected")]
    NotConnected,
    #[error("No {0:?} reply from the server")]
    NoReply(MessageType),
}
