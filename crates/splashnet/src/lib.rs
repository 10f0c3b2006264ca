//! Networking for Splash processes.
//!
//! - [`link`]: attribute messages and buffers between root objects, over
//!   [`channel`]s (ZMQ `ipc://` or in-process)
//! - [`socket`]: tree synchronisation with remote clients over TCP
//! - [`websocket`]: the same protocol for browser clients
//! - [`socket_config`]: shared ZMQ socket setup

pub mod channel;
pub mod link;
pub mod socket;
pub mod socket_config;
pub mod websocket;

pub use channel::{ChannelConfig, ChannelError, ChannelInput, ChannelOutput, InputHandlers, LocalHub};
pub use link::Link;
pub use socket::{ConnectionState, SocketClient, SocketError, SocketServer, SyncState};
pub use websocket::WebsocketServer;
