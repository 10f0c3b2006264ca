//! Centralized ZMQ socket setup for links.
//!
//! Every socket a channel opens goes through these helpers so they all share
//! the same options:
//!
//! - `LINGER` = 0, so closing a link never blocks on undelivered messages
//! - SUB sockets subscribe to everything

use crate::channel::ChannelError;
use bytes::Bytes;
use std::path::Path;
use tracing::{debug, warn};

pub use tmq::{Context as ZmqContext, Multipart};

/// Version of the linked libzmq, for startup logs.
pub fn libzmq_version() -> String {
    let (major, minor, patch) = zmq::version();
    format!("{}.{}.{}", major, minor, patch)
}

/// Make sure the directory holding `ipc://` endpoints exists.
pub fn ensure_socket_dir(dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Could not create socket directory {}: {}", dir.display(), e);
    }
}

/// Create a PUB socket connected to `endpoint`.
pub fn create_publisher_and_connect(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::publish::Publish, ChannelError> {
    let socket = tmq::publish(ctx)
        .set_linger(0)
        .connect(endpoint)
        .map_err(|source| zmq_error(endpoint, source))?;
    debug!("{}: publisher connected to {}", name, endpoint);
    Ok(socket)
}

/// Create a SUB socket bound to `endpoint`, subscribed to every message.
pub fn create_subscriber_and_bind(
    ctx: &ZmqContext,
    endpoint: &str,
    name: &str,
) -> Result<tmq::subscribe::Subscribe, ChannelError> {
    let socket = tmq::subscribe(ctx)
        .set_linger(0)
        .bind(endpoint)
        .map_err(|source| zmq_error(endpoint, source))?
        .subscribe(b"")
        .map_err(|source| zmq_error(endpoint, source))?;
    debug!("{}: subscriber bound to {}", name, endpoint);
    Ok(socket)
}

pub fn frames_to_multipart(frames: &[Bytes]) -> Multipart {
    frames
        .iter()
        .map(|f| f.to_vec())
        .collect::<Vec<_>>()
        .into()
}

pub fn multipart_to_frames(mp: Multipart) -> Vec<Bytes> {
    mp.into_iter().map(|m| Bytes::from(m.to_vec())).collect()
}

fn zmq_error(endpoint: &str, source: tmq::TmqError) -> ChannelError {
    ChannelError::Zmq {
        endpoint: endpoint.to_string(),
        source,
    }
}
