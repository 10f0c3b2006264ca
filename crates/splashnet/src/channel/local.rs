//! In-process channels.
//!
//! A [`LocalHub`] plays the part of the socket directory: inputs register
//! under their name, outputs look peers up there. Each input reads a single
//! unbounded stream, so messages and buffers from one sender arrive in the
//! order they were sent.

use super::{BufferTracker, ChannelError, ChannelInput, ChannelOutput, InputHandlers};
use async_trait::async_trait;
use bytes::Bytes;
use splashproto::SerializedObject;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One unit of traffic between local peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Bytes),
    Buffer(SerializedObject),
}

/// Marks a buffer as delivered when the receiving task is done with it.
struct Receipt(BufferTracker);

impl Drop for Receipt {
    fn drop(&mut self) {
        self.0.finish();
    }
}

struct Envelope {
    packet: Packet,
    _receipt: Option<Receipt>,
}

type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>>;

/// Name-keyed registry of local inputs.
#[derive(Clone, Default)]
pub struct LocalHub {
    inputs: Registry,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input called `name` and start its receive task.
    pub fn input(&self, name: &str, handlers: InputHandlers) -> Result<LocalInput, ChannelError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        {
            let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
            if inputs.get(name).is_some_and(|existing| !existing.is_closed()) {
                return Err(ChannelError::AlreadyBound(name.to_string()));
            }
            inputs.insert(name.to_string(), tx);
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    envelope = rx.recv() => match envelope {
                        Some(envelope) => match envelope.packet {
                            Packet::Message(bytes) => (handlers.on_message)(bytes),
                            Packet::Buffer(buffer) => (handlers.on_buffer)(buffer),
                        },
                        None => break,
                    },
                }
            }
            debug!("Local input {} stopped", task_name);
        });

        Ok(LocalInput {
            name: name.to_string(),
            inputs: self.inputs.clone(),
            token,
            task,
        })
    }

    /// An output sending as `name`.
    pub fn output(&self, name: &str) -> LocalOutput {
        LocalOutput {
            name: name.to_string(),
            inputs: self.inputs.clone(),
            peers: Mutex::new(BTreeMap::new()),
            tracker: BufferTracker::new(),
        }
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

pub struct LocalInput {
    name: String,
    inputs: Registry,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelInput for LocalInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LocalInput {
    fn drop(&mut self) {
        self.token.cancel();
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

pub struct LocalOutput {
    name: String,
    inputs: Registry,
    peers: Mutex<BTreeMap<String, mpsc::UnboundedSender<Envelope>>>,
    tracker: BufferTracker,
}

impl LocalOutput {
    /// Shared in-flight counter, for callers that want to watch it.
    pub fn tracker(&self) -> &BufferTracker {
        &self.tracker
    }

    fn send(&self, packet: Packet, tracked: bool) -> Result<(), ChannelError> {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut closed = true;
        for (peer, tx) in peers.iter() {
            let receipt = tracked.then(|| {
                self.tracker.start();
                Receipt(self.tracker.clone())
            });
            let envelope = Envelope {
                packet: packet.clone(),
                _receipt: receipt,
            };
            // A failed send drops the envelope, and with it the receipt.
            match tx.send(envelope) {
                Ok(()) => closed = false,
                Err(_) => warn!("{}: peer {} is gone", self.name, peer),
            }
        }
        if closed && !peers.is_empty() {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelOutput for LocalOutput {
    async fn connect_to(&self, peer: &str) -> Result<(), ChannelError> {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if peers.contains_key(peer) {
            return Ok(());
        }
        let tx = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownPeer(peer.to_string()))?;
        peers.insert(peer.to_string(), tx);
        debug!("{} connected to local peer {}", self.name, peer);
        Ok(())
    }

    async fn disconnect_from(&self, peer: &str) -> Result<(), ChannelError> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        Ok(())
    }

    fn send_message(&self, message: Bytes) -> Result<(), ChannelError> {
        self.send(Packet::Message(message), false)
    }

    fn send_buffer(&self, buffer: SerializedObject) -> Result<(), ChannelError> {
        self.send(Packet::Buffer(buffer), true)
    }

    async fn wait_for_buffer_sending(&self, max_wait: Duration) -> bool {
        self.tracker.wait_idle(max_wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recording() -> (InputHandlers, Arc<StdMutex<Vec<Packet>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let messages = seen.clone();
        let buffers = seen.clone();
        let handlers = InputHandlers {
            on_message: Arc::new(move |bytes| messages.lock().unwrap().push(Packet::Message(bytes))),
            on_buffer: Arc::new(move |buffer| buffers.lock().unwrap().push(Packet::Buffer(buffer))),
        };
        (handlers, seen)
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let hub = LocalHub::new();
        let output = hub.output("world");
        assert!(matches!(
            output.connect_to("nobody").await,
            Err(ChannelError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn names_are_unique_while_bound() {
        let hub = LocalHub::new();
        let (handlers, _) = recording();
        let input = hub.input("scene", handlers.clone()).unwrap();
        assert!(matches!(
            hub.input("scene", handlers.clone()),
            Err(ChannelError::AlreadyBound(_))
        ));

        drop(input);
        assert!(!hub.has_input("scene"));
        assert!(hub.input("scene", handlers).is_ok());
    }

    #[tokio::test]
    async fn packets_keep_their_order() {
        let hub = LocalHub::new();
        let (handlers, seen) = recording();
        let _input = hub.input("scene", handlers).unwrap();

        let output = hub.output("world");
        output.connect_to("scene").await.unwrap();
        output.connect_to("scene").await.unwrap();

        output.send_message(Bytes::from_static(b"one")).unwrap();
        output.send_buffer(SerializedObject::new("image", b"two")).unwrap();
        output.send_message(Bytes::from_static(b"three")).unwrap();
        assert!(output.wait_for_buffer_sending(Duration::from_secs(1)).await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                Packet::Message(Bytes::from_static(b"one")),
                Packet::Buffer(SerializedObject::new("image", b"two")),
                Packet::Message(Bytes::from_static(b"three")),
            ]
        );
    }

    #[tokio::test]
    async fn sending_without_peers_is_fine() {
        let hub = LocalHub::new();
        let output = hub.output("world");
        assert!(output.send_message(Bytes::from_static(b"x")).is_ok());
        assert!(output.wait_for_buffer_sending(Duration::from_millis(1)).await);
    }
}
