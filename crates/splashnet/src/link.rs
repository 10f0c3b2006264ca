//! Link - attribute messages and buffers between root objects.
//!
//! A link binds a root object to a channel. Outgoing, it serializes
//! `(object, attribute, values)` triples and buffers; incoming, it decodes them
//! and hands them to the root object, which queues the work for its own loop.
//!
//! ```text
//!  RootObject A                                    RootObject B
//!      │ send_message / send_buffer                     ▲
//!      ▼                                                │ set / set_from_serialized_object
//!  ChannelOutput ──── zmq ipc or local hub ────► ChannelInput
//! ```

use crate::channel::{
    ChannelConfig, ChannelError, ChannelInput, ChannelOutput, InputHandlers, LocalHub, ZmqInput, ZmqOutput,
};
use bytes::Bytes;
use splashcore::{BufferObject, RootObject};
use splashproto::{to_bytes, AttributeMessage, Seed, SerializedObject, Values, TREE_BUFFER_NAME};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub struct Link {
    name: String,
    output: Box<dyn ChannelOutput>,
    _input: Box<dyn ChannelInput>,
    peers: Mutex<BTreeSet<String>>,
}

impl Link {
    /// A link over ZMQ `ipc://` sockets in `config.socket_dir`.
    pub fn zmq(root: Arc<RootObject>, name: &str, config: &ChannelConfig) -> Result<Self, ChannelError> {
        let input = ZmqInput::bind(config, name, handlers(root))?;
        let output = ZmqOutput::new(config, name);
        Ok(Self::with_channels(name, Box::new(output), Box::new(input)))
    }

    /// A link over an in-process hub.
    pub fn local(root: Arc<RootObject>, name: &str, hub: &LocalHub) -> Result<Self, ChannelError> {
        let input = hub.input(name, handlers(root))?;
        let output = hub.output(name);
        Ok(Self::with_channels(name, Box::new(output), Box::new(input)))
    }

    /// A link over any pair of channels. The input must already dispatch to
    /// [`handlers`] for the link's root.
    pub fn with_channels(name: &str, output: Box<dyn ChannelOutput>, input: Box<dyn ChannelInput>) -> Self {
        Self {
            name: name.to_string(),
            output,
            _input: input,
            peers: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Start sending to `peer`. Connecting twice is a no-op.
    pub async fn connect_to(&self, peer: &str) -> Result<(), ChannelError> {
        if self.is_connected(peer) {
            return Ok(());
        }
        self.output.connect_to(peer).await?;
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.to_string());
        Ok(())
    }

    pub async fn disconnect_from(&self, peer: &str) -> Result<(), ChannelError> {
        if !self.is_connected(peer) {
            return Ok(());
        }
        self.output.disconnect_from(peer).await?;
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        Ok(())
    }

    fn is_connected(&self, peer: &str) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
    }

    /// Queue an attribute message for every peer. False if the channel is closed.
    pub fn send_message(&self, object: &str, attribute: &str, values: Values) -> bool {
        let message = AttributeMessage::new(object, attribute, values);
        match self.output.send_message(message.to_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: could not send {}.{}: {}", self.name, object, attribute, e);
                false
            }
        }
    }

    pub fn send_buffer(&self, buffer: SerializedObject) -> bool {
        match self.output.send_buffer(buffer) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: could not send buffer: {}", self.name, e);
                false
            }
        }
    }

    /// Serialize `object` under `name` and send it.
    pub fn send_buffer_object(&self, object: &dyn BufferObject, name: &str) -> bool {
        self.send_buffer(SerializedObject::new(name, &object.serialize()))
    }

    /// Send tree seeds as the `_tree` buffer.
    pub fn send_tree_seeds(&self, seeds: &[Seed]) -> bool {
        if seeds.is_empty() {
            return true;
        }
        self.send_buffer(SerializedObject::new(TREE_BUFFER_NAME, &to_bytes(&seeds.to_vec())))
    }

    /// Wait until every buffer handed over so far has been sent.
    pub async fn wait_for_buffer_sending(&self, max_wait: Duration) -> bool {
        self.output.wait_for_buffer_sending(max_wait).await
    }
}

/// Input handlers delivering into `root`.
pub fn handlers(root: Arc<RootObject>) -> InputHandlers {
    let messages = root.clone();
    InputHandlers {
        on_message: Arc::new(move |bytes: Bytes| handle_message(&messages, &bytes)),
        on_buffer: Arc::new(move |buffer: SerializedObject| handle_buffer(&root, buffer)),
    }
}

fn handle_message(root: &RootObject, bytes: &[u8]) {
    let message = match AttributeMessage::from_bytes(bytes) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed attribute message: {}", e);
            return;
        }
    };
    debug!("Received {}.{}", message.object, message.attribute);
    if let Err(e) = root.set(&message.object, &message.attribute, message.values, true) {
        warn!("Could not set {}.{}: {}", message.object, message.attribute, e);
    }
}

fn handle_buffer(root: &RootObject, buffer: SerializedObject) {
    match buffer.name() {
        Ok(name) => {
            root.set_from_serialized_object(&name, buffer);
        }
        Err(e) => warn!("Dropping buffer without a name: {}", e),
    }
}
