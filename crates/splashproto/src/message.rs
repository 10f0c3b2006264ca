//! Socket protocol messages and their stream framing.
//!
//! ## Wire Format
//!
//! ```text
//! [id: u32 BE][type: u32 BE][payload length: u32 BE][payload bytes]
//! ```
//!
//! A reply carries the id of the request it answers. Payloads of `SEND_TREE`
//! and `SEND_UPDATES` are a serialized `Vec<Seed>`; `ASK_*` payloads are empty.

use crate::seed::Seed;
use crate::serial::{self, Reader, Serial, SerialError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed header preceding every payload.
pub const HEADER_LEN: usize = 12;

/// Largest payload a peer may announce. Guards against garbage length fields.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// Socket message identifier, allocated by the sender.
pub type MessageId = u32;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client requests a full copy of the tree.
    AskTree = 1,
    /// Server answers with the seeds rebuilding its whole tree.
    SendTree = 2,
    /// Client requests the updates accumulated since its last request.
    AskUpdates = 3,
    /// Seeds flowing either way: server replies, or client pushes its own.
    SendUpdates = 4,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Result<Self, SerialError> {
        match value {
            1 => Ok(MessageType::AskTree),
            2 => Ok(MessageType::SendTree),
            3 => Ok(MessageType::AskUpdates),
            4 => Ok(MessageType::SendUpdates),
            other => Err(SerialError::InvalidMessageType(other)),
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl Serial for MessageType {
    fn serialized_size(&self) -> usize {
        4
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.to_u32());
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        MessageType::from_u32(reader.read_u32()?)
    }
}

/// Errors while framing or unframing socket messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("Payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("Invalid payload: {0}")]
    Payload(#[from] SerialError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One socket protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: MessageId, kind: MessageType, payload: Bytes) -> Self {
        Self { id, kind, payload }
    }

    pub fn ask_tree(id: MessageId) -> Self {
        Self::new(id, MessageType::AskTree, Bytes::new())
    }

    pub fn ask_updates(id: MessageId) -> Self {
        Self::new(id, MessageType::AskUpdates, Bytes::new())
    }

    /// A `SEND_TREE` or `SEND_UPDATES` message carrying `seeds`.
    pub fn with_seeds(id: MessageId, kind: MessageType, seeds: &[Seed]) -> Self {
        Self::new(id, kind, serial::to_bytes(&seeds.to_vec()))
    }

    /// Decode the payload as a seed list.
    pub fn seeds(&self) -> Result<Vec<Seed>, SerialError> {
        serial::deserialize(&self.payload, 0)
    }

    /// Append the framed message to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u32(self.id);
        dst.put_u32(self.kind.to_u32());
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        Ok(())
    }

    pub fn to_frame(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Take one complete message off the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `src` is left untouched
    /// in that case.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let id = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let kind = MessageType::from_u32(u32::from_be_bytes([src[4], src[5], src[6], src[7]]))?;
        let len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Message { id, kind, payload }))
    }

    /// Parse a buffer holding exactly one framed message (e.g. a WebSocket frame).
    pub fn from_frame(frame: &[u8]) -> Result<Self, FrameError> {
        let mut buf = BytesMut::from(frame);
        match Self::decode(&mut buf)? {
            Some(message) if buf.is_empty() => Ok(message),
            Some(message) => Err(FrameError::FrameTooShort {
                expected: HEADER_LEN + message.payload.len(),
                actual: frame.len(),
            }),
            None => {
                let expected = if frame.len() < HEADER_LEN {
                    HEADER_LEN
                } else {
                    HEADER_LEN
                        + u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]) as usize
                };
                Err(FrameError::FrameTooShort {
                    expected,
                    actual: frame.len(),
                })
            }
        }
    }
}
