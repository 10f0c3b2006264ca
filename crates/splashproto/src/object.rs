//! Link payloads: attribute messages and serialized buffer objects.

use crate::serial::{self, Reader, Serial, SerialError};
use crate::value::Values;
use bytes::{Bytes, BytesMut};

/// Name carried by buffers that hold tree seeds instead of object data.
pub const TREE_BUFFER_NAME: &str = "_tree";

/// An attribute set travelling between processes.
///
/// Encoded as `serialize(object) ++ serialize(attribute) ++ serialize(values)`
/// with no outer envelope; the channel frames the whole message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    pub object: String,
    pub attribute: String,
    pub values: Values,
}

impl AttributeMessage {
    pub fn new(object: impl Into<String>, attribute: impl Into<String>, values: Values) -> Self {
        Self {
            object: object.into(),
            attribute: attribute.into(),
            values,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        serial::to_bytes(self)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, SerialError> {
        serial::deserialize(buf, 0)
    }
}

impl Serial for AttributeMessage {
    fn serialized_size(&self) -> usize {
        self.object.serialized_size()
            + self.attribute.serialized_size()
            + self.values.serialized_size()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        self.object.serialize_into(buf);
        self.attribute.serialize_into(buf);
        self.values.serialize_into(buf);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        Ok(Self {
            object: String::deserialize_from(reader)?,
            attribute: String::deserialize_from(reader)?,
            values: Values::deserialize_from(reader)?,
        })
    }
}

/// Raw bytes of a serialized buffer object (image, mesh, seed list...).
///
/// The first serialized field is always the name of the object the data
/// belongs to, so the receiver can route it without knowing the format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SerializedObject {
    data: Bytes,
}

impl SerializedObject {
    /// Prefix `payload` with the serialized object name.
    pub fn new(name: &str, payload: &[u8]) -> Self {
        let name = name.to_string();
        let mut buf = BytesMut::with_capacity(name.serialized_size() + payload.len());
        serial::serialize(&name, &mut buf);
        buf.extend_from_slice(payload);
        Self { data: buf.freeze() }
    }

    /// Wrap bytes that already start with an object name.
    pub fn from_bytes(data: Bytes) -> Self {
        Self { data }
    }

    /// Name of the originating object.
    pub fn name(&self) -> Result<String, SerialError> {
        serial::deserialize(&self.data, 0)
    }

    /// Everything after the name.
    pub fn payload(&self) -> Result<Bytes, SerialError> {
        let name: String = self.name()?;
        Ok(self.data.slice(name.serialized_size()..))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
