//! Graph objects and the buffer capability.

use crate::attribute::{Attribute, AttributeError};
use bytes::Bytes;
use splashproto::{SerializedObject, Values};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Objects whose state travels as a serialized buffer rather than attribute
/// messages (images, meshes, anything large).
pub trait BufferObject: Send {
    /// The object's payload, without the leading name field.
    fn serialize(&self) -> Bytes;

    /// Replace the object's state with `obj`. Returns false if the payload
    /// cannot be used.
    fn set_serialized_object(&mut self, obj: SerializedObject) -> bool;
}

/// A `BufferObject` that keeps the last payload it received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlainBuffer {
    data: Bytes,
    updates: u64,
}

impl PlainBuffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            updates: 0,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of payloads received through `set_serialized_object`.
    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

impl BufferObject for PlainBuffer {
    fn serialize(&self) -> Bytes {
        self.data.clone()
    }

    fn set_serialized_object(&mut self, obj: SerializedObject) -> bool {
        match obj.payload() {
            Ok(payload) => {
                self.data = payload;
                self.updates += 1;
                true
            }
            Err(e) => {
                warn!("Discarding malformed buffer: {}", e);
                false
            }
        }
    }
}

/// A named node of the object graph, owned by a `RootObject`.
pub struct GraphObject {
    name: String,
    kind: String,
    attributes: BTreeMap<String, Attribute>,
    buffer: Option<Box<dyn BufferObject>>,
}

impl GraphObject {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            attributes: BTreeMap::new(),
            buffer: None,
        }
    }

    /// Give this object the buffer capability.
    pub fn with_buffer(mut self, buffer: impl BufferObject + 'static) -> Self {
        self.buffer = Some(Box::new(buffer));
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.add_attribute(attribute);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Add or replace an attribute.
    pub fn add_attribute(&mut self, mut attribute: Attribute) {
        attribute.set_object_name(&self.name);
        self.attributes.insert(attribute.name().to_string(), attribute);
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    /// Set an attribute by name. `None` if the object has no such attribute.
    pub fn set_attribute(&mut self, name: &str, values: Values) -> Option<Result<(), AttributeError>> {
        self.attributes.get_mut(name).map(|attribute| attribute.set(values))
    }

    pub fn get_attribute(&self, name: &str) -> Option<Values> {
        self.attributes.get(name).map(Attribute::get)
    }

    pub fn as_buffer_object(&self) -> Option<&dyn BufferObject> {
        self.buffer.as_deref()
    }

    pub fn as_buffer_object_mut(&mut self) -> Option<&mut (dyn BufferObject + 'static)> {
        self.buffer.as_deref_mut()
    }

    /// The buffer state framed with this object's name, ready for a link.
    pub fn serialized_buffer(&self) -> Option<SerializedObject> {
        self.buffer
            .as_ref()
            .map(|buffer| SerializedObject::new(&self.name, &buffer.serialize()))
    }
}

impl fmt::Debug for GraphObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphObject")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .field("buffer", &self.buffer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splashproto::values;

    #[test]
    fn attributes_know_their_object() {
        let object = GraphObject::new("camera", "camera")
            .with_attribute(Attribute::new("size", values![640, 480]));
        assert_eq!(object.attribute("size").unwrap().object_name(), "camera");
        assert_eq!(object.get_attribute("size"), Some(values![640, 480]));
        assert!(object.get_attribute("missing").is_none());
    }

    #[test]
    fn set_attribute_reports_unknown_names() {
        let mut object = GraphObject::new("camera", "camera")
            .with_attribute(Attribute::new("size", values![640, 480]));
        assert!(object.set_attribute("missing", values![1]).is_none());
        assert_eq!(object.set_attribute("size", values![800, 600]), Some(Ok(())));
        assert_eq!(object.get_attribute("size"), Some(values![800, 600]));
    }

    #[test]
    fn buffer_capability_is_optional() {
        let plain = GraphObject::new("camera", "camera");
        assert!(plain.as_buffer_object().is_none());
        assert!(plain.serialized_buffer().is_none());

        let mut image = GraphObject::new("image", "image").with_buffer(PlainBuffer::new(vec![1u8, 2, 3]));
        let framed = image.serialized_buffer().unwrap();
        assert_eq!(framed.name().unwrap(), "image");
        assert_eq!(framed.payload().unwrap(), Bytes::from_static(&[1, 2, 3]));

        let update = SerializedObject::new("image", &[9, 9]);
        assert!(image.as_buffer_object_mut().unwrap().set_serialized_object(update));
        assert_eq!(image.as_buffer_object().unwrap().serialize(), Bytes::from_static(&[9, 9]));
    }
}
