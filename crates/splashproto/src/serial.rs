//! Binary serializer for everything that crosses a process boundary.
//!
//! ## Encoding
//!
//! ```text
//! u8 / bool         1 byte
//! u32 / u64 / i64   fixed width, little-endian
//! f64               IEEE-754 bits, little-endian
//! String / bytes    u32 length + raw bytes
//! Vec<T>            u32 count + elements
//! Uuid              16 bytes
//! Value             tag byte (+0x80 if named, then name) + payload
//! ```
//!
//! Encoding always appends to the caller's buffer so a message can be built
//! field by field. Decoding walks a flat buffer from an offset and every read
//! is bounds-checked; [`get_size`] reports exactly how far one value advances
//! the offset.

use crate::value::{Value, ValueType, Values};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

const TAG_BOOLEAN: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_VALUES: u8 = 4;
const TAG_NAMED: u8 = 0x80;

/// Deepest `Value` list nesting a decoder accepts.
pub const MAX_VALUE_DEPTH: usize = 64;

/// Errors while decoding a buffer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerialError {
    #[error("Unexpected end of buffer: expected {expected} bytes, got {actual}")]
    UnexpectedEnd { expected: usize, actual: usize },
    #[error("Offset {offset} is past the end of a {len} byte buffer")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("Invalid value tag: {0:#04x}")]
    InvalidTag(u8),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Invalid seed task: {0}")]
    InvalidTask(u8),
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u32),
    #[error("Invalid boolean byte: {0}")]
    InvalidBool(u8),
    #[error("Values nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Cursor over a borrowed byte buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, depth: 0 }
    }

    /// Start reading at `offset`.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, SerialError> {
        if offset > buf.len() {
            return Err(SerialError::OffsetOutOfRange {
                offset,
                len: buf.len(),
            });
        }
        Ok(Self {
            buf,
            pos: offset,
            depth: 0,
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Everything not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], SerialError> {
        if self.remaining() < n {
            return Err(SerialError::UnexpectedEnd {
                expected: n,
                actual: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], SerialError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, SerialError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, SerialError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SerialError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, SerialError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, SerialError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    fn read_len(&mut self) -> Result<usize, SerialError> {
        Ok(self.read_u32()? as usize)
    }

    /// Run `read` one nesting level down, failing past [`MAX_VALUE_DEPTH`].
    fn nested<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T, SerialError>) -> Result<T, SerialError> {
        if self.depth >= MAX_VALUE_DEPTH {
            return Err(SerialError::TooDeep(MAX_VALUE_DEPTH));
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }
}

/// A type with a stable binary encoding.
pub trait Serial: Sized {
    /// Exact number of bytes `serialize_into` appends.
    fn serialized_size(&self) -> usize;

    /// Append the encoding of `self` to `buf`.
    fn serialize_into(&self, buf: &mut BytesMut);

    /// Decode one value, advancing the reader past it.
    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError>;
}

/// Append `value` to `buf`.
pub fn serialize<T: Serial>(value: &T, buf: &mut BytesMut) {
    buf.reserve(value.serialized_size());
    value.serialize_into(buf);
}

/// Encode `value` into a fresh buffer.
pub fn to_bytes<T: Serial>(value: &T) -> Bytes {
    let mut buf = BytesMut::with_capacity(value.serialized_size());
    value.serialize_into(&mut buf);
    buf.freeze()
}

/// Decode one `T` starting at `offset`.
pub fn deserialize<T: Serial>(buf: &[u8], offset: usize) -> Result<T, SerialError> {
    let mut reader = Reader::at(buf, offset)?;
    T::deserialize_from(&mut reader)
}

/// Encoded size of `value` in bytes.
pub fn get_size<T: Serial>(value: &T) -> usize {
    value.serialized_size()
}

fn put_len(buf: &mut BytesMut, len: usize) {
    debug_assert!(len <= u32::MAX as usize, "length does not fit the u32 prefix");
    buf.put_u32_le(len as u32);
}

impl Serial for u8 {
    fn serialized_size(&self) -> usize {
        1
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        reader.read_u8()
    }
}

impl Serial for bool {
    fn serialized_size(&self) -> usize {
        1
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerialError::InvalidBool(other)),
        }
    }
}

impl Serial for u32 {
    fn serialized_size(&self) -> usize {
        4
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        reader.read_u32()
    }
}

impl Serial for u64 {
    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        reader.read_u64()
    }
}

impl Serial for i64 {
    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_i64_le(*self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        reader.read_i64()
    }
}

impl Serial for f64 {
    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_f64_le(*self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        reader.read_f64()
    }
}

impl Serial for String {
    fn serialized_size(&self) -> usize {
        4 + self.len()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        buf.put_slice(self.as_bytes());
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let len = reader.read_len()?;
        let raw = reader.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| SerialError::InvalidUtf8("string"))
    }
}

impl Serial for Bytes {
    fn serialized_size(&self) -> usize {
        4 + self.len()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        buf.put_slice(self);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let len = reader.read_len()?;
        Ok(Bytes::copy_from_slice(reader.take(len)?))
    }
}

impl Serial for Uuid {
    fn serialized_size(&self) -> usize {
        16
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_slice(self.as_bytes());
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let raw: [u8; 16] = reader.take_array()?;
        Ok(Uuid::from_bytes(raw))
    }
}

impl<T: Serial> Serial for Vec<T> {
    fn serialized_size(&self) -> usize {
        4 + self.iter().map(Serial::serialized_size).sum::<usize>()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        put_len(buf, self.len());
        for item in self {
            item.serialize_into(buf);
        }
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let count = reader.read_len()?;
        // Every element takes at least one byte, so a hostile count cannot
        // make us preallocate more than the buffer holds.
        let mut items = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            items.push(T::deserialize_from(reader)?);
        }
        Ok(items)
    }
}

impl<A: Serial, B: Serial> Serial for (A, B) {
    fn serialized_size(&self) -> usize {
        self.0.serialized_size() + self.1.serialized_size()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        self.0.serialize_into(buf);
        self.1.serialize_into(buf);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        Ok((A::deserialize_from(reader)?, B::deserialize_from(reader)?))
    }
}

impl<A: Serial, B: Serial, C: Serial> Serial for (A, B, C) {
    fn serialized_size(&self) -> usize {
        self.0.serialized_size() + self.1.serialized_size() + self.2.serialized_size()
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        self.0.serialize_into(buf);
        self.1.serialize_into(buf);
        self.2.serialize_into(buf);
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        Ok((
            A::deserialize_from(reader)?,
            B::deserialize_from(reader)?,
            C::deserialize_from(reader)?,
        ))
    }
}

impl Serial for Value {
    fn serialized_size(&self) -> usize {
        let name = self.name().map_or(0, |n| 4 + n.len());
        let payload = match self.value_type() {
            ValueType::Boolean => 1,
            ValueType::Integer | ValueType::Real => 8,
            ValueType::String => 4 + self.as_str().map_or(0, str::len),
            ValueType::Values => self.values().map_or(4, Serial::serialized_size),
        };
        1 + name + payload
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        let tag = match self.value_type() {
            ValueType::Boolean => TAG_BOOLEAN,
            ValueType::Integer => TAG_INTEGER,
            ValueType::Real => TAG_REAL,
            ValueType::String => TAG_STRING,
            ValueType::Values => TAG_VALUES,
        };

        match self.name() {
            Some(name) => {
                buf.put_u8(tag | TAG_NAMED);
                put_len(buf, name.len());
                buf.put_slice(name.as_bytes());
            }
            None => buf.put_u8(tag),
        }

        match self.value_type() {
            ValueType::Boolean => self.as_bool().serialize_into(buf),
            ValueType::Integer => self.as_i64().serialize_into(buf),
            ValueType::Real => self.as_f64().serialize_into(buf),
            ValueType::String => {
                let s = self.as_str().unwrap_or_default();
                put_len(buf, s.len());
                buf.put_slice(s.as_bytes());
            }
            ValueType::Values => match self.values() {
                Some(values) => values.serialize_into(buf),
                None => put_len(buf, 0),
            },
        }
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let raw_tag = reader.read_u8()?;
        let name = if raw_tag & TAG_NAMED != 0 {
            Some(String::deserialize_from(reader)?)
        } else {
            None
        };

        let mut value = match raw_tag & !TAG_NAMED {
            TAG_BOOLEAN => Value::from(bool::deserialize_from(reader)?),
            TAG_INTEGER => Value::from(reader.read_i64()?),
            TAG_REAL => Value::from(reader.read_f64()?),
            TAG_STRING => Value::from(String::deserialize_from(reader)?),
            TAG_VALUES => Value::from(reader.nested(Values::deserialize_from)?),
            _ => return Err(SerialError::InvalidTag(raw_tag)),
        };

        if let Some(name) = name {
            value.set_name(name);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values;
    use pretty_assertions::assert_eq;

    fn roundtrip<T: Serial + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = to_bytes(&value);
        assert_eq!(bytes.len(), get_size(&value), "size mismatch for {:?}", value);
        let back: T = deserialize(&bytes, 0).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn scalar_values_roundtrip() {
        roundtrip(Value::from(true));
        roundtrip(Value::from(false));
        roundtrip(Value::from(-42));
        roundtrip(Value::from(i64::MAX));
        roundtrip(Value::from(3.25));
        roundtrip(Value::from(""));
        roundtrip(Value::from("projecteur gauche"));
    }

    #[test]
    fn nested_values_roundtrip() {
        let depth3 = Value::from(values![
            1,
            values![2.5, values!["deep", false], "mid"],
            Value::named("size", values![1920, 1080]),
        ]);
        roundtrip(depth3);
        roundtrip(Value::from(Values::new()));
    }

    #[test]
    fn named_value_roundtrip() {
        roundtrip(Value::named("codec", "h264"));
    }

    #[test]
    fn composite_roundtrip() {
        roundtrip(Uuid::new_v4());
        roundtrip(vec!["a".to_string(), "b".to_string()]);
        roundtrip(("object".to_string(), "attribute".to_string(), values![1, 2]));
        roundtrip(Bytes::from_static(b"\x00\x01\x02"));
    }

    #[test]
    fn serialize_appends() {
        let mut buf = BytesMut::new();
        serialize(&"first".to_string(), &mut buf);
        serialize(&Value::from(7), &mut buf);

        let first: String = deserialize(&buf, 0).unwrap();
        assert_eq!(first, "first");
        let second: Value = deserialize(&buf, get_size(&first)).unwrap();
        assert_eq!(second, Value::from(7));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let bytes = to_bytes(&Value::from(values!["hello", 1, 2.0]));
        for cut in 0..bytes.len() {
            let result = deserialize::<Value>(&bytes[..cut], 0);
            assert!(result.is_err(), "decoding {} of {} bytes should fail", cut, bytes.len());
        }
    }

    #[test]
    fn bad_tag_and_offset() {
        assert_eq!(
            deserialize::<Value>(&[0x07], 0),
            Err(SerialError::InvalidTag(0x07))
        );
        assert!(matches!(
            deserialize::<Value>(&[TAG_INTEGER], 5),
            Err(SerialError::OffsetOutOfRange { offset: 5, len: 1 })
        ));
    }

    #[test]
    fn huge_count_does_not_preallocate() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(u32::MAX);
        assert!(deserialize::<Vec<u64>>(&buf, 0).is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        // A million nested single-element lists.
        let mut buf = BytesMut::new();
        for _ in 0..1_000_000 {
            buf.put_u8(TAG_VALUES);
            buf.put_u32_le(1);
        }
        buf.put_u8(TAG_INTEGER);
        buf.put_i64_le(1);
        assert_eq!(
            deserialize::<Value>(&buf, 0),
            Err(SerialError::TooDeep(MAX_VALUE_DEPTH))
        );
    }

    #[test]
    fn nesting_up_to_the_limit_roundtrips() {
        let mut value = Value::from(1);
        for _ in 0..MAX_VALUE_DEPTH {
            value = Value::from(values![value]);
        }
        roundtrip(value.clone());

        let too_deep = Value::from(values![value]);
        assert_eq!(
            deserialize::<Value>(&to_bytes(&too_deep), 0),
            Err(SerialError::TooDeep(MAX_VALUE_DEPTH))
        );
    }
}
