//! Wire types shared by every Splash process.
//!
//! - [`value`]: the `Value` payload type
//! - [`serial`]: the binary serializer (`Serial` trait)
//! - [`seed`]: tree mutation records
//! - [`object`]: link payloads (attribute messages, serialized objects)
//! - [`message`]: socket protocol messages and framing
//! - [`id`]: explicit id allocation

pub mod id;
pub mod message;
pub mod object;
pub mod seed;
pub mod serial;
pub mod value;

pub use id::IdAllocator;
pub use message::{FrameError, Message, MessageId, MessageType};
pub use object::{AttributeMessage, SerializedObject, TREE_BUFFER_NAME};
pub use seed::{now, Seed, Task, Timestamp};
pub use serial::{deserialize, get_size, serialize, to_bytes, Reader, Serial, SerialError};
pub use value::{type_char_matches, Value, ValueType, Values};
