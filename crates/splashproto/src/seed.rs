//! Seeds: serializable records of one tree mutation.
//!
//! A tree replica records a `Seed` for every local mutation. Peers replay
//! seeds in the order they were produced to converge on the same tree.

use crate::serial::{Reader, Serial, SerialError};
use crate::value::Value;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Microseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time as a seed timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_micros()
}

/// The mutation a seed describes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    AddBranch = 0,
    AddLeaf = 1,
    RemoveBranch = 2,
    RemoveLeaf = 3,
    RenameBranch = 4,
    RenameLeaf = 5,
    SetLeaf = 6,
}

impl Task {
    pub fn from_u8(value: u8) -> Result<Self, SerialError> {
        match value {
            0 => Ok(Task::AddBranch),
            1 => Ok(Task::AddLeaf),
            2 => Ok(Task::RemoveBranch),
            3 => Ok(Task::RemoveLeaf),
            4 => Ok(Task::RenameBranch),
            5 => Ok(Task::RenameLeaf),
            6 => Ok(Task::SetLeaf),
            other => Err(SerialError::InvalidTask(other)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// One tree mutation.
///
/// - `AddBranch`, `RemoveBranch`, `RemoveLeaf`: no value
/// - `AddLeaf`: optional initial value
/// - `SetLeaf`: the new value
/// - `RenameBranch`, `RenameLeaf`: the new name as a string value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub task: Task,
    pub path: String,
    pub value: Option<Value>,
    pub timestamp: Timestamp,
    /// UUID of the tree that produced the seed.
    pub source: Uuid,
}

impl Seed {
    pub fn new(task: Task, path: impl Into<String>, value: Option<Value>, source: Uuid) -> Self {
        Self {
            task,
            path: path.into(),
            value,
            timestamp: now(),
            source,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Serial for Task {
    fn serialized_size(&self) -> usize {
        1
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.to_u8());
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        Task::from_u8(reader.read_u8()?)
    }
}

impl Serial for Seed {
    fn serialized_size(&self) -> usize {
        self.task.serialized_size()
            + self.path.serialized_size()
            + self.timestamp.serialized_size()
            + self.source.serialized_size()
            + 1
            + self.value.as_ref().map_or(0, Serial::serialized_size)
    }

    fn serialize_into(&self, buf: &mut BytesMut) {
        self.task.serialize_into(buf);
        self.path.serialize_into(buf);
        self.timestamp.serialize_into(buf);
        self.source.serialize_into(buf);
        self.value.is_some().serialize_into(buf);
        if let Some(value) = &self.value {
            value.serialize_into(buf);
        }
    }

    fn deserialize_from(reader: &mut Reader<'_>) -> Result<Self, SerialError> {
        let task = Task::deserialize_from(reader)?;
        let path = String::deserialize_from(reader)?;
        let timestamp = i64::deserialize_from(reader)?;
        let source = Uuid::deserialize_from(reader)?;
        let value = if bool::deserialize_from(reader)? {
            Some(Value::deserialize_from(reader)?)
        } else {
            None
        };

        Ok(Seed {
            task,
            path,
            value,
            timestamp,
            source,
        })
    }
}
