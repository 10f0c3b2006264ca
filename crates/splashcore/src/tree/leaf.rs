use super::{CallbackId, TreeError};
use splashproto::{Timestamp, Value};
use std::fmt;
use std::sync::Arc;

/// Called with the new value and its timestamp whenever a leaf changes.
pub type LeafCallback = Arc<dyn Fn(&Value, Timestamp) + Send + Sync>;

/// Outcome of a leaf update that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUpdate {
    Changed,
    Unchanged,
}

/// A named value at the edge of the tree.
#[derive(Clone)]
pub struct Leaf {
    name: String,
    value: Value,
    timestamp: Timestamp,
    callbacks: Vec<(CallbackId, LeafCallback)>,
}

impl Leaf {
    pub fn new(name: impl Into<String>, value: Value, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            callbacks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Store `value` stamped with `timestamp`.
    ///
    /// Updates older than the current value are refused unless `force` is set.
    /// Callbacks fire when the value changed, or on every accepted update when
    /// `notify_on_unchanged` is set.
    pub(crate) fn set(
        &mut self,
        path: &str,
        value: Value,
        timestamp: Timestamp,
        force: bool,
        notify_on_unchanged: bool,
    ) -> Result<LeafUpdate, TreeError> {
        if !force && timestamp < self.timestamp {
            return Err(TreeError::Stale {
                path: path.to_string(),
                timestamp,
                current: self.timestamp,
            });
        }

        let update = if value == self.value {
            LeafUpdate::Unchanged
        } else {
            self.value = value;
            self.timestamp = timestamp.max(self.timestamp);
            LeafUpdate::Changed
        };

        if update == LeafUpdate::Changed || notify_on_unchanged {
            for (_, callback) in &self.callbacks {
                callback(&self.value, self.timestamp);
            }
        }
        Ok(update)
    }

    pub(crate) fn add_callback(&mut self, id: CallbackId, callback: LeafCallback) {
        self.callbacks.push((id, callback));
    }

    pub(crate) fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cb_id, _)| *cb_id != id);
        self.callbacks.len() != before
    }
}

// Replicas compare by content; timestamps and callbacks are local bookkeeping.
impl PartialEq for Leaf {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("timestamp", &self.timestamp)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
