use splashproto::Seed;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Thread-safe FIFO of seeds waiting to be applied to a tree.
///
/// Cloning yields another handle to the same queue, so network tasks can push
/// while the owner of the tree decides when to apply.
#[derive(Debug, Clone, Default)]
pub struct SeedQueue {
    inner: Arc<Mutex<VecDeque<Seed>>>,
}

impl SeedQueue {
    pub fn push(&self, seeds: impl IntoIterator<Item = Seed>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(seeds);
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Seed> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// What a call to `Tree::process_queue` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub applied: usize,
    pub dropped: usize,
    /// Seeds that originated from this tree and came back.
    pub skipped: usize,
}
