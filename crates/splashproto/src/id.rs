//! Identifier allocation.
//!
//! Callback ids and socket message ids come from an `IdAllocator` owned by the
//! process (or a test), never from a global counter.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic u32 id source. Ids start at 1; 0 is never handed out.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Restart numbering at 1.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
