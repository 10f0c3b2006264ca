use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Count of buffers accepted by an output but not yet written to its transport.
///
/// Clones share the counter.
#[derive(Debug, Clone)]
pub struct BufferTracker {
    tx: Arc<watch::Sender<usize>>,
}

impl Default for BufferTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// A buffer was accepted for sending.
    pub fn start(&self) {
        self.tx.send_modify(|n| *n += 1);
    }

    /// A buffer reached the transport (or was dropped).
    pub fn finish(&self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        *self.tx.borrow()
    }

    /// Wait until nothing is in flight. False on timeout.
    pub async fn wait_idle(&self, max_wait: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let idle = matches!(
            tokio::time::timeout(max_wait, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        idle
    }
}
