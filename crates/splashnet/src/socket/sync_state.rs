use splashcore::Tree;
use splashproto::{Message, MessageType, Seed};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Server-side view of every client connection.
///
/// Each connection has its own list of pending seeds, so a client asking for
/// updates gets exactly what changed since its previous request.
///
/// The tree's update list must have a single consumer. A state built with
/// [`SyncState::new`] is that consumer and drains the list on every
/// `ASK_UPDATES`. One built with [`SyncState::broadcast_only`] never touches
/// the list and serves only what the owner passes to [`SyncState::broadcast`].
pub struct SyncState {
    tree: Arc<Mutex<Tree>>,
    pending: Mutex<HashMap<ConnectionId, Vec<Seed>>>,
    next_connection: AtomicU64,
    drains_tree: bool,
}

impl SyncState {
    pub fn new(tree: Arc<Mutex<Tree>>) -> Self {
        Self {
            tree,
            pending: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            drains_tree: true,
        }
    }

    /// A state fed by an owner that drains the tree's updates itself.
    pub fn broadcast_only(tree: Arc<Mutex<Tree>>) -> Self {
        Self {
            drains_tree: false,
            ..Self::new(tree)
        }
    }

    /// Register a new connection and return its id.
    pub fn open(&self) -> ConnectionId {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.on_open(id);
        id
    }

    pub fn on_open(&self, id: ConnectionId) {
        self.pending().insert(id, Vec::new());
        debug!("Connection {} opened", id);
    }

    pub fn on_close(&self, id: ConnectionId) {
        self.pending().remove(&id);
        debug!("Connection {} closed", id);
    }

    pub fn connection_count(&self) -> usize {
        self.pending().len()
    }

    /// Move the tree's recorded updates into every connection's list.
    pub fn collect(&self) {
        let seeds = self
            .tree
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_update_seed_list();
        self.broadcast(&seeds);
    }

    /// Append seeds drained elsewhere to every connection's list.
    pub fn broadcast(&self, seeds: &[Seed]) {
        if seeds.is_empty() {
            return;
        }
        for list in self.pending().values_mut() {
            list.extend_from_slice(seeds);
        }
    }

    /// Answer one request from connection `id`.
    pub fn handle(&self, id: ConnectionId, message: Message) -> Option<Message> {
        match message.kind {
            MessageType::AskTree => {
                let seeds = self
                    .tree
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_seeds_for_path("/");
                match seeds {
                    Ok(seeds) => Some(Message::with_seeds(message.id, MessageType::SendTree, &seeds)),
                    Err(e) => {
                        warn!("Could not snapshot the tree: {}", e);
                        None
                    }
                }
            }
            MessageType::AskUpdates => {
                if self.drains_tree {
                    self.collect();
                }
                let seeds = self
                    .pending()
                    .get_mut(&id)
                    .map(std::mem::take)
                    .unwrap_or_default();
                Some(Message::with_seeds(message.id, MessageType::SendUpdates, &seeds))
            }
            MessageType::SendUpdates => {
                match message.seeds() {
                    Ok(seeds) => {
                        debug!("Connection {} sent {} seeds", id, seeds.len());
                        self.tree
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .add_seeds_to_queue(seeds);
                    }
                    Err(e) => warn!("Connection {} sent malformed seeds: {}", id, e),
                }
                None
            }
            MessageType::SendTree => {
                warn!("Ignoring SEND_TREE from connection {}", id);
                None
            }
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Vec<Seed>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
