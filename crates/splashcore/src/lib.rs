//! Core of a Splash process: the replicated tree, typed attributes, graph
//! objects and the root object tying them together.
//!
//! Nothing here touches the network. `splashnet` moves seeds and attribute
//! messages between processes and feeds them back through [`RootObject`].

pub mod attribute;
pub mod object;
pub mod root;
pub mod tree;

pub use attribute::{Attribute, AttributeError, CallbackHandle, Notification, SyncMethod};
pub use object::{BufferObject, GraphObject, PlainBuffer};
pub use root::{RootError, RootObject, RootTask};
pub use tree::{Branch, BranchTask, CallbackId, Leaf, LeafUpdate, QueueReport, SeedQueue, Tree, TreeError};
