//! The root object of a process.
//!
//! A `RootObject` owns the replicated tree, the registry of graph objects and
//! its own attributes. The tree mirrors the registry:
//!
//! ```text
//! /<root>/attributes/<attr>
//! /<root>/objects/<object>/type
//! /<root>/objects/<object>/attributes/<attr>
//! ```
//!
//! Attribute sets are mirrored into the matching leaf. When a replayed seed
//! changes such a leaf, a task is queued that pushes the leaf value back into
//! the attribute on the next [`RootObject::update`].

use crate::attribute::{Attribute, AttributeError, SyncMethod};
use crate::object::GraphObject;
use crate::tree::{QueueReport, Tree, TreeError};
use splashproto::{deserialize, to_bytes, IdAllocator, Seed, SerialError, SerializedObject, Value, Values, TREE_BUFFER_NAME};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Deferred work run by [`RootObject::run_tasks`].
pub type RootTask = Box<dyn FnOnce(&RootObject) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum RootError {
    #[error("Unknown object: {0}")]
    UnknownObject(String),
    #[error("Object {object} has no attribute {attribute}")]
    UnknownAttribute { object: String, attribute: String },
    #[error("An object named {0} is already registered")]
    DuplicateObject(String),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("Malformed tree buffer: {0}")]
    Serial(#[from] SerialError),
}

#[derive(Clone, Default)]
struct TaskQueue(Arc<Mutex<Vec<RootTask>>>);

impl TaskQueue {
    fn push(&self, task: RootTask) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(task);
    }

    fn take(&self) -> Vec<RootTask> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct RootObject {
    name: String,
    ids: IdAllocator,
    tree: Arc<Mutex<Tree>>,
    objects: Mutex<BTreeMap<String, GraphObject>>,
    attributes: Mutex<BTreeMap<String, Attribute>>,
    tasks: TaskQueue,
    propagate: AtomicBool,
}

impl RootObject {
    pub fn new(name: impl Into<String>, ids: IdAllocator) -> Self {
        let name = name.into();
        Self {
            tree: Arc::new(Mutex::new(Tree::with_name(name.clone()))),
            name,
            ids,
            objects: Mutex::new(BTreeMap::new()),
            attributes: Mutex::new(BTreeMap::new()),
            tasks: TaskQueue::default(),
            propagate: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocator for attribute callback handles.
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Lock the tree. Do not hold the guard across an `.await`.
    pub fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tree_handle(&self) -> Arc<Mutex<Tree>> {
        self.tree.clone()
    }

    /// Forward applied peer seeds to our own update list on `update`.
    pub fn set_propagate(&self, propagate: bool) {
        self.propagate.store(propagate, Ordering::Relaxed);
    }

    pub fn propagate(&self) -> bool {
        self.propagate.load(Ordering::Relaxed)
    }

    // ---- registry ------------------------------------------------------

    /// Register an object and create its branch in the tree. If the branch was
    /// already replicated from a peer, the object picks up the replicated
    /// attribute values on the next update.
    pub fn add_object(&self, object: GraphObject) -> Result<(), RootError> {
        let name = object.name().to_string();
        let kind = object.kind().to_string();
        let leaves: Vec<(String, Values)> = object
            .attributes()
            .map(|attribute| (attribute.name().to_string(), attribute.get()))
            .collect();

        {
            let mut objects = self.objects();
            if objects.contains_key(&name) {
                return Err(RootError::DuplicateObject(name));
            }
            objects.insert(name.clone(), object);
        }

        let mut tree = self.tree();
        let type_path = format!("{}/type", self.object_path(&name));
        if !tree.has_leaf_at(&type_path) {
            tree.create_leaf_at(&type_path, kind.as_str())?;
        }
        for (attribute, values) in leaves {
            self.attach_leaf(&mut tree, &name, &attribute, values)?;
        }

        debug!("Added object {} to root {}", name, self.name);
        Ok(())
    }

    /// Unregister an object and remove its branch.
    pub fn remove_object(&self, name: &str) -> Option<GraphObject> {
        let object = self.objects().remove(name)?;
        if let Err(e) = self.tree().remove_branch_at(&self.object_path(name)) {
            debug!("Object {} had no branch: {}", name, e);
        }
        Some(object)
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects().contains_key(name)
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Run `f` on the named object while the registry is locked.
    pub fn with_object<R>(&self, name: &str, f: impl FnOnce(&GraphObject) -> R) -> Option<R> {
        self.objects().get(name).map(f)
    }

    pub fn with_object_mut<R>(&self, name: &str, f: impl FnOnce(&mut GraphObject) -> R) -> Option<R> {
        self.objects().get_mut(name).map(f)
    }

    /// Add an attribute to the root itself.
    pub fn add_attribute(&self, mut attribute: Attribute) -> Result<(), RootError> {
        attribute.set_object_name(&self.name);
        let name = attribute.name().to_string();
        let values = attribute.get();
        self.root_attributes().insert(name.clone(), attribute);

        let mut tree = self.tree();
        self.attach_leaf(&mut tree, &self.name, &name, values)
    }

    // ---- attributes ----------------------------------------------------

    /// Set an attribute of `object`, or of the root if `object` is the root's
    /// own name.
    ///
    /// With `asynchronous`, the set is deferred to the next [`RootObject::update`]
    /// unless the attribute is `ForceSync`. `ForceAsync` attributes are always
    /// deferred.
    pub fn set(&self, object: &str, attribute: &str, values: Values, asynchronous: bool) -> Result<(), RootError> {
        let method = self.sync_method(object, attribute)?;
        let immediate = match method {
            SyncMethod::ForceSync => true,
            SyncMethod::ForceAsync => false,
            SyncMethod::Auto => !asynchronous,
        };

        if immediate {
            return self.set_attribute(object, attribute, values);
        }

        let (object, attribute) = (object.to_string(), attribute.to_string());
        self.add_task(move |root| {
            if let Err(e) = root.set_attribute(&object, &attribute, values) {
                warn!("Deferred set of {}.{} failed: {}", object, attribute, e);
            }
        });
        Ok(())
    }

    /// Set an attribute now and mirror its value into the tree.
    ///
    /// Attribute callbacks run last, with no registry or tree lock held, so
    /// they may call back into the root.
    pub fn set_attribute(&self, object: &str, attribute: &str, values: Values) -> Result<(), RootError> {
        let (notification, current) = if object == self.name {
            let mut attributes = self.root_attributes();
            let target = attributes
                .get_mut(attribute)
                .ok_or_else(|| unknown_attribute(object, attribute))?;
            (target.apply(values)?, target.get())
        } else {
            let mut objects = self.objects();
            let target = objects
                .get_mut(object)
                .ok_or_else(|| RootError::UnknownObject(object.to_string()))?
                .attribute_mut(attribute)
                .ok_or_else(|| unknown_attribute(object, attribute))?;
            (target.apply(values)?, target.get())
        };

        // Setter-only attributes have nothing to mirror.
        if !current.is_empty() {
            self.mirror_attribute(object, attribute, current);
        }
        notification.fire();
        Ok(())
    }

    fn mirror_attribute(&self, object: &str, attribute: &str, current: Values) {
        let path = self.attribute_path(object, attribute);
        let mut tree = self.tree();
        let mirrored = if tree.has_leaf_at(&path) {
            tree.set_value_for_leaf_at(&path, Value::from(current))
        } else {
            tree.create_leaf_at(&path, Value::from(current))
        };
        if let Err(e) = mirrored {
            warn!("Could not mirror {}.{} into the tree: {}", object, attribute, e);
        }
    }

    pub fn get_attribute(&self, object: &str, attribute: &str) -> Option<Values> {
        if object == self.name {
            self.root_attributes().get(attribute).map(Attribute::get)
        } else {
            self.objects().get(object)?.get_attribute(attribute)
        }
    }

    /// Route a buffer received from a link. The `_tree` buffer carries seeds for
    /// the replay queue; anything else goes to the named buffer object.
    pub fn set_from_serialized_object(&self, name: &str, obj: SerializedObject) -> bool {
        if name == TREE_BUFFER_NAME {
            return match obj.payload().and_then(|payload| deserialize::<Vec<Seed>>(&payload, 0)) {
                Ok(seeds) => {
                    debug!("Queued {} seeds from a tree buffer", seeds.len());
                    self.tree().add_seeds_to_queue(seeds);
                    true
                }
                Err(e) => {
                    warn!("Malformed tree buffer: {}", e);
                    false
                }
            };
        }

        let mut objects = self.objects();
        let Some(object) = objects.get_mut(name) else {
            warn!("Buffer for unknown object {}", name);
            return false;
        };
        match object.as_buffer_object_mut() {
            Some(buffer) => buffer.set_serialized_object(obj),
            None => {
                warn!("Object {} does not accept buffers", name);
                false
            }
        }
    }

    // ---- main loop -----------------------------------------------------

    pub fn add_task(&self, task: impl FnOnce(&RootObject) + Send + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Run the tasks queued so far. Tasks queued while running wait for the
    /// next call.
    pub fn run_tasks(&self) -> usize {
        let tasks = self.tasks.take();
        let count = tasks.len();
        for task in tasks {
            task(self);
        }
        count
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// One main-loop step: apply queued seeds, then run queued tasks.
    pub fn update(&self) -> QueueReport {
        let report = self.tree().process_queue(self.propagate());
        self.run_tasks();
        report
    }

    /// Copy getter outputs into their leaves where they differ.
    pub fn update_tree_from_objects(&self) {
        let mut snapshot: Vec<(String, Values)> = self
            .root_attributes()
            .values()
            .map(|attribute| (self.attribute_path(&self.name, attribute.name()), attribute.get()))
            .collect();
        for object in self.objects().values() {
            for attribute in object.attributes() {
                snapshot.push((self.attribute_path(object.name(), attribute.name()), attribute.get()));
            }
        }

        let mut tree = self.tree();
        for (path, values) in snapshot {
            if values.is_empty() {
                continue;
            }
            let value = Value::from(values);
            let result = match tree.get_value_for_leaf_at(&path) {
                Some(current) if current == value => continue,
                Some(_) => tree.set_value_for_leaf_at(&path, value),
                None => tree.create_leaf_at(&path, value),
            };
            if let Err(e) = result {
                warn!("Could not update leaf {}: {}", path, e);
            }
        }
    }

    /// Drain the tree's update list into a `_tree` buffer. `None` when there is
    /// nothing to send.
    pub fn serialized_tree_updates(&self) -> Option<SerializedObject> {
        let seeds = self.tree().get_update_seed_list();
        if seeds.is_empty() {
            return None;
        }
        Some(SerializedObject::new(TREE_BUFFER_NAME, &to_bytes(&seeds)))
    }

    /// A `_tree` buffer rebuilding the subtree at `path`.
    pub fn serialized_tree_at(&self, path: &str) -> Result<SerializedObject, RootError> {
        let seeds = self.tree().get_seeds_for_path(path)?;
        Ok(SerializedObject::new(TREE_BUFFER_NAME, &to_bytes(&seeds)))
    }

    // ---- internals -----------------------------------------------------

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, GraphObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn root_attributes(&self) -> MutexGuard<'_, BTreeMap<String, Attribute>> {
        self.attributes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_path(&self, object: &str) -> String {
        format!("/{}/objects/{}", self.name, object)
    }

    fn attribute_path(&self, object: &str, attribute: &str) -> String {
        if object == self.name {
            format!("/{}/attributes/{}", self.name, attribute)
        } else {
            format!("{}/attributes/{}", self.object_path(object), attribute)
        }
    }

    fn sync_method(&self, object: &str, attribute: &str) -> Result<SyncMethod, RootError> {
        if object == self.name {
            return self
                .root_attributes()
                .get(attribute)
                .map(Attribute::sync_method)
                .ok_or_else(|| unknown_attribute(object, attribute));
        }
        let objects = self.objects();
        let target = objects
            .get(object)
            .ok_or_else(|| RootError::UnknownObject(object.to_string()))?;
        target
            .attribute(attribute)
            .map(Attribute::sync_method)
            .ok_or_else(|| unknown_attribute(object, attribute))
    }

    /// Create (or adopt) the leaf mirroring an attribute and watch it for
    /// replayed changes.
    fn attach_leaf(&self, tree: &mut Tree, object: &str, attribute: &str, values: Values) -> Result<(), RootError> {
        let path = self.attribute_path(object, attribute);
        if tree.has_leaf_at(&path) {
            self.queue_leaf_sync(object, attribute);
        } else {
            tree.create_leaf_at(&path, Value::from(values))?;
        }

        let tasks = self.tasks.clone();
        let (object, attribute) = (object.to_string(), attribute.to_string());
        tree.add_callback_to_leaf_at(&path, move |_, _| {
            tasks.push(sync_task(object.clone(), attribute.clone()));
        })?;
        Ok(())
    }

    fn queue_leaf_sync(&self, object: &str, attribute: &str) {
        self.tasks.push(sync_task(object.to_string(), attribute.to_string()));
    }

    /// Push the leaf value into the attribute if they differ.
    fn sync_attribute_from_leaf(&self, object: &str, attribute: &str) {
        let path = self.attribute_path(object, attribute);
        let Some(leaf) = self.tree().get_value_for_leaf_at(&path) else {
            return;
        };
        let values = leaf.as_values();
        if values.is_empty() || self.get_attribute(object, attribute).as_ref() == Some(&values) {
            return;
        }
        if let Err(e) = self.set_attribute(object, attribute, values) {
            warn!("Replayed value for {}.{} rejected: {}", object, attribute, e);
        }
    }
}

impl std::fmt::Debug for RootObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootObject")
            .field("name", &self.name)
            .field("objects", &self.object_names())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

fn sync_task(object: String, attribute: String) -> RootTask {
    Box::new(move |root: &RootObject| root.sync_attribute_from_leaf(&object, &attribute))
}

fn unknown_attribute(object: &str, attribute: &str) -> RootError {
    RootError::UnknownAttribute {
        object: object.to_string(),
        attribute: attribute.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainBuffer;
    use pretty_assertions::assert_eq;
    use splashproto::{values, Task};

    fn camera() -> GraphObject {
        GraphObject::new("camera", "camera")
            .with_attribute(Attribute::new("size", values![640, 480]))
            .with_attribute(Attribute::new("name", values!["cam"]).with_sync_method(SyncMethod::ForceSync))
    }

    #[test]
    fn add_object_mirrors_into_the_tree() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(camera()).unwrap();

        let tree = root.tree();
        assert_eq!(
            tree.get_value_for_leaf_at("/world/objects/camera/type"),
            Some(Value::from("camera"))
        );
        assert_eq!(
            tree.get_value_for_leaf_at("/world/objects/camera/attributes/size"),
            Some(Value::from(values![640, 480]))
        );
        drop(tree);

        assert!(matches!(root.add_object(camera()), Err(RootError::DuplicateObject(_))));
    }

    #[test]
    fn synchronous_set_applies_and_records_a_seed() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(camera()).unwrap();
        root.tree().get_update_seed_list();

        root.set("camera", "size", values![800, 600], false).unwrap();
        assert_eq!(root.get_attribute("camera", "size"), Some(values![800, 600]));

        let seeds = root.tree().get_update_seed_list();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].task, Task::SetLeaf);
        assert_eq!(seeds[0].path, "/world/objects/camera/attributes/size");
    }

    #[test]
    fn asynchronous_set_waits_for_update() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(camera()).unwrap();

        root.set("camera", "size", values![1, 2], true).unwrap();
        assert_eq!(root.get_attribute("camera", "size"), Some(values![640, 480]));

        // ForceSync ignores the asynchronous flag.
        root.set("camera", "name", values!["main"], true).unwrap();
        assert_eq!(root.get_attribute("camera", "name"), Some(values!["main"]));

        root.update();
        assert_eq!(root.get_attribute("camera", "size"), Some(values![1, 2]));
    }

    #[test]
    fn callbacks_may_read_back_through_the_root() {
        let root = Arc::new(RootObject::new("world", IdAllocator::new()));
        root.add_object(camera()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (weak, sink) = (Arc::downgrade(&root), seen.clone());
        let _handle = root
            .with_object("camera", |object| {
                object.attribute("size").unwrap().register_callback(root.ids(), move |object, attribute| {
                    let root = weak.upgrade().unwrap();
                    let values = root.get_attribute(object, attribute).unwrap();
                    let leaf = root
                        .tree()
                        .get_value_for_leaf_at("/world/objects/camera/attributes/size");
                    sink.lock().unwrap().push((values, leaf));
                })
            })
            .unwrap();

        root.set("camera", "size", values![2, 2], false).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(values![2, 2], Some(Value::from(values![2, 2])))]
        );
    }

    #[test]
    fn unknown_targets_are_errors() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(camera()).unwrap();
        assert!(matches!(
            root.set("nobody", "size", values![1], false),
            Err(RootError::UnknownObject(_))
        ));
        assert!(matches!(
            root.set("camera", "nothing", values![1], false),
            Err(RootError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            root.set("camera", "size", values!["a", "b"], false),
            Err(RootError::Attribute(AttributeError::WrongType { .. }))
        ));
    }

    #[test]
    fn root_attributes_live_under_the_root_branch() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_attribute(Attribute::new("framerate", values![60])).unwrap();
        root.set("world", "framerate", values![30], false).unwrap();

        assert_eq!(
            root.tree().get_value_for_leaf_at("/world/attributes/framerate"),
            Some(Value::from(values![30]))
        );
    }

    #[test]
    fn replayed_seeds_reach_the_attribute() {
        let source = RootObject::new("world", IdAllocator::new());
        let replica = RootObject::new("world", IdAllocator::new());
        source.add_object(camera()).unwrap();
        replica.add_object(camera()).unwrap();
        source.tree().get_update_seed_list();
        replica.tree().get_update_seed_list();

        source.set("camera", "size", values![1920, 1080], false).unwrap();
        let buffer = source.serialized_tree_updates().unwrap();
        assert!(source.serialized_tree_updates().is_none());

        assert!(replica.set_from_serialized_object(TREE_BUFFER_NAME, buffer));
        replica.update();
        assert_eq!(replica.get_attribute("camera", "size"), Some(values![1920, 1080]));

        // The replica's own mirror matched the leaf, so nothing echoes back.
        assert!(replica.serialized_tree_updates().is_none());
    }

    #[test]
    fn late_object_adopts_replicated_values() {
        let source = RootObject::new("world", IdAllocator::new());
        source.add_object(camera()).unwrap();
        source.set("camera", "size", values![320, 240], false).unwrap();

        let replica = RootObject::new("world", IdAllocator::new());
        assert!(replica.set_from_serialized_object(TREE_BUFFER_NAME, source.serialized_tree_at("/").unwrap()));
        replica.update();

        replica.add_object(camera()).unwrap();
        replica.update();
        assert_eq!(replica.get_attribute("camera", "size"), Some(values![320, 240]));
    }

    #[test]
    fn buffers_are_routed_by_name() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(GraphObject::new("image", "image").with_buffer(PlainBuffer::default()))
            .unwrap();
        root.add_object(camera()).unwrap();

        assert!(root.set_from_serialized_object("image", SerializedObject::new("image", &[1, 2, 3])));
        assert!(!root.set_from_serialized_object("camera", SerializedObject::new("camera", &[1])));
        assert!(!root.set_from_serialized_object("ghost", SerializedObject::new("ghost", &[1])));

        let stored = root
            .with_object("image", |object| object.as_buffer_object().map(|b| b.serialize()))
            .flatten()
            .unwrap();
        assert_eq!(&stored[..], &[1u8, 2, 3]);
    }

    #[test]
    fn malformed_tree_buffers_are_refused() {
        let root = RootObject::new("world", IdAllocator::new());
        assert!(!root.set_from_serialized_object(TREE_BUFFER_NAME, SerializedObject::new(TREE_BUFFER_NAME, &[0xff])));
    }

    #[test]
    fn getter_changes_reach_the_tree() {
        let counter = Arc::new(Mutex::new(0i64));
        let read = counter.clone();
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(
            GraphObject::new("clock", "clock").with_attribute(
                Attribute::with_setter("time", &['i'], |_| true)
                    .with_getter(move || values![*read.lock().unwrap()]),
            ),
        )
        .unwrap();

        *counter.lock().unwrap() = 42;
        root.update_tree_from_objects();
        assert_eq!(
            root.tree().get_value_for_leaf_at("/world/objects/clock/attributes/time"),
            Some(Value::from(values![42]))
        );
    }

    #[test]
    fn remove_object_prunes_the_branch() {
        let root = RootObject::new("world", IdAllocator::new());
        root.add_object(camera()).unwrap();
        assert!(root.remove_object("camera").is_some());
        assert!(!root.has_object("camera"));
        assert!(!root.tree().has_branch_at("/world/objects/camera"));
    }
}
