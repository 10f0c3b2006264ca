//! Typed, lockable attributes.
//!
//! An attribute is how the outside world changes an object: a setter guarded
//! by declared argument types, an optional getter, and callbacks fired after
//! every successful set. Attributes without a custom setter simply store the
//! values they are given.

use crate::tree::CallbackId;
use splashproto::{type_char_matches, IdAllocator, Values};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub type Setter = Box<dyn Fn(&Values) -> bool + Send + Sync>;
pub type Getter = Box<dyn Fn() -> Values + Send + Sync>;

/// Called with `(object_name, attribute_name)` after a successful set.
pub type AttributeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

type CallbackTable = Mutex<BTreeMap<CallbackId, AttributeCallback>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributeError {
    #[error("Attribute {0} is locked")]
    Locked(String),
    #[error("Attribute {attribute} expects {expected} arguments, got {actual}")]
    WrongArity {
        attribute: String,
        expected: usize,
        actual: usize,
    },
    #[error("Attribute {attribute}: argument {position} should be '{expected}', got '{actual}'")]
    WrongType {
        attribute: String,
        position: usize,
        expected: char,
        actual: char,
    },
    #[error("Attribute {0}: setter rejected the values")]
    Rejected(String),
}

/// Whether a set coming from another process is applied right away or deferred
/// to the next update of the root object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMethod {
    #[default]
    Auto,
    ForceSync,
    ForceAsync,
}

/// A named, typed property of an object.
pub struct Attribute {
    name: String,
    object_name: String,
    setter: Option<Setter>,
    getter: Option<Getter>,
    types: Vec<char>,
    values: Values,
    locked: bool,
    sync_method: SyncMethod,
    description: String,
    savable: bool,
    callbacks: Arc<CallbackTable>,
}

impl Attribute {
    /// An attribute that stores whatever it is given. Its declared types are
    /// taken from the initial values.
    pub fn new(name: impl Into<String>, initial: Values) -> Self {
        let types = initial.iter().map(|v| v.type_char()).collect();
        Self {
            name: name.into(),
            object_name: String::new(),
            setter: None,
            getter: None,
            types,
            values: initial,
            locked: false,
            sync_method: SyncMethod::Auto,
            description: String::new(),
            savable: true,
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// An attribute backed by a custom setter accepting at least `types.len()`
    /// arguments of the declared types.
    ///
    /// The arity check is a lower bound: a setter declared `['i', 'i']` also
    /// receives calls with three or more arguments, and only the first
    /// `types.len()` of them are type-checked. Stored-value attributes built
    /// with [`Attribute::new`] require the exact count instead.
    pub fn with_setter(
        name: impl Into<String>,
        types: &[char],
        setter: impl Fn(&Values) -> bool + Send + Sync + 'static,
    ) -> Self {
        let mut attribute = Self::new(name, Values::new());
        attribute.types = types.to_vec();
        attribute.setter = Some(Box::new(setter));
        attribute
    }

    pub fn with_getter(mut self, getter: impl Fn() -> Values + Send + Sync + 'static) -> Self {
        self.getter = Some(Box::new(getter));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sync_method(mut self, method: SyncMethod) -> Self {
        self.sync_method = method;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub(crate) fn set_object_name(&mut self, name: &str) {
        self.object_name = name.to_string();
    }

    /// Validate and apply `args`, then notify callbacks.
    pub fn set(&mut self, args: Values) -> Result<(), AttributeError> {
        self.apply(args)?.fire();
        Ok(())
    }

    /// Validate and apply `args` without running callbacks. The returned
    /// [`Notification`] runs them once fired, so a caller holding a lock on
    /// this attribute can release it first.
    pub fn apply(&mut self, args: Values) -> Result<Notification, AttributeError> {
        if self.locked {
            return Err(AttributeError::Locked(self.name.clone()));
        }

        let arity_ok = match self.setter {
            Some(_) => args.len() >= self.types.len(),
            None => self.types.is_empty() || args.len() == self.types.len(),
        };
        if !arity_ok {
            return Err(AttributeError::WrongArity {
                attribute: self.name.clone(),
                expected: self.types.len(),
                actual: args.len(),
            });
        }

        for (position, (expected, arg)) in self.types.iter().zip(&args).enumerate() {
            let actual = arg.type_char();
            if !type_char_matches(*expected, actual) {
                return Err(AttributeError::WrongType {
                    attribute: self.name.clone(),
                    position,
                    expected: *expected,
                    actual,
                });
            }
        }

        match &self.setter {
            Some(setter) => {
                if !setter(&args) {
                    return Err(AttributeError::Rejected(self.name.clone()));
                }
            }
            None => self.values = args,
        }

        Ok(self.notification())
    }

    /// Current values: the getter output, nothing for setter-only attributes,
    /// the stored values otherwise.
    pub fn get(&self) -> Values {
        match (&self.getter, &self.setter) {
            (Some(getter), _) => getter(),
            (None, Some(_)) => Values::new(),
            (None, None) => self.values.clone(),
        }
    }

    /// Lock the attribute, optionally setting `values` first. Nothing is locked
    /// if that set fails.
    pub fn lock(&mut self, values: Values) -> Result<(), AttributeError> {
        if !values.is_empty() {
            self.set(values)?;
        }
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    /// True when no custom setter is installed.
    pub fn is_default(&self) -> bool {
        self.setter.is_none()
    }

    pub fn args_types(&self) -> &[char] {
        &self.types
    }

    /// Type chars of the values currently returned by `get`.
    pub fn value_types(&self) -> Vec<char> {
        self.get().iter().map(|v| v.type_char()).collect()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn sync_method(&self) -> SyncMethod {
        self.sync_method
    }

    pub fn set_sync_method(&mut self, method: SyncMethod) {
        self.sync_method = method;
    }

    pub fn is_savable(&self) -> bool {
        self.savable
    }

    pub fn set_savable(&mut self, savable: bool) {
        self.savable = savable;
    }

    /// Register `callback`. It stays registered as long as the returned handle lives.
    pub fn register_callback(
        &self,
        ids: &IdAllocator,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> CallbackHandle {
        let id = ids.next_id();
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        CallbackHandle {
            id,
            table: Arc::downgrade(&self.callbacks),
        }
    }

    pub fn unregister_callback(&self, handle: &CallbackHandle) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id)
            .is_some()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // Snapshot so a callback may register or drop handles.
    fn notification(&self) -> Notification {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        Notification {
            object: self.object_name.clone(),
            attribute: self.name.clone(),
            callbacks,
        }
    }
}

/// Callbacks owed by a successful [`Attribute::apply`].
#[must_use = "callbacks only run when the notification is fired"]
pub struct Notification {
    object: String,
    attribute: String,
    callbacks: Vec<AttributeCallback>,
}

impl Notification {
    pub fn fire(self) {
        for callback in &self.callbacks {
            callback(&self.object, &self.attribute);
        }
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("object", &self.object)
            .field("attribute", &self.attribute)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("object", &self.object_name)
            .field("types", &self.types)
            .field("locked", &self.locked)
            .field("sync_method", &self.sync_method)
            .field("default", &self.is_default())
            .finish()
    }
}

/// Keeps an attribute callback registered. Dropping it unregisters the
/// callback; an attribute that is already gone is ignored.
#[must_use = "dropping the handle unregisters the callback"]
#[derive(Debug)]
pub struct CallbackHandle {
    id: CallbackId,
    table: Weak<CallbackTable>,
}

impl CallbackHandle {
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Whether the attribute this handle points to still exists.
    pub fn is_valid(&self) -> bool {
        self.table.strong_count() > 0
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splashproto::{values, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pair() -> (Attribute, Arc<Mutex<Values>>) {
        let store = Arc::new(Mutex::new(Values::new()));
        let sink = store.clone();
        let attribute = Attribute::with_setter("position", &['i', 'i'], move |args| {
            *sink.lock().unwrap() = args.clone();
            true
        });
        (attribute, store)
    }

    #[test]
    fn typed_setter_enforces_arity_and_types() {
        let (mut attribute, store) = pair();

        assert!(matches!(
            attribute.set(values![1]),
            Err(AttributeError::WrongArity { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            attribute.set(values!["x", 2]),
            Err(AttributeError::WrongType { position: 0, expected: 'i', actual: 's', .. })
        ));
        assert!(store.lock().unwrap().is_empty());

        attribute.set(values![3, 4]).unwrap();
        assert_eq!(*store.lock().unwrap(), values![3, 4]);
    }

    #[test]
    fn setter_arity_is_a_lower_bound() {
        let (mut attribute, store) = pair();
        attribute.set(values![3, 4, "extra"]).unwrap();
        assert_eq!(*store.lock().unwrap(), values![3, 4, "extra"]);

        // Only the declared positions are type-checked.
        assert!(attribute.set(values!["x", 4, 5]).is_err());
    }

    #[test]
    fn default_attribute_requires_exact_arity() {
        let mut attribute = Attribute::new("size", values![1, 2]);
        assert!(matches!(
            attribute.set(values![1, 2, 3]),
            Err(AttributeError::WrongArity { expected: 2, actual: 3, .. })
        ));
        assert!(attribute.set(values![1]).is_err());
        attribute.set(values![5, 6]).unwrap();
        assert_eq!(attribute.get(), values![5, 6]);
        assert!(attribute.is_default());
    }

    #[test]
    fn numeric_type_accepts_integers_and_reals() {
        let mut attribute = Attribute::with_setter("gamma", &['n'], |_| true);
        attribute.set(values![2]).unwrap();
        attribute.set(values![2.2]).unwrap();
        assert!(attribute.set(values![true]).is_err());
    }

    #[test]
    fn rejected_by_setter() {
        let mut attribute = Attribute::with_setter("positive", &['i'], |args| args[0].as_i64() > 0);
        assert_eq!(
            attribute.set(values![-1]),
            Err(AttributeError::Rejected("positive".to_string()))
        );
    }

    #[test]
    fn lock_blocks_sets_until_unlocked() {
        let mut attribute = Attribute::new("volume", values![0]);
        attribute.lock(values![5]).unwrap();
        assert!(attribute.is_locked());

        assert_eq!(
            attribute.set(values![10]),
            Err(AttributeError::Locked("volume".to_string()))
        );
        assert_eq!(attribute.get(), values![5]);

        attribute.unlock();
        attribute.set(values![10]).unwrap();
        assert_eq!(attribute.get(), values![10]);
    }

    #[test]
    fn failed_lock_leaves_attribute_unlocked() {
        let mut attribute = Attribute::new("volume", values![0]);
        assert!(attribute.lock(values!["loud"]).is_err());
        assert!(!attribute.is_locked());
    }

    #[test]
    fn get_prefers_getter() {
        let attribute = Attribute::with_setter("clock", &[], |_| true);
        assert!(attribute.get().is_empty());

        let attribute = attribute.with_getter(|| values![Value::from(12)]);
        assert!(attribute.has_getter());
        assert_eq!(attribute.get(), values![12]);
        assert_eq!(attribute.value_types(), vec!['i']);
    }

    #[test]
    fn callbacks_fire_after_success_only() {
        let ids = IdAllocator::new();
        let mut attribute = Attribute::new("name", values!["a"]);
        attribute.set_object_name("camera");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = attribute.register_callback(&ids, move |object, name| {
            assert_eq!((object, name), ("camera", "name"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        attribute.set(values!["b"]).unwrap();
        let _ = attribute.set(values![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(attribute.unregister_callback(&handle));
        attribute.set(values!["c"]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn apply_defers_callbacks_until_fired() {
        let ids = IdAllocator::new();
        let mut attribute = Attribute::new("name", values!["a"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _handle = attribute.register_callback(&ids, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let notification = attribute.apply(values!["b"]).unwrap();
        assert_eq!(attribute.get(), values!["b"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        notification.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_handle_unregisters() {
        let ids = IdAllocator::new();
        let mut attribute = Attribute::new("name", values!["a"]);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = attribute.register_callback(&ids, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(attribute.callback_count(), 1);

        drop(handle);
        assert_eq!(attribute.callback_count(), 0);
        attribute.set(values!["b"]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_outliving_attribute_is_harmless() {
        let ids = IdAllocator::new();
        let attribute = Attribute::new("name", values!["a"]);
        let handle = attribute.register_callback(&ids, |_, _| {});
        drop(attribute);
        assert!(!handle.is_valid());
    }
}
