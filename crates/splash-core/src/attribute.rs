//! Named, type-checked attributes.
//!
//! An [`Attribute`] wraps an optional setter and getter closure together with
//! the metadata the rest of the system needs to drive it remotely: expected
//! argument types, a lock flag, a persistence hint, a synchronization hint
//! and a set of change callbacks.
//!
//! When neither a setter nor a getter is supplied the attribute runs in
//! *default mode*: it stores whatever it is given and returns it on query,
//! recording the type tags of the last stored arguments.
//!
//! ```
//! use std::sync::Arc;
//! use splash_core::{values, Attribute, ValueType};
//!
//! let gamma = Arc::new(Attribute::with_setter(
//!     "gamma",
//!     |args| args[0].as_f64().is_some_and(|g| g > 0.0),
//!     vec![ValueType::Real],
//! ));
//!
//! assert!(gamma.apply(&values![2.2]));
//! assert!(!gamma.apply(&values!["2.2"]));
//! assert!(!gamma.apply(&values![]));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::logging::targets;
use crate::value::{types_of, Value, ValueType, Values};

/// Setter closure: receives the arguments, returns whether they were accepted.
pub type SetFn = Box<dyn Fn(&[Value]) -> bool + Send + Sync + 'static>;

/// Getter closure.
pub type GetFn = Box<dyn Fn() -> Values + Send + Sync + 'static>;

/// Change callback, called with `(owner_name, attribute_name)`.
pub type Callback = Arc<dyn Fn(&str, &str) + Send + Sync + 'static>;

/// How updates to an attribute should be propagated to other processes.
///
/// This is a hint for the owning root. The attribute itself never acts on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncMethod {
    /// Let the transport decide.
    #[default]
    NoSync,
    /// Always apply synchronously.
    ForceSync,
    /// Always apply asynchronously.
    ForceAsync,
}

/// Global counter for callback ids. Never reused within a process.
static NEXT_CALLBACK_ID: AtomicU32 = AtomicU32::new(1);

fn next_callback_id() -> u32 {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something that callbacks can be unregistered from.
///
/// Implemented by [`Attribute`] itself and by graph objects, which forward to
/// the attribute named in the handle.
pub trait CallbackOwner: Send + Sync {
    /// Remove the callback identified by `handle`. Returns `false` if it was
    /// not registered.
    fn unregister_callback(&self, handle: &CallbackHandle) -> bool;
}

/// RAII token for a registered callback.
///
/// Dropping a valid handle unregisters the callback. If the owner is already
/// gone the drop does nothing.
pub struct CallbackHandle {
    id: u32,
    valid: bool,
    owner: Weak<dyn CallbackOwner>,
    attribute: String,
}

impl CallbackHandle {
    fn new(id: u32, owner: Weak<dyn CallbackOwner>, attribute: &str) -> Self {
        Self {
            id,
            valid: true,
            owner,
            attribute: attribute.to_owned(),
        }
    }

    /// A handle that refers to nothing, returned when registration fails.
    pub fn invalid() -> Self {
        Self {
            id: 0,
            valid: false,
            owner: Weak::<Attribute>::new(),
            attribute: String::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Name of the attribute this handle is bound to.
    pub fn attribute_name(&self) -> &str {
        &self.attribute
    }

    /// Unregister now instead of on drop.
    ///
    /// Returns `false` if the handle was already released or its owner is gone.
    pub fn unregister(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.valid = false;
        match self.owner.upgrade() {
            Some(owner) => owner.unregister_callback(self),
            None => false,
        }
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("valid", &self.valid)
            .field("attribute", &self.attribute)
            .finish()
    }
}

/// Stored arguments and expected types.
#[derive(Default)]
struct AttributeState {
    values: Values,
    types: Vec<ValueType>,
}

/// A named property of an object.
pub struct Attribute {
    name: String,
    owner_name: RwLock<String>,
    set_fn: Option<SetFn>,
    get_fn: Option<GetFn>,
    default_mode: bool,
    state: Mutex<AttributeState>,
    locked: AtomicBool,
    savable: AtomicBool,
    sync_method: RwLock<SyncMethod>,
    description: RwLock<String>,
    callbacks: Mutex<BTreeMap<u32, Callback>>,
}

impl Attribute {
    /// Create a default-mode attribute that stores and returns its values.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_functions(name, None, None, Vec::new())
    }

    /// Create an attribute driven by a setter, checking arguments against `types`.
    pub fn with_setter<S>(name: impl Into<String>, set: S, types: Vec<ValueType>) -> Self
    where
        S: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        Self::from_functions(name, Some(Box::new(set)), None, types)
    }

    /// Create a read-only attribute.
    pub fn with_getter<G>(name: impl Into<String>, get: G) -> Self
    where
        G: Fn() -> Values + Send + Sync + 'static,
    {
        Self::from_functions(name, None, Some(Box::new(get)), Vec::new())
    }

    /// Create an attribute with both a setter and a getter.
    pub fn with_accessors<S, G>(
        name: impl Into<String>,
        set: S,
        get: G,
        types: Vec<ValueType>,
    ) -> Self
    where
        S: Fn(&[Value]) -> bool + Send + Sync + 'static,
        G: Fn() -> Values + Send + Sync + 'static,
    {
        Self::from_functions(name, Some(Box::new(set)), Some(Box::new(get)), types)
    }

    /// General constructor. The attribute is in default mode when both
    /// closures are absent.
    pub fn from_functions(
        name: impl Into<String>,
        set_fn: Option<SetFn>,
        get_fn: Option<GetFn>,
        types: Vec<ValueType>,
    ) -> Self {
        let default_mode = set_fn.is_none() && get_fn.is_none();
        Self {
            name: name.into(),
            owner_name: RwLock::new(String::new()),
            set_fn,
            get_fn,
            default_mode,
            state: Mutex::new(AttributeState {
                values: Values::new(),
                types,
            }),
            locked: AtomicBool::new(false),
            savable: AtomicBool::new(true),
            sync_method: RwLock::new(SyncMethod::default()),
            description: RwLock::new(String::new()),
            callbacks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_name(&self) -> String {
        self.owner_name.read().clone()
    }

    /// Set the name of the owning object, used in diagnostics and callbacks.
    pub fn set_owner_name(&self, owner: &str) {
        *self.owner_name.write() = owner.to_owned();
    }

    /// Whether the attribute stores its own values (no setter, no getter).
    pub fn is_default(&self) -> bool {
        self.default_mode
    }

    pub fn has_setter(&self) -> bool {
        self.set_fn.is_some()
    }

    pub fn has_getter(&self) -> bool {
        self.get_fn.is_some()
    }

    /// Apply arguments to the attribute.
    ///
    /// Fails without side effects when locked. Otherwise every registered
    /// callback runs once, then the arguments are stored (default mode) or
    /// checked and passed to the setter.
    pub fn apply(&self, args: &[Value]) -> bool {
        if self.is_locked() {
            return false;
        }

        self.fire_callbacks();

        let Some(set_fn) = &self.set_fn else {
            if !self.default_mode {
                return false;
            }
            let mut state = self.state.lock();
            state.values = args.to_vec();
            state.types = types_of(args);
            return true;
        };

        let expected = self.state.lock().types.clone();
        if args.len() < expected.len() {
            tracing::warn!(
                target: targets::ATTRIBUTE,
                "{}~~{} - Wrong number of arguments ({} instead of {})",
                self.owner_name(),
                self.name,
                args.len(),
                expected.len()
            );
            return false;
        }

        for (i, (arg, ty)) in args.iter().zip(expected.iter()).enumerate() {
            let got = arg.value_type();
            if !ty.accepts(got) {
                tracing::warn!(
                    target: targets::ATTRIBUTE,
                    "{}~~{} - Argument {} is of wrong type {}, expected {}",
                    self.owner_name(),
                    self.name,
                    i,
                    got,
                    ty
                );
                return false;
            }
        }

        set_fn(args)
    }

    /// Current values of the attribute.
    pub fn query(&self) -> Values {
        match &self.get_fn {
            Some(get_fn) => get_fn(),
            None if self.default_mode => self.state.lock().values.clone(),
            None => Values::new(),
        }
    }

    /// Expected argument types, or the types of the last stored values in
    /// default mode.
    pub fn args_types(&self) -> Vec<ValueType> {
        self.state.lock().types.clone()
    }

    /// Lock the attribute, optionally applying `values` first.
    ///
    /// If applying fails the attribute stays unlocked.
    pub fn lock(&self, values: &[Value]) -> bool {
        if !values.is_empty() && !self.apply(values) {
            return false;
        }
        self.locked.store(true, Ordering::Release);
        true
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn is_savable(&self) -> bool {
        self.savable.load(Ordering::Relaxed)
    }

    pub fn set_savable(&self, savable: bool) {
        self.savable.store(savable, Ordering::Relaxed);
    }

    pub fn sync_method(&self) -> SyncMethod {
        *self.sync_method.read()
    }

    pub fn set_sync_method(&self, method: SyncMethod) {
        *self.sync_method.write() = method;
    }

    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.write() = description.into();
    }

    /// Register a change callback.
    ///
    /// `owner` is what the returned handle will unregister through when it is
    /// dropped; pass the attribute itself or the object holding it.
    pub fn register_callback<F>(&self, owner: Weak<dyn CallbackOwner>, callback: F) -> CallbackHandle
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let id = next_callback_id();
        self.callbacks.lock().insert(id, Arc::new(callback));
        CallbackHandle::new(id, owner, &self.name)
    }

    /// Remove a callback by handle id.
    pub fn remove_callback(&self, handle: &CallbackHandle) -> bool {
        self.callbacks.lock().remove(&handle.id()).is_some()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn fire_callbacks(&self) {
        // Snapshot so callbacks can touch this attribute.
        let callbacks: Vec<Callback> = self.callbacks.lock().values().cloned().collect();
        if callbacks.is_empty() {
            return;
        }
        let owner = self.owner_name();
        for callback in callbacks {
            callback(&owner, &self.name);
        }
    }
}

impl CallbackOwner for Attribute {
    fn unregister_callback(&self, handle: &CallbackHandle) -> bool {
        self.remove_callback(handle)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("default", &self.default_mode)
            .field("locked", &self.is_locked())
            .field("types", &self.args_types())
            .finish_non_exhaustive()
    }
}

/// Description entry returned by `attributes_descriptions`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescription {
    pub name: String,
    pub description: String,
    pub types: Vec<ValueType>,
}
