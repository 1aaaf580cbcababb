//! Graph objects and their attribute maps.
//!
//! [`BaseObject`] holds what every node of the object graph shares: a name,
//! a map of attributes, a dirty flag and task queues. [`GraphObject`] adds an
//! arena id, type information, rendering priority, links to other objects
//! and an optional [`BufferObject`] component.
//!
//! Links are stored as [`ObjectId`] sets on both ends: an object knows the
//! ids it links to and the ids of the objects linking to it. The owning
//! [`RootObject`](crate::RootObject) resolves ids back to objects.
//!
//! ```
//! use splash_core::{values, GraphObject, SetAttrStatus, ValueType};
//! # use slotmap::SlotMap;
//! # let mut ids = SlotMap::<splash_core::ObjectId, ()>::with_key();
//!
//! let camera = GraphObject::builder("cam", "camera").build(ids.insert(()));
//! camera.add_attribute("fov", |args| args[0].as_f64().is_some(), vec![ValueType::Real]);
//!
//! assert_eq!(camera.set_attribute("fov", &values![50.0]), SetAttrStatus::Updated);
//! assert_eq!(camera.set_attribute("note", &values!["hi"]), SetAttrStatus::Created);
//! assert_eq!(camera.get_attribute("note"), Some(values!["hi"]));
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use slotmap::new_key_type;

use crate::attribute::{
    Attribute, AttributeDescription, CallbackHandle, CallbackOwner, GetFn, SetFn, SyncMethod,
};
use crate::buffer::BufferObject;
use crate::logging::targets;
use crate::task::{Clock, PeriodicTasks, SystemClock, TaskId, TaskQueue};
use crate::value::{Value, ValueType, Values};

new_key_type! {
    /// Process-local handle of a graph object in its root's arena.
    ///
    /// Ids stay valid until the object is disposed and are never reused for
    /// another object while any copy of the key is alive.
    pub struct ObjectId;
}

impl ObjectId {
    /// Convert the ObjectId to a raw u64 value.
    #[inline]
    pub fn as_raw(self) -> u64 {
        use slotmap::Key;
        self.data().as_ffi()
    }
}

/// Outcome of [`BaseObject::set_attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetAttrStatus {
    /// The attribute did not exist; it was created in default mode and set.
    Created,
    /// An existing attribute accepted the values.
    Updated,
    /// The attribute exists but is read-only.
    NoSetter,
    /// The attribute is locked or rejected the values.
    Failure,
}

impl SetAttrStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// State shared by every object of the graph, including roots.
pub struct BaseObject {
    name: String,
    attributes: RwLock<HashMap<String, Arc<Attribute>>>,
    updated_params: AtomicBool,
    tasks: TaskQueue,
    periodic_tasks: PeriodicTasks,
    async_tasks: Mutex<Vec<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl BaseObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            attributes: RwLock::new(HashMap::new()),
            updated_params: AtomicBool::new(false),
            tasks: TaskQueue::new(),
            periodic_tasks: PeriodicTasks::new(),
            async_tasks: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register an attribute, replacing any previous one with the same name.
    pub fn insert_attribute(&self, attribute: Attribute) -> Arc<Attribute> {
        attribute.set_owner_name(&self.name);
        let attribute = Arc::new(attribute);
        self.attributes
            .write()
            .insert(attribute.name().to_owned(), attribute.clone());
        attribute
    }

    /// Register an attribute driven by `set`, expecting `types`.
    pub fn add_attribute<S>(&self, name: &str, set: S, types: Vec<ValueType>) -> Arc<Attribute>
    where
        S: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.insert_attribute(Attribute::with_setter(name, set, types))
    }

    /// Register an attribute with both a setter and a getter.
    pub fn add_attribute_with_getter<S, G>(
        &self,
        name: &str,
        set: S,
        get: G,
        types: Vec<ValueType>,
    ) -> Arc<Attribute>
    where
        S: Fn(&[Value]) -> bool + Send + Sync + 'static,
        G: Fn() -> Values + Send + Sync + 'static,
    {
        self.insert_attribute(Attribute::with_accessors(name, set, get, types))
    }

    /// Register a read-only attribute.
    pub fn add_attribute_getter<G>(&self, name: &str, get: G) -> Arc<Attribute>
    where
        G: Fn() -> Values + Send + Sync + 'static,
    {
        self.insert_attribute(Attribute::with_getter(name, get))
    }

    /// Register an attribute from optional closures.
    pub fn add_attribute_functions(
        &self,
        name: &str,
        set: Option<SetFn>,
        get: Option<GetFn>,
        types: Vec<ValueType>,
    ) -> Arc<Attribute> {
        self.insert_attribute(Attribute::from_functions(name, set, get, types))
    }

    pub fn attribute(&self, name: &str) -> Option<Arc<Attribute>> {
        self.attributes.read().get(name).cloned()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.read().contains_key(name)
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        self.attributes.write().remove(name).is_some()
    }

    /// Names of all attributes, sorted.
    pub fn attributes_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Set an attribute, creating it in default mode if it does not exist.
    pub fn set_attribute(&self, name: &str, args: &[Value]) -> SetAttrStatus {
        let existing = self.attribute(name);
        let (attribute, created) = match existing {
            Some(attribute) => (attribute, false),
            None => match self.attributes.write().entry(name.to_owned()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => {
                    let attribute = Attribute::new(name);
                    attribute.set_owner_name(&self.name);
                    (entry.insert(Arc::new(attribute)).clone(), true)
                }
            },
        };

        if created {
            tracing::debug!(
                target: targets::OBJECT,
                object = %self.name,
                attribute = name,
                "created attribute on the fly"
            );
        }

        if !attribute.is_default() && !attribute.has_setter() {
            return SetAttrStatus::NoSetter;
        }

        // The map lock is released here so setters can reach other attributes.
        if !attribute.apply(args) {
            return SetAttrStatus::Failure;
        }

        if !attribute.is_default() {
            self.updated_params.store(true, Ordering::Release);
        }

        if created {
            SetAttrStatus::Created
        } else {
            SetAttrStatus::Updated
        }
    }

    /// Current values of an attribute, or `None` if it does not exist.
    pub fn get_attribute(&self, name: &str) -> Option<Values> {
        self.attribute(name).map(|attribute| attribute.query())
    }

    pub fn attribute_description(&self, name: &str) -> Option<String> {
        self.attribute(name).map(|attribute| attribute.description())
    }

    pub fn set_attribute_description(&self, name: &str, description: &str) -> bool {
        match self.attribute(name) {
            Some(attribute) => {
                attribute.set_description(description);
                true
            }
            None => false,
        }
    }

    /// Descriptions of all attributes, sorted by name.
    pub fn attributes_descriptions(&self) -> Vec<AttributeDescription> {
        let mut descriptions: Vec<AttributeDescription> = self
            .attributes
            .read()
            .values()
            .map(|attribute| AttributeDescription {
                name: attribute.name().to_owned(),
                description: attribute.description(),
                types: attribute.args_types(),
            })
            .collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    /// Synchronization hint of an attribute, [`SyncMethod::NoSync`] if unknown.
    pub fn attribute_sync_method(&self, name: &str) -> SyncMethod {
        self.attribute(name)
            .map(|attribute| attribute.sync_method())
            .unwrap_or_default()
    }

    pub fn set_attribute_sync_method(&self, name: &str, method: SyncMethod) -> bool {
        match self.attribute(name) {
            Some(attribute) => {
                attribute.set_sync_method(method);
                true
            }
            None => false,
        }
    }

    pub fn lock_attribute(&self, name: &str, values: &[Value]) -> bool {
        self.attribute(name)
            .is_some_and(|attribute| attribute.lock(values))
    }

    pub fn unlock_attribute(&self, name: &str) -> bool {
        match self.attribute(name) {
            Some(attribute) => {
                attribute.unlock();
                true
            }
            None => false,
        }
    }

    pub fn is_attribute_locked(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|attribute| attribute.is_locked())
    }

    /// Register a callback on `attribute`, unregistered through `owner`.
    ///
    /// Returns an invalid handle if the attribute does not exist.
    pub fn register_callback_with_owner<F>(
        &self,
        owner: Weak<dyn CallbackOwner>,
        attribute: &str,
        callback: F,
    ) -> CallbackHandle
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        match self.attribute(attribute) {
            Some(attribute) => attribute.register_callback(owner, callback),
            None => {
                tracing::warn!(
                    target: targets::OBJECT,
                    "{} - Cannot register a callback on missing attribute {}",
                    self.name,
                    attribute
                );
                CallbackHandle::invalid()
            }
        }
    }

    pub fn unregister_callback(&self, handle: &CallbackHandle) -> bool {
        self.attribute(handle.attribute_name())
            .is_some_and(|attribute| attribute.remove_callback(handle))
    }

    /// Whether a non-default attribute was set since the last
    /// [`set_not_updated`](Self::set_not_updated).
    pub fn params_updated(&self) -> bool {
        self.updated_params.load(Ordering::Acquire)
    }

    pub fn set_not_updated(&self) {
        self.updated_params.store(false, Ordering::Release);
    }

    /// Queue a one-shot task for the next [`run_tasks`](Self::run_tasks).
    pub fn add_task<F>(&self, task: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.tasks.post(task)
    }

    /// Add or replace a named recurring task.
    ///
    /// Fails, without deadlocking, when called from inside a recurring task.
    pub fn add_periodic_task<F>(&self, name: &str, period_ms: u32, task: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let added = self.periodic_tasks.add(name, period_ms, task);
        if !added {
            tracing::warn!(
                target: targets::TASK,
                "{} - A periodic task cannot add another periodic task",
                self.name
            );
        }
        added
    }

    pub fn remove_periodic_task(&self, name: &str) -> bool {
        self.periodic_tasks.remove(name)
    }

    pub fn has_periodic_task(&self, name: &str) -> bool {
        self.periodic_tasks.contains(name)
    }

    /// Run `task` on its own thread. Finished threads are reaped by
    /// [`run_tasks`](Self::run_tasks).
    pub fn run_async_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name(format!("splash-async-{}", self.name))
            .spawn(task);
        match spawned {
            Ok(handle) => {
                self.async_tasks.lock().push(handle);
                true
            }
            Err(err) => {
                tracing::warn!(
                    target: targets::TASK,
                    "{} - Unable to spawn async task: {}",
                    self.name,
                    err
                );
                false
            }
        }
    }

    pub fn pending_async_tasks(&self) -> usize {
        self.async_tasks.lock().len()
    }

    /// Run queued one-shot tasks, then due recurring tasks.
    pub fn run_tasks(&self) {
        self.tasks.run_all();
        self.periodic_tasks.run_due(self.clock.as_ref());
        self.reap_async_tasks();
    }

    fn reap_async_tasks(&self) {
        let finished: Vec<JoinHandle<()>> = {
            let mut handles = self.async_tasks.lock();
            let (finished, running): (Vec<_>, Vec<_>) =
                handles.drain(..).partition(|h| h.is_finished());
            *handles = running;
            finished
        };
        for handle in finished {
            if handle.join().is_err() {
                tracing::warn!(target: targets::TASK, "{} - Async task panicked", self.name);
            }
        }
    }
}

impl Drop for BaseObject {
    fn drop(&mut self) {
        let current = thread::current().id();
        for handle in self.async_tasks.get_mut().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for BaseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseObject")
            .field("name", &self.name)
            .field("attributes", &self.attributes_list())
            .field("updated", &self.params_updated())
            .finish_non_exhaustive()
    }
}

/// Rendering order class. Lower values render first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum Priority {
    NoRender = -1,
    #[default]
    Media = 5,
    Blending = 10,
    PreFilter = 15,
    Filter = 20,
    PreCamera = 25,
    Camera = 30,
    PostCamera = 35,
    Warp = 40,
    Gui = 45,
    Window = 50,
    PostWindow = 55,
}

/// Grouping used by user interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Category {
    #[default]
    Misc,
    Image,
    Mesh,
    Texture,
}

/// Type-specific side effects of linking.
///
/// `link_it` runs before the link is recorded; returning `false` cancels it.
pub trait LinkHook: Send + Sync {
    fn link_it(&self, object: &GraphObject, target: &GraphObject) -> bool {
        let _ = (object, target);
        true
    }

    fn unlink_it(&self, object: &GraphObject, target: &GraphObject) {
        let _ = (object, target);
    }
}

/// Builder for [`GraphObject`].
pub struct GraphObjectBuilder {
    name: String,
    type_name: String,
    category: Category,
    priority: Priority,
    buffer: Option<Arc<dyn BufferObject>>,
    hook: Option<Arc<dyn LinkHook>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GraphObjectBuilder {
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn buffer(mut self, buffer: Arc<dyn BufferObject>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn link_hook(mut self, hook: Arc<dyn LinkHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self, id: ObjectId) -> Arc<GraphObject> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let object = Arc::new_cyclic(|self_ref| GraphObject {
            id,
            base: BaseObject::with_clock(self.name, clock),
            self_ref: self_ref.clone(),
            type_name: self.type_name,
            remote_type: RwLock::new(None),
            alias: RwLock::new(String::new()),
            category: self.category,
            priority: RwLock::new(self.priority),
            priority_shift: AtomicI32::new(0),
            savable: AtomicBool::new(true),
            linked: Mutex::new(Vec::new()),
            parents: Mutex::new(Vec::new()),
            buffer: self.buffer,
            hook: self.hook,
        });
        object.register_builtin_attributes();
        object
    }
}

/// A node of the object graph.
pub struct GraphObject {
    id: ObjectId,
    base: BaseObject,
    self_ref: Weak<GraphObject>,
    type_name: String,
    remote_type: RwLock<Option<String>>,
    alias: RwLock<String>,
    category: Category,
    priority: RwLock<Priority>,
    priority_shift: AtomicI32,
    savable: AtomicBool,
    linked: Mutex<Vec<ObjectId>>,
    parents: Mutex<Vec<ObjectId>>,
    buffer: Option<Arc<dyn BufferObject>>,
    hook: Option<Arc<dyn LinkHook>>,
}

impl GraphObject {
    pub fn builder(name: impl Into<String>, type_name: impl Into<String>) -> GraphObjectBuilder {
        GraphObjectBuilder {
            name: name.into(),
            type_name: type_name.into(),
            category: Category::default(),
            priority: Priority::default(),
            buffer: None,
            hook: None,
            clock: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn base(&self) -> &BaseObject {
        &self.base
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn remote_type(&self) -> Option<String> {
        self.remote_type.read().clone()
    }

    /// Mark this object as mirroring a remote object of type `remote_type`.
    pub fn set_remote_type(&self, remote_type: &str) {
        *self.remote_type.write() = Some(remote_type.to_owned());
    }

    pub fn is_connected_to_remote(&self) -> bool {
        self.remote_type.read().is_some()
    }

    /// Display name, falling back to the object name.
    pub fn alias(&self) -> String {
        let alias = self.alias.read();
        if alias.is_empty() {
            self.base.name().to_owned()
        } else {
            alias.clone()
        }
    }

    pub fn set_alias(&self, alias: &str) {
        *self.alias.write() = alias.to_owned();
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn is_savable(&self) -> bool {
        self.savable.load(Ordering::Relaxed)
    }

    pub fn set_savable(&self, savable: bool) {
        self.savable.store(savable, Ordering::Relaxed);
    }

    pub fn priority(&self) -> Priority {
        *self.priority.read()
    }

    /// Change the priority class. Only classes from `PreCamera` up to, but
    /// excluding, `PostWindow` are accepted.
    pub fn set_rendering_priority(&self, priority: Priority) -> bool {
        if priority < Priority::PreCamera || priority >= Priority::PostWindow {
            return false;
        }
        *self.priority.write() = priority;
        true
    }

    pub fn priority_shift(&self) -> i32 {
        self.priority_shift.load(Ordering::Relaxed)
    }

    pub fn set_priority_shift(&self, shift: i32) {
        self.priority_shift.store(shift, Ordering::Relaxed);
    }

    /// Priority class plus shift.
    pub fn rendering_priority(&self) -> i32 {
        self.priority() as i32 + self.priority_shift()
    }

    pub fn buffer(&self) -> Option<&Arc<dyn BufferObject>> {
        self.buffer.as_ref()
    }

    /// Attribute or buffer changes since the last [`set_not_updated`](Self::set_not_updated).
    pub fn was_updated(&self) -> bool {
        self.base.params_updated() || self.buffer.as_ref().is_some_and(|b| b.was_updated())
    }

    pub fn set_not_updated(&self) {
        self.base.set_not_updated();
        if let Some(buffer) = &self.buffer {
            buffer.set_not_updated();
        }
    }

    /// Register a callback on one of this object's attributes.
    ///
    /// Returns an invalid handle if the attribute does not exist.
    pub fn register_callback<F>(&self, attribute: &str, callback: F) -> CallbackHandle
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let owner: Weak<dyn CallbackOwner> = self.self_ref.clone();
        self.base.register_callback_with_owner(owner, attribute, callback)
    }

    /// Link this object to `target`.
    ///
    /// Returns `true` if the link exists afterwards. Linking twice is a no-op,
    /// self-links and links refused by the hook return `false`.
    pub fn link_to(&self, target: &GraphObject) -> bool {
        if target.id == self.id {
            return false;
        }
        if self.is_linked_to(target.id) {
            return true;
        }
        if let Some(hook) = &self.hook {
            if !hook.link_it(self, target) {
                tracing::debug!(
                    target: targets::OBJECT,
                    "{} - Link to {} refused",
                    self.name(),
                    target.name()
                );
                return false;
            }
        }

        {
            let mut linked = self.linked.lock();
            if linked.contains(&target.id) {
                return true;
            }
            linked.push(target.id);
        }
        target.parents.lock().push(self.id);
        true
    }

    /// Remove the link to `target`. Returns `false` if there was none.
    pub fn unlink_from(&self, target: &GraphObject) -> bool {
        let removed = {
            let mut linked = self.linked.lock();
            let before = linked.len();
            linked.retain(|id| *id != target.id);
            before != linked.len()
        };
        if !removed {
            return false;
        }
        target.parents.lock().retain(|id| *id != self.id);
        if let Some(hook) = &self.hook {
            hook.unlink_it(self, target);
        }
        true
    }

    pub fn is_linked_to(&self, target: ObjectId) -> bool {
        self.linked.lock().contains(&target)
    }

    /// Ids of the objects this object links to.
    pub fn linked_objects(&self) -> Vec<ObjectId> {
        self.linked.lock().clone()
    }

    /// Ids of the objects linking to this object.
    pub fn parents(&self) -> Vec<ObjectId> {
        self.parents.lock().clone()
    }

    /// Forget a disposed object on both link sets without running hooks.
    pub(crate) fn forget(&self, id: ObjectId) {
        self.linked.lock().retain(|linked| *linked != id);
        self.parents.lock().retain(|parent| *parent != id);
    }

    fn register_builtin_attributes(&self) {
        let weak = self.self_ref.clone();
        self.base
            .add_attribute_with_getter(
                "alias",
                {
                    let weak = weak.clone();
                    move |args| match (weak.upgrade(), args[0].as_str()) {
                        (Some(object), Some(alias)) => {
                            object.set_alias(alias);
                            true
                        }
                        _ => false,
                    }
                },
                {
                    let weak = weak.clone();
                    move || weak.upgrade().map(|o| vec![Value::from(o.alias())]).unwrap_or_default()
                },
                vec![ValueType::String],
            )
            .set_description("Alias name");

        self.base
            .add_attribute_with_getter(
                "savable",
                {
                    let weak = weak.clone();
                    move |args| match (weak.upgrade(), args[0].as_bool()) {
                        (Some(object), Some(savable)) => {
                            object.set_savable(savable);
                            true
                        }
                        _ => false,
                    }
                },
                {
                    let weak = weak.clone();
                    move || {
                        weak.upgrade()
                            .map(|o| vec![Value::from(o.is_savable())])
                            .unwrap_or_default()
                    }
                },
                vec![ValueType::Integer],
            )
            .set_description("If true, the object is saved in the configuration file");

        self.base
            .add_attribute_with_getter(
                "priorityShift",
                {
                    let weak = weak.clone();
                    move |args| match (weak.upgrade(), args[0].as_i64()) {
                        (Some(object), Some(shift)) => match i32::try_from(shift) {
                            Ok(shift) => {
                                object.set_priority_shift(shift);
                                true
                            }
                            Err(_) => {
                                tracing::warn!(
                                    target: targets::OBJECT,
                                    "{} - Priority shift {} is out of range",
                                    object.name(),
                                    shift
                                );
                                false
                            }
                        },
                        _ => false,
                    }
                },
                {
                    let weak = weak.clone();
                    move || {
                        weak.upgrade()
                            .map(|o| vec![Value::from(o.priority_shift())])
                            .unwrap_or_default()
                    }
                },
                vec![ValueType::Integer],
            )
            .set_description(
                "Shift to the default rendering priority, for objects that must render in a \
                 specific order. Higher value means lower priority",
            );

        self.base
            .add_attribute(
                "switchLock",
                move |args| {
                    let (Some(object), Some(name)) = (weak.upgrade(), args[0].as_str()) else {
                        return false;
                    };
                    let Some(attribute) = object.attribute(name) else {
                        return false;
                    };
                    let status = if attribute.is_locked() {
                        attribute.unlock();
                        "Unlocked"
                    } else {
                        attribute.lock(&[]);
                        "Locked"
                    };
                    tracing::info!(
                        target: targets::OBJECT,
                        "{}~~{} - {}",
                        object.name(),
                        name,
                        status
                    );
                    true
                },
                vec![ValueType::String],
            )
            .set_description("Lock the given attribute, or unlock it if already locked");
    }
}

impl Deref for GraphObject {
    type Target = BaseObject;

    fn deref(&self) -> &BaseObject {
        &self.base
    }
}

impl CallbackOwner for GraphObject {
    fn unregister_callback(&self, handle: &CallbackHandle) -> bool {
        self.base.unregister_callback(handle)
    }
}

impl fmt::Debug for GraphObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphObject")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("type", &self.type_name)
            .field("priority", &self.priority())
            .field("linked", &self.linked_objects())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BlobObject, SerializedObject};
    use crate::task::ManualClock;
    use crate::values;
    use slotmap::SlotMap;
    use std::sync::atomic::AtomicUsize;

    struct Ids(SlotMap<ObjectId, ()>);

    impl Ids {
        fn new() -> Self {
            Self(SlotMap::with_key())
        }

        fn object(&mut self, name: &str) -> Arc<GraphObject> {
            GraphObject::builder(name, "test").build(self.0.insert(()))
        }
    }

    #[test]
    fn test_set_attribute_statuses() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.add_attribute("typed", |_| true, vec![ValueType::Real]);
        object.add_attribute_getter("readonly", || values![1]);

        assert_eq!(object.set_attribute("dynamic", &values![1]), SetAttrStatus::Created);
        assert_eq!(object.set_attribute("dynamic", &values![2]), SetAttrStatus::Updated);
        assert_eq!(object.set_attribute("typed", &values![1.0]), SetAttrStatus::Updated);
        assert_eq!(object.set_attribute("typed", &values!["x"]), SetAttrStatus::Failure);
        assert_eq!(object.set_attribute("readonly", &values![2]), SetAttrStatus::NoSetter);
        assert!(SetAttrStatus::Created.is_success());
        assert!(!SetAttrStatus::NoSetter.is_success());
    }

    #[test]
    fn test_get_attribute_absent_vs_empty() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        assert_eq!(object.get_attribute("missing"), None);

        object.set_attribute("empty", &[]);
        assert_eq!(object.get_attribute("empty"), Some(Values::new()));
    }

    #[test]
    fn test_dirty_flag_only_for_non_default() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.set_not_updated();

        object.set_attribute("dynamic", &values![1]);
        assert!(!object.was_updated());

        object.add_attribute("typed", |_| true, vec![]);
        object.set_attribute("typed", &values![1]);
        assert!(object.was_updated());

        object.set_not_updated();
        assert!(!object.was_updated());

        object.add_attribute("rejecting", |_| false, vec![]);
        object.set_attribute("rejecting", &values![1]);
        assert!(!object.was_updated());
    }

    #[test]
    fn test_add_attribute_overwrites() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.add_attribute("a", |_| false, vec![]);
        object.add_attribute("a", |_| true, vec![]);
        assert_eq!(object.set_attribute("a", &values![1]), SetAttrStatus::Updated);
        assert_eq!(object.attribute("a").map(|a| a.owner_name()), Some("obj".to_owned()));
    }

    #[test]
    fn test_attribute_metadata_accessors() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.add_attribute("gain", |_| true, vec![ValueType::Real, ValueType::Integer]);

        assert!(object.set_attribute_description("gain", "Gain factor"));
        assert!(!object.set_attribute_description("nope", "x"));
        assert_eq!(object.attribute_description("gain").as_deref(), Some("Gain factor"));

        assert_eq!(object.attribute_sync_method("gain"), SyncMethod::NoSync);
        assert!(object.set_attribute_sync_method("gain", SyncMethod::ForceSync));
        assert_eq!(object.attribute_sync_method("gain"), SyncMethod::ForceSync);

        let descriptions = object.attributes_descriptions();
        let gain = descriptions.iter().find(|d| d.name == "gain").unwrap();
        assert_eq!(gain.types, vec![ValueType::Real, ValueType::Integer]);
        assert_eq!(gain.description, "Gain factor");

        assert!(object.has_attribute("gain"));
        assert!(object.remove_attribute("gain"));
        assert!(!object.has_attribute("gain"));
        assert!(!object.remove_attribute("gain"));
    }

    #[test]
    fn test_builtin_attributes() {
        let mut ids = Ids::new();
        let object = ids.object("screen");
        let list = object.attributes_list();
        for name in ["alias", "priorityShift", "savable", "switchLock"] {
            assert!(list.contains(&name.to_owned()), "missing {name}");
        }

        assert_eq!(object.get_attribute("alias"), Some(values!["screen"]));
        object.set_attribute("alias", &values!["Left screen"]);
        assert_eq!(object.alias(), "Left screen");

        object.set_attribute("priorityShift", &values![3]);
        assert_eq!(object.rendering_priority(), Priority::Media as i32 + 3);
        assert!(!object.set_attribute("priorityShift", &values![i64::MAX]).is_success());
        assert!(!object.set_attribute("priorityShift", &values![i64::from(i32::MIN) - 1]).is_success());
        assert_eq!(object.get_attribute("priorityShift"), Some(values![3]));

        object.set_attribute("savable", &values![0]);
        assert!(!object.is_savable());
    }

    #[test]
    fn test_switch_lock() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.set_attribute("value", &values![1]);

        assert!(object.set_attribute("switchLock", &values!["value"]).is_success());
        assert!(object.is_attribute_locked("value"));
        assert_eq!(object.set_attribute("value", &values![2]), SetAttrStatus::Failure);

        object.set_attribute("switchLock", &values!["value"]);
        assert!(!object.is_attribute_locked("value"));
        assert_eq!(object.set_attribute("switchLock", &values!["nope"]), SetAttrStatus::Failure);
    }

    #[test]
    fn test_rendering_priority_bounds() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        assert!(!object.set_rendering_priority(Priority::Media));
        assert!(!object.set_rendering_priority(Priority::PostWindow));
        assert!(object.set_rendering_priority(Priority::Camera));
        assert_eq!(object.priority(), Priority::Camera);
        object.set_priority_shift(-2);
        assert_eq!(object.rendering_priority(), 28);
        assert!(Priority::NoRender < Priority::Media);
        assert!(Priority::Window < Priority::PostWindow);
    }

    #[test]
    fn test_remote_type() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        assert!(!object.is_connected_to_remote());
        object.set_remote_type("image_ffmpeg");
        assert!(object.is_connected_to_remote());
        assert_eq!(object.remote_type().as_deref(), Some("image_ffmpeg"));
    }

    #[test]
    fn test_link_symmetry() {
        let mut ids = Ids::new();
        let a = ids.object("a");
        let b = ids.object("b");

        assert!(a.link_to(&b));
        assert!(a.link_to(&b));
        assert_eq!(a.linked_objects(), vec![b.id()]);
        assert_eq!(b.parents(), vec![a.id()]);

        assert!(a.unlink_from(&b));
        assert!(a.linked_objects().is_empty());
        assert!(b.parents().is_empty());
        assert!(!a.unlink_from(&b));
        assert!(!a.link_to(&a));
    }

    struct RefuseImages;

    impl LinkHook for RefuseImages {
        fn link_it(&self, _object: &GraphObject, target: &GraphObject) -> bool {
            target.type_name() != "image"
        }
    }

    #[test]
    fn test_link_hook_refusal() {
        let mut slots = SlotMap::<ObjectId, ()>::with_key();
        let camera = GraphObject::builder("cam", "camera")
            .link_hook(Arc::new(RefuseImages))
            .build(slots.insert(()));
        let image = GraphObject::builder("img", "image").build(slots.insert(()));
        let mesh = GraphObject::builder("mesh", "mesh").build(slots.insert(()));

        assert!(!camera.link_to(&image));
        assert!(image.parents().is_empty());
        assert!(camera.link_to(&mesh));
        assert_eq!(mesh.parents(), vec![camera.id()]);
    }

    #[test]
    fn test_callback_handles() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.set_attribute("value", &values![0]);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let handle = object.register_callback("value", move |owner, attribute| {
            assert_eq!((owner, attribute), ("obj", "value"));
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_valid());

        object.set_attribute("value", &values![1]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(handle);
        object.set_attribute("value", &values![2]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(!object.register_callback("missing", |_, _| {}).is_valid());
    }

    #[test]
    fn test_handle_inert_after_object_dropped() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        object.set_attribute("value", &values![0]);
        let mut handle = object.register_callback("value", |_, _| {});
        drop(object);
        assert!(!handle.unregister());
    }

    #[test]
    fn test_task_deferral() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        let counter = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&object);
        let c = counter.clone();
        object.add_task(move || {
            if let Some(object) = weak.upgrade() {
                let c = c.clone();
                object.add_task(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        object.run_tasks();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        object.run_tasks();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_periodic_reentrancy_guard() {
        let clock = Arc::new(ManualClock::new(0));
        let mut slots = SlotMap::<ObjectId, ()>::with_key();
        let object = GraphObject::builder("obj", "test")
            .clock(clock.clone())
            .build(slots.insert(()));
        let runs = Arc::new(AtomicUsize::new(0));
        let refused = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&object);
        let (r, f) = (runs.clone(), refused.clone());
        assert!(object.add_periodic_task("outer", 0, move || {
            r.fetch_add(1, Ordering::SeqCst);
            if let Some(object) = weak.upgrade() {
                if !object.add_periodic_task("inner", 0, || {}) {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        object.run_tasks();
        object.run_tasks();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(refused.load(Ordering::SeqCst), 2);
        assert!(object.has_periodic_task("outer"));
        assert!(!object.has_periodic_task("inner"));
        assert!(object.remove_periodic_task("outer"));
    }

    #[test]
    fn test_async_tasks_are_reaped() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        assert!(object.run_async_task(move || d.store(true, Ordering::SeqCst)));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while object.pending_async_tasks() > 0 && std::time::Instant::now() < deadline {
            object.run_tasks();
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(object.pending_async_tasks(), 0);
    }

    #[test]
    fn test_buffer_component_updates() {
        let mut slots = SlotMap::<ObjectId, ()>::with_key();
        let blob = Arc::new(BlobObject::new());
        let object = GraphObject::builder("frame", "blob")
            .category(Category::Image)
            .buffer(blob.clone())
            .build(slots.insert(()));
        object.set_not_updated();

        let buffer = object.buffer().unwrap();
        buffer.set_serialized_object(SerializedObject::from_vec(vec![1, 2, 3]));
        buffer.deserialize_staged();
        assert!(object.was_updated());
        assert_eq!(blob.data().as_ref(), &[1, 2, 3]);

        object.set_not_updated();
        assert!(!blob.was_updated());
        assert_eq!(object.category(), Category::Image);
    }

    #[test]
    fn test_concurrent_set_attribute() {
        let mut ids = Ids::new();
        let object = ids.object("obj");
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let object = object.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        object.set_attribute(&format!("attr{}", i % 10), &values![t, i]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..10 {
            assert!(object.has_attribute(&format!("attr{i}")));
        }
    }
}
