//! Root objects: the per-process owner of the object graph.
//!
//! A [`RootObject`] owns every [`GraphObject`] of its process in a slotmap
//! arena, creates them from registered [`ObjectKind`]s, applies incoming
//! attribute changes (immediately or on the next [`run_tasks`](RootObject::run_tasks))
//! and forwards outgoing traffic to an attached [`Transport`].
//!
//! Roots talk to each other through two seams: [`LinkPeer`], implemented by
//! the root and called by a transport when something arrives, and
//! [`Transport`], implemented by the transport and called by the root.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use slotmap::SlotMap;

use crate::attribute::{AttributeDescription, CallbackHandle, CallbackOwner, SyncMethod};
use crate::buffer::{BufferObject, SerializedObject};
use crate::error::{ObjectError, ObjectResult};
use crate::logging::targets;
use crate::object::{BaseObject, Category, GraphObject, LinkHook, ObjectId, Priority, SetAttrStatus};
use crate::task::{Clock, SystemClock};
use crate::value::{Value, ValueType, Values};

/// Reserved target name addressing every peer.
pub const ALL_PEERS: &str = "__ALL__";

/// Receiving side of a transport.
pub trait LinkPeer: Send + Sync {
    fn peer_name(&self) -> String;

    /// Apply an attribute change to the named object.
    fn set(&self, name: &str, attribute: &str, values: &[Value], is_async: bool) -> bool;

    /// Hand a serialized buffer to the named object.
    fn set_from_serialized_object(&self, name: &str, object: SerializedObject) -> bool;
}

/// Sending side of a transport.
pub trait Transport: Send + Sync {
    fn send_message(&self, target: &str, attribute: &str, values: &[Value]) -> bool;

    fn send_buffer(&self, target: &str, buffer: SerializedObject) -> bool;
}

type BufferFactory = Arc<dyn Fn(Arc<dyn Clock>) -> Arc<dyn BufferObject> + Send + Sync>;
type HookFactory = Arc<dyn Fn() -> Arc<dyn LinkHook> + Send + Sync>;
type InitFn = Arc<dyn Fn(&Arc<GraphObject>) + Send + Sync>;
type SerializedHandler = Arc<dyn Fn(&str, SerializedObject) -> bool + Send + Sync>;

/// Factory entry describing how to build objects of one type.
#[derive(Clone)]
pub struct ObjectKind {
    type_name: String,
    category: Category,
    priority: Priority,
    buffer: Option<BufferFactory>,
    hook: Option<HookFactory>,
    init: Option<InitFn>,
}

impl ObjectKind {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            category: Category::default(),
            priority: Priority::default(),
            buffer: None,
            hook: None,
            init: None,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Give objects of this kind a buffer component.
    pub fn with_buffer<F>(mut self, factory: F) -> Self
    where
        F: Fn(Arc<dyn Clock>) -> Arc<dyn BufferObject> + Send + Sync + 'static,
    {
        self.buffer = Some(Arc::new(factory));
        self
    }

    pub fn with_link_hook<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn LinkHook> + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(factory));
        self
    }

    /// Run `init` on every new object, typically to declare attributes.
    pub fn on_create<F>(mut self, init: F) -> Self
    where
        F: Fn(&Arc<GraphObject>) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    fn build(&self, name: &str, id: ObjectId, clock: &Arc<dyn Clock>) -> Arc<GraphObject> {
        let mut builder = GraphObject::builder(name, self.type_name.as_str())
            .category(self.category)
            .priority(self.priority)
            .clock(clock.clone());
        if let Some(factory) = &self.buffer {
            builder = builder.buffer(factory(clock.clone()));
        }
        if let Some(factory) = &self.hook {
            builder = builder.link_hook(factory());
        }
        builder.build(id)
    }
}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectKind")
            .field("type_name", &self.type_name)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("buffer", &self.buffer.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct AnswerState {
    expected: Option<String>,
    received: Option<Values>,
}

/// Owner of a process's object graph.
pub struct RootObject {
    base: BaseObject,
    self_ref: Weak<RootObject>,
    objects: RwLock<SlotMap<ObjectId, Arc<GraphObject>>>,
    names: RwLock<HashMap<String, ObjectId>>,
    kinds: RwLock<HashMap<String, ObjectKind>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    serialized_handler: RwLock<Option<SerializedHandler>>,
    buffer_updated: Mutex<bool>,
    buffer_updated_cv: Condvar,
    answer_request: Mutex<()>,
    answer: Mutex<AnswerState>,
    answer_cv: Condvar,
}

impl RootObject {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_clock(name, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let root = Arc::new_cyclic(|self_ref| Self {
            base: BaseObject::with_clock(name, clock),
            self_ref: self_ref.clone(),
            objects: RwLock::new(SlotMap::with_key()),
            names: RwLock::new(HashMap::new()),
            kinds: RwLock::new(HashMap::new()),
            transport: RwLock::new(None),
            serialized_handler: RwLock::new(None),
            buffer_updated: Mutex::new(false),
            buffer_updated_cv: Condvar::new(),
            answer_request: Mutex::new(()),
            answer: Mutex::new(AnswerState::default()),
            answer_cv: Condvar::new(),
        });
        root.register_attributes();
        root
    }

    pub fn base(&self) -> &BaseObject {
        &self.base
    }

    /// Register a kind of object that [`create_object`](Self::create_object) can build.
    pub fn register_kind(&self, kind: ObjectKind) {
        self.kinds.write().insert(kind.type_name.clone(), kind);
    }

    pub fn has_kind(&self, type_name: &str) -> bool {
        self.kinds.read().contains_key(type_name)
    }

    /// Create an object, or return the existing one with the same name and type.
    pub fn create_object(&self, type_name: &str, name: &str) -> ObjectResult<Arc<GraphObject>> {
        if let Some(existing) = self.get_object(name) {
            return if existing.type_name() == type_name {
                Ok(existing)
            } else {
                tracing::warn!(
                    target: targets::ROOT,
                    "{} - An object named {} already exists, of type {}",
                    self.name(),
                    name,
                    existing.type_name()
                );
                Err(ObjectError::TypeMismatch {
                    name: name.to_owned(),
                    existing: existing.type_name().to_owned(),
                    requested: type_name.to_owned(),
                })
            };
        }

        let kind = self
            .kinds
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| ObjectError::UnknownType(type_name.to_owned()))?;

        let clock = self.base.clock().clone();
        let object = {
            let mut objects = self.objects.write();
            let id = objects.insert_with_key(|id| kind.build(name, id, &clock));
            objects[id].clone()
        };
        object.set_savable(false);
        if let Some(init) = &kind.init {
            init(&object);
        }

        let mut names = self.names.write();
        if let Some(&other) = names.get(name) {
            // Lost a creation race against the same name.
            drop(names);
            self.objects.write().remove(object.id());
            return self
                .object_by_id(other)
                .ok_or_else(|| ObjectError::NotFound(name.to_owned()));
        }
        names.insert(name.to_owned(), object.id());
        tracing::debug!(target: targets::ROOT, "{} - Created {} of type {}", self.name(), name, type_name);
        Ok(object)
    }

    /// Schedule the object for removal on the next [`run_tasks`](Self::run_tasks).
    pub fn dispose_object(&self, name: &str) -> bool {
        if !self.has_object(name) {
            return false;
        }
        let weak = self.self_ref.clone();
        let name = name.to_owned();
        self.base.add_task(move || {
            if let Some(root) = weak.upgrade() {
                root.remove_object(&name);
            }
        });
        true
    }

    fn remove_object(&self, name: &str) {
        let Some(id) = self.names.write().remove(name) else {
            return;
        };
        let removed = self.objects.write().remove(id);
        if removed.is_none() {
            return;
        }
        for object in self.objects() {
            object.forget(id);
        }
        tracing::debug!(target: targets::ROOT, "{} - Disposed {}", self.name(), name);
    }

    pub fn get_object(&self, name: &str) -> Option<Arc<GraphObject>> {
        let id = *self.names.read().get(name)?;
        self.object_by_id(id)
    }

    pub fn object_by_id(&self, id: ObjectId) -> Option<Arc<GraphObject>> {
        self.objects.read().get(id).cloned()
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.names.read().contains_key(name)
    }

    pub fn object_count(&self) -> usize {
        self.names.read().len()
    }

    /// Names of all objects, sorted.
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of all objects.
    pub fn objects(&self) -> Vec<Arc<GraphObject>> {
        self.objects.read().values().cloned().collect()
    }

    pub fn objects_of_type(&self, type_name: &str) -> Vec<Arc<GraphObject>> {
        self.objects
            .read()
            .values()
            .filter(|object| object.type_name() == type_name)
            .cloned()
            .collect()
    }

    /// Link `parent` to `child` by name.
    pub fn link(&self, parent: &str, child: &str) -> bool {
        match (self.get_object(parent), self.get_object(child)) {
            (Some(parent), Some(child)) => parent.link_to(&child),
            _ => false,
        }
    }

    pub fn unlink(&self, parent: &str, child: &str) -> bool {
        match (self.get_object(parent), self.get_object(child)) {
            (Some(parent), Some(child)) => parent.unlink_from(&child),
            _ => false,
        }
    }

    /// Objects the named object links to.
    pub fn linked_objects(&self, name: &str) -> Vec<Arc<GraphObject>> {
        self.get_object(name)
            .map(|object| self.resolve(&object.linked_objects()))
            .unwrap_or_default()
    }

    /// Objects linking to the named object.
    pub fn parents(&self, name: &str) -> Vec<Arc<GraphObject>> {
        self.get_object(name)
            .map(|object| self.resolve(&object.parents()))
            .unwrap_or_default()
    }

    fn resolve(&self, ids: &[ObjectId]) -> Vec<Arc<GraphObject>> {
        let objects = self.objects.read();
        ids.iter().filter_map(|id| objects.get(*id).cloned()).collect()
    }

    fn is_self(&self, name: &str) -> bool {
        name == self.name() || name == ALL_PEERS
    }

    /// Set an attribute of the named object, or of the root itself for its
    /// own name and [`ALL_PEERS`].
    ///
    /// The attribute's [`SyncMethod`] overrides `is_async`. Asynchronous sets
    /// are applied on the next [`run_tasks`](Self::run_tasks) to the object
    /// that bears the name at that point, so an object created in between
    /// still receives the value.
    pub fn set(&self, name: &str, attribute: &str, values: &[Value], is_async: bool) -> bool {
        if self.is_self(name) {
            return self.base.set_attribute(attribute, values).is_success();
        }

        let object = self.get_object(name);
        let sync_method = object
            .as_ref()
            .map_or(SyncMethod::NoSync, |object| object.attribute_sync_method(attribute));
        let apply_now = match sync_method {
            SyncMethod::ForceSync => true,
            SyncMethod::ForceAsync => false,
            SyncMethod::NoSync => !is_async,
        };

        if apply_now {
            let Some(object) = object else {
                tracing::debug!(
                    target: targets::ROOT,
                    "{} - No object named {} to set {} on",
                    self.name(),
                    name,
                    attribute
                );
                return false;
            };
            return object.set_attribute(attribute, values).is_success();
        }

        let root = self.self_ref.clone();
        let name = name.to_owned();
        let attribute = attribute.to_owned();
        let values = values.to_vec();
        self.base.add_task(move || {
            let Some(root) = root.upgrade() else {
                return;
            };
            match root.get_object(&name) {
                Some(object) => {
                    object.set_attribute(&attribute, &values);
                }
                None => tracing::debug!(
                    target: targets::ROOT,
                    "{} - No object named {} to set {} on",
                    root.name(),
                    name,
                    attribute
                ),
            }
        });
        true
    }

    /// Synchronously set an attribute and report the detailed outcome.
    pub fn set_attribute(&self, name: &str, attribute: &str, values: &[Value]) -> ObjectResult<SetAttrStatus> {
        if self.is_self(name) {
            return Ok(self.base.set_attribute(attribute, values));
        }
        self.get_object(name)
            .map(|object| object.set_attribute(attribute, values))
            .ok_or_else(|| ObjectError::NotFound(name.to_owned()))
    }

    pub fn get_attribute(&self, name: &str, attribute: &str) -> Option<Values> {
        if self.is_self(name) {
            return self.base.get_attribute(attribute);
        }
        self.get_object(name)?.get_attribute(attribute)
    }

    pub fn attributes_descriptions(&self, name: &str) -> Option<Vec<AttributeDescription>> {
        if self.is_self(name) {
            return Some(self.base.attributes_descriptions());
        }
        Some(self.get_object(name)?.attributes_descriptions())
    }

    /// Register a callback on an attribute of the named object.
    pub fn register_callback<F>(&self, name: &str, attribute: &str, callback: F) -> CallbackHandle
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        if self.is_self(name) {
            let owner: Weak<dyn CallbackOwner> = self.self_ref.clone();
            return self.base.register_callback_with_owner(owner, attribute, callback);
        }
        match self.get_object(name) {
            Some(object) => object.register_callback(attribute, callback),
            None => CallbackHandle::invalid(),
        }
    }

    /// Deliver a serialized buffer to the named object.
    ///
    /// Objects with a buffer component stage and apply it; anything else goes
    /// to the handler set with [`set_serialized_object_handler`](Self::set_serialized_object_handler).
    pub fn set_from_serialized_object(&self, name: &str, object: SerializedObject) -> bool {
        if let Some(buffer) = self.get_object(name).and_then(|o| o.buffer().cloned()) {
            if !buffer.set_serialized_object(object) {
                return false;
            }
            let applied = buffer.deserialize_staged();
            if applied {
                self.signal_buffer_object_updated();
            }
            return applied;
        }

        let handler = self.serialized_handler.read().clone();
        match handler {
            Some(handler) => handler(name, object),
            None => {
                tracing::debug!(
                    target: targets::ROOT,
                    "{} - No buffer object named {}",
                    self.name(),
                    name
                );
                false
            }
        }
    }

    /// Handle serialized objects addressed to names without a buffer object.
    pub fn set_serialized_object_handler<F>(&self, handler: F)
    where
        F: Fn(&str, SerializedObject) -> bool + Send + Sync + 'static,
    {
        *self.serialized_handler.write() = Some(Arc::new(handler));
    }

    /// Wake up threads waiting in [`wait_signal_buffer_object_updated`](Self::wait_signal_buffer_object_updated).
    pub fn signal_buffer_object_updated(&self) {
        *self.buffer_updated.lock() = true;
        self.buffer_updated_cv.notify_all();
    }

    /// Wait until a buffer object is updated or `timeout` elapses.
    ///
    /// Returns `true` if an update was signaled, and consumes the signal.
    pub fn wait_signal_buffer_object_updated(&self, timeout: Duration) -> bool {
        let mut updated = self.buffer_updated.lock();
        self.buffer_updated_cv
            .wait_while_for(&mut updated, |updated| !*updated, timeout);
        std::mem::replace(&mut *updated, false)
    }

    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn detach_transport(&self) {
        *self.transport.write() = None;
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    /// Send an attribute change to peers. Fails without a transport.
    pub fn send_message(&self, target: &str, attribute: &str, values: &[Value]) -> bool {
        match self.transport() {
            Some(transport) => transport.send_message(target, attribute, values),
            None => false,
        }
    }

    pub fn send_buffer(&self, target: &str, buffer: SerializedObject) -> bool {
        match self.transport() {
            Some(transport) => transport.send_buffer(target, buffer),
            None => false,
        }
    }

    /// Serialize the named buffer object and send it under its own name.
    pub fn send_buffer_object(&self, name: &str) -> bool {
        let Some(buffer) = self.get_object(name).and_then(|o| o.buffer().cloned()) else {
            return false;
        };
        self.send_buffer(name, buffer.serialize())
    }

    /// Send a request and wait for the peer to answer through `answerMessage`.
    ///
    /// The answer is the list of values following the attribute name in the
    /// peer's reply, or `None` on timeout.
    pub fn send_message_with_answer(
        &self,
        target: &str,
        attribute: &str,
        values: &[Value],
        timeout: Duration,
    ) -> Option<Values> {
        let _request = self.answer_request.lock();
        {
            let mut answer = self.answer.lock();
            answer.expected = Some(attribute.to_owned());
            answer.received = None;
        }

        if !self.send_message(target, attribute, values) {
            self.answer.lock().expected = None;
            return None;
        }

        let mut answer = self.answer.lock();
        self.answer_cv
            .wait_while_for(&mut answer, |answer| answer.received.is_none(), timeout);
        answer.expected = None;
        let received = answer.received.take();
        if received.is_none() {
            tracing::warn!(
                target: targets::ROOT,
                "{} - No answer received for {}~~{}",
                self.name(),
                target,
                attribute
            );
        }
        received
    }

    /// Reply to a request from `requester` made with
    /// [`send_message_with_answer`](Self::send_message_with_answer).
    pub fn answer_message(&self, requester: &str, attribute: &str, values: &[Value]) -> bool {
        let mut reply = Vec::with_capacity(values.len() + 1);
        reply.push(Value::from(attribute));
        reply.extend_from_slice(values);
        self.send_message(requester, "answerMessage", &reply)
    }

    /// Run the root's tasks, then every object's tasks.
    pub fn run_tasks(&self) {
        self.base.run_tasks();
        for object in self.objects() {
            object.run_tasks();
        }
    }

    fn register_attributes(&self) {
        let weak = self.self_ref.clone();
        let answer = self.base.add_attribute(
            "answerMessage",
            move |args| {
                let Some(root) = weak.upgrade() else {
                    return false;
                };
                let mut answer = root.answer.lock();
                if answer.expected.as_deref() != args[0].as_str() {
                    return false;
                }
                answer.received = Some(args[1..].to_vec());
                root.answer_cv.notify_all();
                true
            },
            vec![ValueType::String],
        );
        answer.set_sync_method(SyncMethod::ForceSync);
        answer.set_savable(false);
        answer.set_description("Answer to a message sent with send_message_with_answer");
    }
}

impl std::ops::Deref for RootObject {
    type Target = BaseObject;

    fn deref(&self) -> &BaseObject {
        &self.base
    }
}

impl CallbackOwner for RootObject {
    fn unregister_callback(&self, handle: &CallbackHandle) -> bool {
        self.base.unregister_callback(handle)
    }
}

impl LinkPeer for RootObject {
    fn peer_name(&self) -> String {
        self.name().to_owned()
    }

    fn set(&self, name: &str, attribute: &str, values: &[Value], is_async: bool) -> bool {
        RootObject::set(self, name, attribute, values, is_async)
    }

    fn set_from_serialized_object(&self, name: &str, object: SerializedObject) -> bool {
        RootObject::set_from_serialized_object(self, name, object)
    }
}

impl fmt::Debug for RootObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootObject")
            .field("name", &self.name())
            .field("objects", &self.object_names())
            .finish_non_exhaustive()
    }
}
