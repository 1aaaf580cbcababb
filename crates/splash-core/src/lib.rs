//! Core object model for Splash.
//!
//! This crate provides the distributed scene graph that every Splash process
//! shares with its peers:
//!
//! - **Values**: the tagged union exchanged by attributes and messages
//! - **Attributes**: named, type-checked properties with locking and callbacks
//! - **Graph objects**: attribute maps, links, rendering priority and tasks
//! - **Buffer objects**: serializable binary payloads with read/write locking
//! - **Root objects**: the per-process registry and propagation logic
//!
//! Moving changes between processes is the job of a [`Transport`], provided
//! by the `splash-net` crate.
//!
//! # Example
//!
//! ```
//! use splash_core::{values, ObjectKind, RootObject, SetAttrStatus, ValueType};
//!
//! let root = RootObject::new("world");
//! root.register_kind(ObjectKind::new("camera").on_create(|camera| {
//!     camera.add_attribute("fov", |args| args[0].as_f64().is_some_and(|f| f > 0.0), vec![ValueType::Real]);
//! }));
//!
//! let camera = root.create_object("camera", "cam1").unwrap();
//! assert_eq!(camera.set_attribute("fov", &values![50.0]), SetAttrStatus::Updated);
//! assert_eq!(camera.set_attribute("fov", &values![-1.0]), SetAttrStatus::Failure);
//!
//! // Queued until the next task cycle
//! root.set("cam1", "exposure", &values![3.5], true);
//! assert_eq!(root.get_attribute("cam1", "exposure"), None);
//! root.run_tasks();
//! assert_eq!(root.get_attribute("cam1", "exposure"), Some(values![3.5]));
//! ```

pub mod attribute;
pub mod buffer;
mod error;
pub mod logging;
pub mod object;
pub mod root;
pub mod task;
pub mod value;

pub use attribute::{
    Attribute, AttributeDescription, Callback, CallbackHandle, CallbackOwner, GetFn, SetFn,
    SyncMethod,
};
pub use buffer::{
    BlobObject, BufferObject, BufferState, DoubleBuffer, SerializedObject, SpinGuard, SpinLock,
};
pub use error::{ObjectError, ObjectResult};
pub use logging::{GraphDebug, TreeFormatOptions, TreeStyle};
pub use object::{
    BaseObject, Category, GraphObject, GraphObjectBuilder, LinkHook, ObjectId, Priority,
    SetAttrStatus,
};
pub use root::{LinkPeer, ObjectKind, RootObject, Transport, ALL_PEERS};
pub use task::{Clock, ManualClock, PeriodicTasks, SystemClock, TaskId, TaskQueue};
pub use value::{types_of, Value, ValueData, ValueType, Values};

static_assertions::assert_impl_all!(RootObject: Send, Sync);
static_assertions::assert_impl_all!(GraphObject: Send, Sync);
static_assertions::assert_impl_all!(Attribute: Send, Sync);
static_assertions::assert_impl_all!(SerializedObject: Send, Sync);
