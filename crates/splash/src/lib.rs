//! Splash - the distributed object graph of a video-mapping session.
//!
//! This is the umbrella crate that re-exports the public APIs of
//! `splash-core` and, with the `net` feature, `splash-net`.
//!
//! # Example
//!
//! ```
//! use splash::prelude::*;
//!
//! let world = RootObject::new("world");
//! world.register_kind(ObjectKind::new("camera").priority(Priority::Camera));
//!
//! let camera = world.create_object("camera", "cam1").unwrap();
//! camera.set_attribute("exposure", &values![3.5]);
//! assert_eq!(world.get_attribute("cam1", "exposure"), Some(values![3.5]));
//! ```

pub use splash_core::*;

/// Link transport between roots.
#[cfg(feature = "net")]
pub mod net {
    pub use splash_net::*;
}

/// The types needed to build and drive an object graph.
pub mod prelude {
    pub use splash_core::{
        values, BufferObject, Category, GraphObject, ObjectKind, Priority, RootObject,
        SerializedObject, SetAttrStatus, SyncMethod, Value, ValueType, Values, ALL_PEERS,
    };

    #[cfg(feature = "net")]
    pub use splash_net::{Link, LinkConfig};
}
