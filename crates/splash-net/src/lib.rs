//! Link transport for Splash.
//!
//! A [`Link`] moves attribute messages and serialized buffers between the
//! roots of a Splash session:
//!
//! - **Inner peers** are roots in the same process, updated by direct calls
//! - **Outer peers** are reached through Unix sockets, one for messages and
//!   one for buffers per root
//!
//! Inbound traffic is handled by two receive threads per link. Messages are
//! queued on the local root and applied on its next task cycle; buffers are
//! deserialized as they arrive.
//!
//! # Example
//!
//! ```no_run
//! use splash_core::{values, RootObject};
//! use splash_net::{Link, LinkConfig};
//!
//! let world = RootObject::new("world");
//! let link = Link::attach(&world, LinkConfig::default().socket_prefix("show")).unwrap();
//! link.connect_to("local");
//!
//! world.send_message("cam1", "size", &values![1920, 1080]);
//! ```
//!
//! # Configuration
//!
//! [`LinkConfig`] can be built in code or loaded from TOML; every process of
//! a session must agree on the socket directory and prefix.

pub mod address;
pub mod codec;
mod config;
mod error;
mod in_flight;
mod link;
mod socket;

pub use address::Channel;
pub use config::LinkConfig;
pub use error::{CodecError, LinkError, LinkResult};
pub use in_flight::{InFlightBuffers, InFlightTicket};
pub use link::Link;

static_assertions::assert_impl_all!(Link: Send, Sync);
