//! Endpoint addressing.
//!
//! Each root binds one inbound socket per channel, named after itself:
//! `<dir>/splash_[<prefix>_]msg_<name>` and `<dir>/splash_[<prefix>_]buf_<name>`.
//! Peers connect to the sockets named after the target.

use std::path::PathBuf;

use crate::config::LinkConfig;

/// The two channels of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Attribute updates.
    Message,
    /// Serialized buffer objects.
    Buffer,
}

impl Channel {
    pub fn discriminator(self) -> &'static str {
        match self {
            Self::Message => "msg_",
            Self::Buffer => "buf_",
        }
    }
}

/// Base file name shared by all endpoints of a session.
pub fn base_name(config: &LinkConfig) -> String {
    if config.socket_prefix.is_empty() {
        "splash_".to_string()
    } else {
        format!("splash_{}_", config.socket_prefix)
    }
}

/// Socket path of `name`'s inbound endpoint on `channel`.
pub fn socket_path(config: &LinkConfig, channel: Channel, name: &str) -> PathBuf {
    config.socket_dir.join(format!(
        "{}{}{}",
        base_name(config),
        channel.discriminator(),
        name
    ))
}

/// The same endpoint in URI form, for display.
pub fn socket_uri(config: &LinkConfig, channel: Channel, name: &str) -> String {
    format!("ipc://{}", socket_path(config, channel, name).display())
}
