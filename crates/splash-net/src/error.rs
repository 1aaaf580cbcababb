//! Error types for the link transport.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up a [`Link`](crate::Link).
///
/// Once a link is running, transport faults are logged and never returned.
#[derive(Error, Debug)]
pub enum LinkError {
    /// An inbound endpoint could not be bound.
    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn link thread: {0}")]
    Spawn(#[source] io::Error),

    /// The configuration could not be parsed.
    #[error("invalid link configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while decoding frames received from a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message ended before the named part.
    #[error("missing frame: {0}")]
    MissingFrame(&'static str),

    /// A fixed-width frame had the wrong size.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Unknown value type tag.
    #[error("unknown value type tag {0}")]
    UnknownType(i32),

    /// A frame or frame count exceeds the accepted maximum.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// A frame is not in the expected format.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Frames remain after a complete message.
    #[error("{0} unexpected trailing frames")]
    TrailingFrames(usize),
}

/// Result type for link setup.
pub type LinkResult<T> = Result<T, LinkError>;
