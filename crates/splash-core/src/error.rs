//! Error types for Splash core operations.
//!
//! Attribute validation never produces an error value: it is reported as a
//! `false` return plus a warning. The errors here cover object management.

use std::fmt;

/// Object management errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// No object kind is registered under this type name.
    UnknownType(String),
    /// An object with this name exists with another type.
    TypeMismatch {
        name: String,
        existing: String,
        requested: String,
    },
    /// No object with this name.
    NotFound(String),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(type_name) => write!(f, "Unknown object type: {type_name}"),
            Self::TypeMismatch {
                name,
                existing,
                requested,
            } => write!(
                f,
                "An object named {name} exists with type {existing}, requested type {requested}"
            ),
            Self::NotFound(name) => write!(f, "No object named {name}"),
        }
    }
}

impl std::error::Error for ObjectError {}

/// Result type for object management operations.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;
