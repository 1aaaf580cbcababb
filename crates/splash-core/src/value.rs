//! The value primitive exchanged by attributes and messages.
//!
//! A [`Value`] is a tagged union over integers, reals, strings and nested
//! sequences, optionally carrying a name so that a sequence can be used as a
//! keyed record.
//!
//! ```
//! use splash_core::{values, Value, ValueType};
//!
//! let args = values![1920, 1080, 0.5, "fullscreen"];
//! assert_eq!(args.len(), 4);
//! assert_eq!(args[2].value_type(), ValueType::Real);
//!
//! let named = Value::from(3.5).named("exposure");
//! assert_eq!(named.name(), "exposure");
//! ```

use std::fmt;

/// An ordered sequence of values, as passed to setters and returned by getters.
pub type Values = Vec<Value>;

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 string.
    String,
    /// Nested sequence of values.
    Values,
}

impl ValueType {
    /// One-character descriptor, as shown in attribute descriptions.
    pub fn as_char(self) -> char {
        match self {
            Self::Integer => 'i',
            Self::Real => 'r',
            Self::String => 's',
            Self::Values => 'v',
        }
    }

    /// Parse a one-character descriptor.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' | 'n' => Some(Self::Integer),
            'r' => Some(Self::Real),
            's' => Some(Self::String),
            'v' => Some(Self::Values),
            _ => None,
        }
    }

    /// Whether the type is a number, integer or real.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }

    /// Whether a value of type `other` fits a slot of this type.
    ///
    /// Integers and reals are interchangeable; other types match exactly.
    pub fn accepts(self, other: ValueType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }

    /// Parse a descriptor string such as `"rrs"` into a type list.
    ///
    /// Unknown characters are skipped.
    pub fn list(descriptor: &str) -> Vec<Self> {
        descriptor.chars().filter_map(Self::from_char).collect()
    }

    /// Stable code used on the wire.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Integer => 0,
            Self::Real => 1,
            Self::String => 2,
            Self::Values => 3,
        }
    }

    /// Inverse of [`wire_code`](Self::wire_code).
    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Integer),
            1 => Some(Self::Real),
            2 => Some(Self::String),
            3 => Some(Self::Values),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// The payload of a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Integer(i64),
    Real(f64),
    String(String),
    Values(Values),
}

/// A single, optionally named, value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    name: String,
    data: ValueData,
}

impl Value {
    /// Create an unnamed value from its payload.
    pub fn new(data: ValueData) -> Self {
        Self {
            name: String::new(),
            data,
        }
    }

    /// Attach a name to this value.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The value name, empty when unnamed.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn into_data(self) -> ValueData {
        self.data
    }

    pub fn value_type(&self) -> ValueType {
        match self.data {
            ValueData::Integer(_) => ValueType::Integer,
            ValueData::Real(_) => ValueType::Real,
            ValueData::String(_) => ValueType::String,
            ValueData::Values(_) => ValueType::Values,
        }
    }

    /// Read as an integer. Reals are truncated, numeric strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match &self.data {
            ValueData::Integer(v) => Some(*v),
            ValueData::Real(v) => Some(*v as i64),
            ValueData::String(s) => s.trim().parse().ok(),
            ValueData::Values(_) => None,
        }
    }

    /// Read as a real. Integers are widened, numeric strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.data {
            ValueData::Integer(v) => Some(*v as f64),
            ValueData::Real(v) => Some(*v),
            ValueData::String(s) => s.trim().parse().ok(),
            ValueData::Values(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_i64().map(|v| v != 0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ValueData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_values(&self) -> Option<&Values> {
        match &self.data {
            ValueData::Values(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_named() {
            write!(f, "{}: ", self.name)?;
        }
        match &self.data {
            ValueData::Integer(v) => write!(f, "{v}"),
            ValueData::Real(v) => write!(f, "{v}"),
            ValueData::String(s) => write!(f, "\"{s}\""),
            ValueData::Values(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::new(ValueData::Integer(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::new(ValueData::Integer(v.into()))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::new(ValueData::Integer(v.into()))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::new(ValueData::Integer(v.into()))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::new(ValueData::Real(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::new(ValueData::Real(v.into()))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::new(ValueData::String(v.to_owned()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::new(ValueData::String(v))
    }
}

impl From<Values> for Value {
    fn from(v: Values) -> Self {
        Self::new(ValueData::Values(v))
    }
}

/// Build a [`Values`] sequence from heterogeneous literals.
#[macro_export]
macro_rules! values {
    () => {
        $crate::Values::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::Value::from($value)),+]
    };
}

/// Type tags of a sequence, in order.
pub fn types_of(values: &[Value]) -> Vec<ValueType> {
    values.iter().map(Value::value_type).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types_accept_each_other() {
        assert!(ValueType::Real.accepts(ValueType::Integer));
        assert!(ValueType::Integer.accepts(ValueType::Real));
        assert!(ValueType::String.accepts(ValueType::String));
        assert!(!ValueType::Real.accepts(ValueType::String));
        assert!(!ValueType::Values.accepts(ValueType::Integer));
    }

    #[test]
    fn test_type_tags() {
        let v = values![1, 2.0, "three", values![4]];
        assert_eq!(
            types_of(&v),
            vec![ValueType::Integer, ValueType::Real, ValueType::String, ValueType::Values]
        );
    }

    #[test]
    fn test_descriptor_parsing() {
        assert_eq!(
            ValueType::list("rrs"),
            vec![ValueType::Real, ValueType::Real, ValueType::String]
        );
        assert_eq!(ValueType::list("n"), vec![ValueType::Integer]);
        assert!(ValueType::list("x?").is_empty());
    }

    #[test]
    fn test_wire_codes_are_distinct() {
        for ty in [ValueType::Integer, ValueType::Real, ValueType::String, ValueType::Values] {
            assert_eq!(ValueType::from_wire_code(ty.wire_code()), Some(ty));
        }
        assert_eq!(ValueType::from_wire_code(4), None);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from(3.9).as_i64(), Some(3));
        assert_eq!(Value::from(" 12 ").as_i64(), Some(12));
        assert_eq!(Value::from(values![1]).as_i64(), None);
        assert_eq!(Value::from(true).as_bool(), Some(true));
    }

    #[test]
    fn test_display() {
        let v = Value::from(values![1, Value::from("a").named("k")]);
        assert_eq!(v.to_string(), "[1, k: \"a\"]");
    }
}
