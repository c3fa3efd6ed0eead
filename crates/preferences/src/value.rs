//! Typed preference values
//!
//! Every value is stored as one canonical string. [`Value`] is the closed
//! set of types callers and migration sources can hand in; only some of them
//! can be stored.

use std::fmt;
use std::str::FromStr;

use storage::Item;

use crate::error::{PreferencesError, Result};

/// A value to store, or one read from a foreign source
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null; only readable through the string accessor
    Null,
    /// Text
    String(String),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Single-precision float
    Float(f32),
    /// Double-precision float (not storable)
    Double(f64),
    /// Boolean
    Bool(bool),
    /// Raw bytes (not storable)
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether this value has a canonical stored form
    pub fn is_supported(&self) -> bool {
        !matches!(self, Value::Double(_) | Value::Bytes(_))
    }

    /// Name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Canonical stored form; `None` stores a null
    pub fn to_stored(&self) -> Result<Option<String>> {
        match self {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Int(v) => Ok(Some(v.to_string())),
            Value::Long(v) => Ok(Some(v.to_string())),
            Value::Float(v) => Ok(Some(v.to_string())),
            Value::Bool(v) => Ok(Some(v.to_string())),
            Value::Double(_) | Value::Bytes(_) => Err(PreferencesError::IllegalArgument(format!(
                "values of type {} can not be stored",
                self.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Option<&str>> for Value {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Value::Null, Value::from)
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map_or(Value::Null, Value::String)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

fn parse_stored<T: FromStr>(item: &Item, type_name: &str) -> Result<T> {
    let raw = item.value().ok_or_else(|| {
        PreferencesError::WrongType(format!(
            "the value for key '{}' is null and can not be read as {}",
            item.key(),
            type_name
        ))
    })?;
    raw.parse::<T>().map_err(|_| {
        PreferencesError::WrongType(format!(
            "the value '{}' for key '{}' can not be read as {}",
            raw,
            item.key(),
            type_name
        ))
    })
}

pub(crate) fn read_int(item: &Item) -> Result<i32> {
    parse_stored(item, "int")
}

pub(crate) fn read_long(item: &Item) -> Result<i64> {
    parse_stored(item, "long")
}

pub(crate) fn read_float(item: &Item) -> Result<f32> {
    parse_stored(item, "float")
}

pub(crate) fn read_bool(item: &Item) -> Result<bool> {
    let value = item.value().unwrap_or("null");
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(PreferencesError::WrongType(format!(
            "the value '{}' for key '{}' can not be read as bool",
            value,
            item.key()
        )))
    }
}
