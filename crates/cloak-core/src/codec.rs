//! Fixed binary layout for typed preference values.
//!
//! Numeric scalars are big-endian so payloads do not depend on host byte
//! order. Strings are raw UTF-8 with no prefix or terminator. A string set
//! has no combined payload: every element is encoded (and later encrypted)
//! on its own.

use std::{collections::BTreeSet, fmt};

use thiserror::Error;

/// Discriminant of the value types a preference can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Bool,
    String,
    StringSet,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::StringSet => "string set",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced when a payload does not match the requested type.
/// Messages describe the shape of the payload only, never its contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{kind} payload must be {expected} bytes, got {actual}")]
    Length {
        kind: ValueKind,
        expected: usize,
        actual: usize,
    },
    #[error("bool payload is neither 0x00 nor 0x01")]
    InvalidBool,
    #[error("string payload is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
}

/// A value that is encrypted as a single payload.
pub trait Scalar: Sized {
    const KIND: ValueKind;

    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

fn fixed<const N: usize>(kind: ValueKind, bytes: &[u8]) -> Result<[u8; N], CodecError> {
    <[u8; N]>::try_from(bytes).map_err(|_| CodecError::Length {
        kind,
        expected: N,
        actual: bytes.len(),
    })
}

impl Scalar for i32 {
    const KIND: ValueKind = ValueKind::Int;

    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        fixed(Self::KIND, bytes).map(i32::from_be_bytes)
    }
}

impl Scalar for i64 {
    const KIND: ValueKind = ValueKind::Long;

    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        fixed(Self::KIND, bytes).map(i64::from_be_bytes)
    }
}

impl Scalar for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        fixed(Self::KIND, bytes).map(f32::from_be_bytes)
    }
}

impl Scalar for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn encode(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        match fixed::<1>(Self::KIND, bytes)? {
            [0x01] => Ok(true),
            [0x00] => Ok(false),
            _ => Err(CodecError::InvalidBool),
        }
    }
}

impl Scalar for String {
    const KIND: ValueKind = ValueKind::String;

    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| CodecError::InvalidUtf8 {
                valid_up_to: err.valid_up_to(),
            })
    }
}

/// A typed preference value, as produced by callers of the dynamic surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Bool(bool),
    String(String),
    StringSet(BTreeSet<String>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::String(_) => ValueKind::String,
            Value::StringSet(_) => ValueKind::StringSet,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::StringSet(values) => {
                let joined = values.iter().map(String::as_str).collect::<Vec<_>>();
                write!(f, "{{{}}}", joined.join(", "))
            }
        }
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

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(values: BTreeSet<String>) -> Self {
        Value::StringSet(values)
    }
}
