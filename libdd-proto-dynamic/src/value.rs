// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The runtime payload types that flow between the dispatcher and a field's
//! get/set accessors. Member access never goes through reflection on the
//! hot path: accessors are two closures (get, set) captured once at
//! registry-build time, each downcasting its host object through `dyn Any`
//! to the concrete type it was registered against (a static, essentially
//! free downcast, not a reflective lookup).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A boxed host value, read from or about to be written to a host object's
/// field. Message-typed payloads are boxed as `dyn Any` and recursed into
/// by looking up their runtime type in the registry; there is no generic
/// tree representation for messages, so two dynamic messages are compared
/// by re-serializing both and comparing bytes rather than by `PartialEq`
/// (see `DESIGN.md`).
///
/// Strings are `Arc<str>` rather than `String` so that the reader's
/// `intern_strings` option (`crate::registry::RegistryOptions`) can make
/// equal strings read during one deserialize call share a single
/// allocation instead of merely comparing equal.
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(Arc<str>),
    Bytes(Vec<u8>),
    Enum(i32),
    /// `Arc` rather than `Box`: the inheritance dispatcher and the
    /// recursion check (`crate::dispatch`) both need a stable identity for
    /// a nested message across repeated `get()` calls -- a fresh `Box` per
    /// call would make pointer-identity cycle detection meaningless. A
    /// getter that has to allocate is expected to cache the `Arc` on the
    /// host object rather than re-box on every call.
    Message(Arc<dyn Any + Send + Sync>),
    Repeated(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// No value is present; seeded from a field's default on read, or
    /// produced by a getter for an absent message field.
    Absent,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "Bool({v:?})"),
            Value::I32(v) => write!(f, "I32({v:?})"),
            Value::I64(v) => write!(f, "I64({v:?})"),
            Value::U32(v) => write!(f, "U32({v:?})"),
            Value::U64(v) => write!(f, "U64({v:?})"),
            Value::F32(v) => write!(f, "F32({v:?})"),
            Value::F64(v) => write!(f, "F64({v:?})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Bytes(v) => write!(f, "Bytes[{} bytes]", v.len()),
            Value::Enum(v) => write!(f, "Enum({v:?})"),
            Value::Message(_) => write!(f, "Message(<dynamic>)"),
            Value::Repeated(v) => f.debug_tuple("Repeated").field(v).finish(),
            Value::Map(v) => write!(f, "Map[{} entries]", v.len()),
            Value::Absent => write!(f, "Absent"),
        }
    }
}

impl Value {
    /// Narrows a `Value` to the scalar/shape the codec layer expects,
    /// failing with [`crate::error::Error::InvalidAccessor`] when a
    /// getter returned something incompatible with the field's declared
    /// [`crate::descriptor::ValueKind`] -- a registration bug on the
    /// (out-of-scope) accessor-generation side.
    pub fn as_bool(&self, field: u32) -> crate::error::Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_i32(&self, field: u32) -> crate::error::Result<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            Value::Enum(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_i64(&self, field: u32) -> crate::error::Result<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_u32(&self, field: u32) -> crate::error::Result<u32> {
        match self {
            Value::U32(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_u64(&self, field: u32) -> crate::error::Result<u64> {
        match self {
            Value::U64(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_f32(&self, field: u32) -> crate::error::Result<f32> {
        match self {
            Value::F32(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_f64(&self, field: u32) -> crate::error::Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_str(&self, field: u32) -> crate::error::Result<&str> {
        match self {
            Value::String(v) => Ok(v.as_ref()),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_bytes(&self, field: u32) -> crate::error::Result<&[u8]> {
        match self {
            Value::Bytes(v) => Ok(v.as_slice()),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn as_message(&self, field: u32) -> crate::error::Result<&Arc<dyn Any + Send + Sync>> {
        match self {
            Value::Message(v) => Ok(v),
            _ => Err(crate::error::Error::InvalidAccessor { field }),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
}

/// A scalar default value. Message-typed fields never carry a literal
/// default in protobuf semantics -- their "default" is simply absence --
/// so this is intentionally a narrower type than [`Value`].
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarDefault {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Enum(i32),
}

impl ScalarDefault {
    /// Bitwise-for-floats, ordinal-for-strings equality against a `Value`
    /// read off a host object, per the default-suppression rule in the
    /// spec: "Default-equality for floats is bitwise; for strings, ordinal."
    pub fn equals(&self, value: &Value) -> bool {
        match (self, value) {
            (ScalarDefault::Bool(d), Value::Bool(v)) => d == v,
            (ScalarDefault::I32(d), Value::I32(v)) => d == v,
            (ScalarDefault::I64(d), Value::I64(v)) => d == v,
            (ScalarDefault::U32(d), Value::U32(v)) => d == v,
            (ScalarDefault::U64(d), Value::U64(v)) => d == v,
            (ScalarDefault::F32(d), Value::F32(v)) => d.to_bits() == v.to_bits(),
            (ScalarDefault::F64(d), Value::F64(v)) => d.to_bits() == v.to_bits(),
            (ScalarDefault::String(d), Value::String(v)) => d.as_str() == v.as_ref(),
            (ScalarDefault::Bytes(d), Value::Bytes(v)) => d == v,
            (ScalarDefault::Enum(d), Value::Enum(v)) => d == v,
            _ => false,
        }
    }

    /// The implicit zero default for `scalar`, used when a registry has
    /// `use_implicit_zero_defaults` enabled and a field carries no
    /// explicit `FieldDescriptor::default` of its own.
    pub fn zero(scalar: crate::descriptor::ScalarType) -> ScalarDefault {
        use crate::descriptor::ScalarType;
        match scalar {
            ScalarType::Bool => ScalarDefault::Bool(false),
            ScalarType::Int32 | ScalarType::SInt32 => ScalarDefault::I32(0),
            ScalarType::Int64 | ScalarType::SInt64 => ScalarDefault::I64(0),
            ScalarType::UInt32 | ScalarType::Fixed32 | ScalarType::SFixed32 => ScalarDefault::U32(0),
            ScalarType::UInt64 | ScalarType::Fixed64 | ScalarType::SFixed64 => ScalarDefault::U64(0),
            ScalarType::Float => ScalarDefault::F32(0.0),
            ScalarType::Double => ScalarDefault::F64(0.0),
            ScalarType::String => ScalarDefault::String(String::new()),
            ScalarType::Bytes => ScalarDefault::Bytes(Vec::new()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self.clone() {
            ScalarDefault::Bool(v) => Value::Bool(v),
            ScalarDefault::I32(v) => Value::I32(v),
            ScalarDefault::I64(v) => Value::I64(v),
            ScalarDefault::U32(v) => Value::U32(v),
            ScalarDefault::U64(v) => Value::U64(v),
            ScalarDefault::F32(v) => Value::F32(v),
            ScalarDefault::F64(v) => Value::F64(v),
            ScalarDefault::String(v) => Value::String(Arc::from(v)),
            ScalarDefault::Bytes(v) => Value::Bytes(v),
            ScalarDefault::Enum(v) => Value::Enum(v),
        }
    }
}

/// Reads a field's current value off a host object.
pub type Getter = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync>;
/// Writes a field's value back onto a host object.
pub type Setter = Box<dyn Fn(&mut (dyn Any + Send + Sync), Value) + Send + Sync>;
/// Creates a new, default-initialized instance of a registered type.
pub type Factory = Box<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;
/// A lifecycle hook invoked with read-only access around serialization.
pub type SerializeHook = Box<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;
/// A lifecycle hook invoked with mutable access around deserialization.
pub type DeserializeHook = Box<dyn Fn(&mut (dyn Any + Send + Sync)) + Send + Sync>;
