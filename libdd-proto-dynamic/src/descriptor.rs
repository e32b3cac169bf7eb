// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Field descriptors: the per-field metadata a registered type carries.
//! Built once at registration time, immutable after the owning registry
//! freezes (`crate::registry`).

use crate::registry::TypeKey;
use crate::value::{Getter, ScalarDefault, Setter};
use crate::wire::WireType;

/// Primitive scalar categories, independent of their wire representation.
/// `Int32`/`Int64` are plain varints; `SInt32`/`SInt64` are zig-zag;
/// `Fixed32`/`Fixed64`/`SFixed32`/`SFixed64` are little-endian fixed width
/// (the `S` variants are the signed counterparts, same wire shape).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Float,
    Double,
    String,
    Bytes,
}

impl ScalarType {
    /// The wire type this scalar is framed with.
    pub fn wire_type(self) -> WireType {
        match self {
            ScalarType::Bool
            | ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::UInt32
            | ScalarType::UInt64
            | ScalarType::SInt32
            | ScalarType::SInt64 => WireType::Varint,
            ScalarType::Fixed32 | ScalarType::SFixed32 | ScalarType::Float => WireType::Fixed32,
            ScalarType::Fixed64 | ScalarType::SFixed64 | ScalarType::Double => WireType::Fixed64,
            ScalarType::String | ScalarType::Bytes => WireType::LengthDelimited,
        }
    }

    /// Whether packed encoding is legal for a repeated field of this item
    /// type: only scalars whose wire-type is varint/fixed32/fixed64.
    pub fn packable(self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }
}

/// Higher-level hint selecting a wire-type / framing variant for a field
/// of a given logical type. `ZigZag` only applies to integer scalars;
/// `Group` only to message fields; `WellKnown` only to message fields with
/// one of the adapters in `crate::wkt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFormat {
    Default,
    FixedSize,
    ZigZag,
    Group,
    WellKnown(WellKnownKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WellKnownKind {
    Duration,
    Timestamp,
    ScaledTicks,
    Decimal,
    Guid,
}

/// What to do with an enum integer that matches no known variant on read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnumUnknownPolicy {
    Fail,
    MapTo(i32),
}

/// Checks a raw wire integer against a concrete enum type's valid
/// discriminants -- the "reversible table" from §4.F, captured as a
/// closure at registration time the same way accessors are, so the
/// dispatch layer never needs reflection to validate an unknown value.
pub type EnumValidator = Box<dyn Fn(i32) -> bool + Send + Sync>;

/// The logical shape of a field's value, independent of wire framing.
pub enum ValueKind {
    Scalar(ScalarType),
    Message(TypeKey),
    Enum {
        valid: EnumValidator,
        unknown: EnumUnknownPolicy,
    },
    Repeated(Box<ValueKind>),
    Map {
        key: ScalarType,
        value: Box<ValueKind>,
    },
}

/// Behavioral flags on a field, independent of its value shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldFlags {
    pub required: bool,
    pub packed: bool,
    pub overwrite_list: bool,
    pub map_duplicate_fails: bool,
}

/// A single field's complete metadata: number, framing, shape, default,
/// flags, and the accessor pair that projects a host object to this
/// member.
pub struct FieldDescriptor {
    pub number: u32,
    pub data_format: DataFormat,
    pub value_kind: ValueKind,
    pub default: Option<ScalarDefault>,
    pub flags: FieldFlags,
    pub(crate) get: Getter,
    pub(crate) set: Setter,
}

impl FieldDescriptor {
    /// The declared wire-type for this field, derived from its value kind
    /// and data format rather than stored redundantly.
    pub fn wire_type(&self) -> WireType {
        match (&self.value_kind, self.data_format) {
            (_, DataFormat::Group) => WireType::StartGroup,
            (ValueKind::Scalar(scalar), DataFormat::ZigZag) => {
                debug_assert!(matches!(
                    scalar,
                    ScalarType::Int32
                        | ScalarType::Int64
                        | ScalarType::SInt32
                        | ScalarType::SInt64
                ));
                WireType::Varint
            }
            (ValueKind::Scalar(scalar), _) => scalar.wire_type(),
            (ValueKind::Enum { .. }, _) => WireType::Varint,
            (ValueKind::Message(_), _) => WireType::LengthDelimited,
            (ValueKind::Map { .. }, _) => WireType::LengthDelimited,
            (ValueKind::Repeated(inner), _) => inner_wire_type(inner, self.data_format),
        }
    }
}

fn inner_wire_type(inner: &ValueKind, data_format: DataFormat) -> WireType {
    match inner {
        ValueKind::Scalar(scalar) => {
            if matches!(data_format, DataFormat::ZigZag) {
                WireType::Varint
            } else {
                scalar.wire_type()
            }
        }
        ValueKind::Enum { .. } => WireType::Varint,
        ValueKind::Message(_) | ValueKind::Map { .. } => WireType::LengthDelimited,
        ValueKind::Repeated(inner) => inner_wire_type(inner, data_format),
    }
}

/// Builder used by registration call sites (the schema-discovery
/// collaborator, or hand-written setup code) to assemble a
/// [`FieldDescriptor`] without exposing its private accessor fields.
pub struct FieldDescriptorBuilder {
    number: u32,
    data_format: DataFormat,
    value_kind: ValueKind,
    default: Option<ScalarDefault>,
    flags: FieldFlags,
    get: Getter,
    set: Setter,
}

impl FieldDescriptorBuilder {
    pub fn new(number: u32, value_kind: ValueKind, get: Getter, set: Setter) -> Self {
        Self {
            number,
            data_format: DataFormat::Default,
            value_kind,
            default: None,
            flags: FieldFlags::default(),
            get,
            set,
        }
    }

    pub fn data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn default_value(mut self, default: ScalarDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.flags.required = required;
        self
    }

    pub fn packed(mut self, packed: bool) -> Self {
        self.flags.packed = packed;
        self
    }

    pub fn overwrite_list(mut self, overwrite_list: bool) -> Self {
        self.flags.overwrite_list = overwrite_list;
        self
    }

    pub fn map_duplicate_fails(mut self, map_duplicate_fails: bool) -> Self {
        self.flags.map_duplicate_fails = map_duplicate_fails;
        self
    }

    pub fn build(self) -> FieldDescriptor {
        FieldDescriptor {
            number: self.number,
            data_format: self.data_format,
            value_kind: self.value_kind,
            default: self.default,
            flags: self.flags,
            get: self.get,
            set: self.set,
        }
    }
}
