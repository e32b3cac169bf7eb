// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-field codec nodes (§4.F) and the repeated/map dispatcher (§4.H).
//!
//! A "node" here is not a trait object graph -- per the redesign guidance
//! in §9, the capability set `{write, read, returns_value, requires_old_value}`
//! is expressed as a plain match over [`ValueKind`] rather than a vector of
//! boxed decorators. The decorators the spec names (tag, default, accessor,
//! repeated, map, sub-item, enum) survive as the shape of that match: each
//! arm inlines exactly the framing a message/zig-zag/packed/map field needs,
//! and the field's [`Getter`]/[`Setter`] closures stand in for the
//! "property/field accessor decorator".

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::descriptor::{DataFormat, FieldDescriptor, ScalarType, ValueKind, WellKnownKind};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::reader::{Reader, Source};
use crate::registry::TypeRegistry;
use crate::value::{ScalarDefault, Value};
use crate::wire::WireType;
use crate::wkt;
use crate::writer::{Sink, Writer};

type Host = dyn Any + Send + Sync;

/// Whether a repeated field's item type is packable: a scalar whose wire
/// shape is varint/fixed32/fixed64 (never a length-delimited scalar), or an
/// enum (also varint on the wire). Matches the registry invariant in §3.
fn is_packable(inner: &ValueKind) -> bool {
    match inner {
        ValueKind::Scalar(s) => s.packable(),
        ValueKind::Enum { .. } => true,
        ValueKind::Message(_) | ValueKind::Map { .. } | ValueKind::Repeated(_) => false,
    }
}

// ---------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------

/// Writes a single field of `host` through `field`'s node, honoring
/// default-value suppression and the field's declared framing.
pub(crate) fn write_field<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    host: &Host,
    writer: &mut Writer<S>,
) -> Result<()> {
    let value = (field.get)(host);
    let implicit_zero = registry.options.use_implicit_zero_defaults;
    match &field.value_kind {
        ValueKind::Scalar(scalar) => write_scalar_field(field, *scalar, &value, writer, implicit_zero),
        ValueKind::Enum { .. } => write_enum_field(field, &value, writer, implicit_zero),
        ValueKind::Message(type_key) => write_message_field(registry, field, *type_key, &value, writer),
        ValueKind::Repeated(inner) => write_repeated_field(registry, field, inner, &value, writer),
        ValueKind::Map { key, value: val } => write_map_field(registry, field, *key, val, &value, writer),
    }
}

/// Default decorator + tag decorator, collapsed into one pass: suppress the
/// write when the value equals the descriptor's default (or is absent and
/// not required), otherwise emit the header and the scalar payload.
fn write_scalar_field<S: Sink>(
    field: &FieldDescriptor,
    scalar: ScalarType,
    value: &Value,
    writer: &mut Writer<S>,
    implicit_zero_defaults: bool,
) -> Result<()> {
    if value.is_absent() {
        if field.flags.required {
            return Err(Error::NullInNonNullable { field: field.number });
        }
        return Ok(());
    }
    if !field.flags.required {
        if let Some(default) = &field.default {
            if default.equals(value) {
                return Ok(());
            }
        } else if implicit_zero_defaults && ScalarDefault::zero(scalar).equals(value) {
            return Ok(());
        }
    }
    writer.write_field_header(field.number, field.wire_type())?;
    write_scalar_value(field.number, scalar, field.data_format, value, writer)
}

/// The bare scalar payload write, with no header and no default check --
/// reused by the singular and the unpacked-repeated-item paths.
fn write_scalar_value<S: Sink>(
    field_number: u32,
    scalar: ScalarType,
    data_format: DataFormat,
    value: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    match scalar {
        ScalarType::Bool => writer.write_bool(value.as_bool(field_number)?),
        ScalarType::Int32 if data_format == DataFormat::ZigZag => {
            writer.write_sint32(value.as_i32(field_number)?)
        }
        ScalarType::Int32 => writer.write_int32(value.as_i32(field_number)?),
        ScalarType::SInt32 => writer.write_sint32(value.as_i32(field_number)?),
        ScalarType::Int64 if data_format == DataFormat::ZigZag => {
            writer.write_sint64(value.as_i64(field_number)?)
        }
        ScalarType::Int64 => writer.write_int64(value.as_i64(field_number)?),
        ScalarType::SInt64 => writer.write_sint64(value.as_i64(field_number)?),
        ScalarType::UInt32 => writer.write_varint(value.as_u32(field_number)? as u64),
        ScalarType::UInt64 => writer.write_varint(value.as_u64(field_number)?),
        ScalarType::Fixed32 | ScalarType::SFixed32 => writer.write_fixed32(value.as_u32(field_number)?),
        ScalarType::Fixed64 | ScalarType::SFixed64 => writer.write_fixed64(value.as_u64(field_number)?),
        ScalarType::Float => writer.write_float(value.as_f32(field_number)?),
        ScalarType::Double => writer.write_double(value.as_f64(field_number)?),
        ScalarType::String => writer.write_length_delimited(value.as_str(field_number)?.as_bytes()),
        ScalarType::Bytes => writer.write_length_delimited(value.as_bytes(field_number)?),
    }
}

fn write_enum_field<S: Sink>(
    field: &FieldDescriptor,
    value: &Value,
    writer: &mut Writer<S>,
    implicit_zero_defaults: bool,
) -> Result<()> {
    if value.is_absent() {
        if field.flags.required {
            return Err(Error::NullInNonNullable { field: field.number });
        }
        return Ok(());
    }
    if !field.flags.required {
        if let Some(default) = &field.default {
            if default.equals(value) {
                return Ok(());
            }
        } else if implicit_zero_defaults && value.as_i32(field.number)? == 0 {
            return Ok(());
        }
    }
    writer.write_field_header(field.number, WireType::Varint)?;
    writer.write_int32(value.as_i32(field.number)?)
}

/// Sub-item decorator (message field, §4.F): delegates to the registered
/// serializer for the value's runtime type via [`dispatch::write_message`],
/// wrapped in length-delimited or group framing per the field's data-format.
fn write_message_field<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    type_key: crate::registry::TypeKey,
    value: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    if value.is_absent() {
        if field.flags.required {
            return Err(Error::NullInNonNullable { field: field.number });
        }
        return Ok(());
    }
    let inner = value.as_message(field.number)?;
    if let DataFormat::WellKnown(kind) = field.data_format {
        writer.write_field_header(field.number, WireType::LengthDelimited)?;
        let token = writer.start_sub_item()?;
        write_well_known(kind, inner, field.number, writer, registry.options.include_datetime_kind)?;
        writer.end_sub_item(token)
    } else if matches!(field.data_format, DataFormat::Group) {
        let token = writer.start_group(field.number)?;
        dispatch::write_message(registry, type_key, inner, writer)?;
        writer.end_sub_item(token)
    } else {
        writer.write_field_header(field.number, WireType::LengthDelimited)?;
        let token = writer.start_sub_item()?;
        dispatch::write_message(registry, type_key, inner, writer)?;
        writer.end_sub_item(token)
    }
}

fn write_well_known<S: Sink>(
    kind: WellKnownKind,
    value: &Arc<dyn Any + Send + Sync>,
    field_number: u32,
    writer: &mut Writer<S>,
    include_kind: bool,
) -> Result<()> {
    match kind {
        WellKnownKind::Duration => value
            .downcast_ref::<wkt::Duration>()
            .ok_or(Error::InvalidAccessor { field: field_number })?
            .write(writer),
        WellKnownKind::Timestamp => value
            .downcast_ref::<wkt::Timestamp>()
            .ok_or(Error::InvalidAccessor { field: field_number })?
            .write(writer),
        WellKnownKind::ScaledTicks => value
            .downcast_ref::<wkt::ScaledTicks>()
            .ok_or(Error::InvalidAccessor { field: field_number })?
            .write(writer, include_kind),
        WellKnownKind::Decimal => value
            .downcast_ref::<wkt::Decimal>()
            .ok_or(Error::InvalidAccessor { field: field_number })?
            .write(writer),
        WellKnownKind::Guid => value
            .downcast_ref::<wkt::Guid>()
            .ok_or(Error::InvalidAccessor { field: field_number })?
            .write(writer),
    }
}

/// Repeated decorator (§4.F/§4.H): packed when the field says so and the
/// item type is packable, else one header + payload per item. An empty or
/// absent repeated is never written -- on the wire it's indistinguishable
/// from absent either way (§8).
fn write_repeated_field<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    inner: &ValueKind,
    value: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    let items = match value {
        Value::Repeated(items) => items,
        v if v.is_absent() => return Ok(()),
        _ => return Err(Error::InvalidAccessor { field: field.number }),
    };
    if items.is_empty() {
        return Ok(());
    }
    if field.flags.packed && is_packable(inner) {
        writer.write_field_header(field.number, WireType::LengthDelimited)?;
        let token = writer.start_sub_item()?;
        writer.set_packed_field(field.number);
        for item in items {
            write_repeated_item_payload(registry, field, inner, item, writer)?;
        }
        writer.clear_packed_field(field.number)?;
        writer.end_sub_item(token)
    } else {
        for item in items {
            write_unpacked_item(registry, field, inner, item, writer)?;
        }
        Ok(())
    }
}

/// The bare payload of one packed item: no header (packed mode suppresses
/// it), no sub-item framing for scalars/enums (only they can be packed).
fn write_repeated_item_payload<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    inner: &ValueKind,
    item: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    let _ = registry;
    match inner {
        ValueKind::Scalar(scalar) => write_scalar_value(field.number, *scalar, field.data_format, item, writer),
        ValueKind::Enum { .. } => writer.write_int32(item.as_i32(field.number)?),
        _ => Err(Error::InvalidAccessor { field: field.number }),
    }
}

/// One item of an unpacked repeated field: its own header, then the same
/// payload shape a singular field of that kind would use.
fn write_unpacked_item<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    inner: &ValueKind,
    item: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    match inner {
        ValueKind::Scalar(scalar) => {
            writer.write_field_header(field.number, scalar.wire_type())?;
            write_scalar_value(field.number, *scalar, field.data_format, item, writer)
        }
        ValueKind::Enum { .. } => {
            writer.write_field_header(field.number, WireType::Varint)?;
            writer.write_int32(item.as_i32(field.number)?)
        }
        ValueKind::Message(type_key) => {
            let inner_msg = item.as_message(field.number)?;
            if matches!(field.data_format, DataFormat::Group) {
                let token = writer.start_group(field.number)?;
                dispatch::write_message(registry, *type_key, inner_msg, writer)?;
                writer.end_sub_item(token)
            } else {
                writer.write_field_header(field.number, WireType::LengthDelimited)?;
                let token = writer.start_sub_item()?;
                dispatch::write_message(registry, *type_key, inner_msg, writer)?;
                writer.end_sub_item(token)
            }
        }
        ValueKind::Repeated(_) | ValueKind::Map { .. } => Err(Error::InvalidAccessor { field: field.number }),
    }
}

/// Map decorator (§4.F/§3): each entry is its own length-delimited
/// two-field sub-message, `{1: key, 2: value}`, repeated at the map
/// field's own number.
fn write_map_field<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    key_type: ScalarType,
    value_kind: &ValueKind,
    value: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    let entries = match value {
        Value::Map(entries) => entries,
        v if v.is_absent() => return Ok(()),
        _ => return Err(Error::InvalidAccessor { field: field.number }),
    };
    for (k, v) in entries {
        writer.write_field_header(field.number, WireType::LengthDelimited)?;
        let token = writer.start_sub_item()?;
        writer.write_field_header(1, key_type.wire_type())?;
        write_scalar_value(field.number, key_type, DataFormat::Default, k, writer)?;
        write_map_value_entry(registry, field, value_kind, v, writer)?;
        writer.end_sub_item(token)?;
    }
    Ok(())
}

fn write_map_value_entry<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    value_kind: &ValueKind,
    value: &Value,
    writer: &mut Writer<S>,
) -> Result<()> {
    match value_kind {
        ValueKind::Scalar(scalar) => {
            writer.write_field_header(2, scalar.wire_type())?;
            write_scalar_value(field.number, *scalar, DataFormat::Default, value, writer)
        }
        ValueKind::Enum { .. } => {
            writer.write_field_header(2, WireType::Varint)?;
            writer.write_int32(value.as_i32(field.number)?)
        }
        ValueKind::Message(type_key) => {
            let inner_msg = value.as_message(field.number)?;
            writer.write_field_header(2, WireType::LengthDelimited)?;
            let token = writer.start_sub_item()?;
            dispatch::write_message(registry, *type_key, inner_msg, writer)?;
            writer.end_sub_item(token)
        }
        ValueKind::Repeated(_) | ValueKind::Map { .. } => Err(Error::InvalidAccessor { field: field.number }),
    }
}

// ---------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------

/// Reads one field occurrence into `host`, given the wire-type it was
/// actually tagged with. Called once per field-header the dispatcher
/// routes to a known field number; repeated/map fields accumulate across
/// repeated calls regardless of interleaving with other fields (§4.H).
pub(crate) fn read_field<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    wire_type: WireType,
    reader: &mut Reader<S>,
    host: &mut Host,
    touched_repeated: &mut HashSet<u32>,
) -> Result<()> {
    match &field.value_kind {
        ValueKind::Scalar(scalar) => {
            let value = read_scalar_value(field.number, *scalar, field.data_format, wire_type, reader)?;
            (field.set)(host, value);
            Ok(())
        }
        ValueKind::Enum { valid, unknown } => {
            reader.assert_wire_type(field.number, wire_type, WireType::Varint)?;
            let raw = reader.read_int32()?;
            let value = if valid(raw) {
                raw
            } else {
                match unknown {
                    crate::descriptor::EnumUnknownPolicy::MapTo(fallback) => {
                        tracing::trace!(field = field.number, raw, "unknown enum value mapped to catch-all");
                        *fallback
                    }
                    crate::descriptor::EnumUnknownPolicy::Fail => {
                        return Err(Error::UnknownEnumValue { field: field.number, value: raw })
                    }
                }
            };
            (field.set)(host, Value::Enum(value));
            Ok(())
        }
        ValueKind::Message(type_key) => read_message_field(registry, field, *type_key, wire_type, reader, host),
        ValueKind::Repeated(inner) => {
            read_repeated_field(registry, field, inner, wire_type, reader, host, touched_repeated)
        }
        ValueKind::Map { key, value } => read_map_field(registry, field, *key, value, wire_type, reader, host),
    }
}

fn read_scalar_value<S: Source>(
    field_number: u32,
    scalar: ScalarType,
    data_format: DataFormat,
    wire_type: WireType,
    reader: &mut Reader<S>,
) -> Result<Value> {
    reader.assert_wire_type(field_number, wire_type, scalar.wire_type())?;
    Ok(match scalar {
        ScalarType::Bool => Value::Bool(reader.read_bool()?),
        ScalarType::Int32 if data_format == DataFormat::ZigZag => Value::I32(reader.read_sint32()?),
        ScalarType::Int32 => Value::I32(reader.read_int32()?),
        ScalarType::SInt32 => Value::I32(reader.read_sint32()?),
        ScalarType::Int64 if data_format == DataFormat::ZigZag => Value::I64(reader.read_sint64()?),
        ScalarType::Int64 => Value::I64(reader.read_int64()?),
        ScalarType::SInt64 => Value::I64(reader.read_sint64()?),
        ScalarType::UInt32 => Value::U32(reader.read_varint()? as u32),
        ScalarType::UInt64 => Value::U64(reader.read_varint()?),
        ScalarType::Fixed32 | ScalarType::SFixed32 => Value::U32(reader.read_fixed32()?),
        ScalarType::Fixed64 | ScalarType::SFixed64 => Value::U64(reader.read_fixed64()?),
        ScalarType::Float => Value::F32(reader.read_float()?),
        ScalarType::Double => Value::F64(reader.read_double()?),
        ScalarType::String => Value::String(reader.read_string()?),
        ScalarType::Bytes => Value::Bytes(reader.read_bytes()?),
    })
}

fn read_message_field<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    type_key: crate::registry::TypeKey,
    wire_type: WireType,
    reader: &mut Reader<S>,
    host: &mut Host,
) -> Result<()> {
    if let DataFormat::WellKnown(kind) = field.data_format {
        reader.assert_wire_type(field.number, wire_type, WireType::LengthDelimited)?;
        let token = reader.start_sub_item(field.number, WireType::LengthDelimited)?;
        let value = read_well_known(kind, field.number, reader, registry.options.include_datetime_kind)?;
        reader.end_sub_item(token)?;
        (field.set)(host, value);
        return Ok(());
    }
    let expect_group = matches!(field.data_format, DataFormat::Group);
    let framing = if expect_group {
        WireType::StartGroup
    } else {
        WireType::LengthDelimited
    };
    reader.assert_wire_type(field.number, wire_type, framing)?;
    let token = reader.start_sub_item(field.number, wire_type)?;
    let inner = dispatch::read_message(registry, type_key, reader)?;
    reader.end_sub_item(token)?;
    (field.set)(host, Value::Message(Arc::from(inner)));
    Ok(())
}

fn read_well_known<S: Source>(
    kind: WellKnownKind,
    field_number: u32,
    reader: &mut Reader<S>,
    _include_kind: bool,
) -> Result<Value> {
    let _ = field_number;
    let boxed: Arc<dyn Any + Send + Sync> = match kind {
        WellKnownKind::Duration => Arc::new(wkt::Duration::read(reader)?),
        WellKnownKind::Timestamp => Arc::new(wkt::Timestamp::read(reader)?),
        WellKnownKind::ScaledTicks => Arc::new(wkt::ScaledTicks::read(reader)?),
        WellKnownKind::Decimal => Arc::new(wkt::Decimal::read(reader)?),
        WellKnownKind::Guid => Arc::new(wkt::Guid::read(reader)?),
    };
    Ok(Value::Message(boxed))
}

/// Repeated dispatcher (§4.H): packed when the wire-type is length-delimited
/// *and* the item type is itself packable (never true for string/bytes/
/// message/map items, which are length-delimited in their own right and so
/// always arrive as one occurrence per item); unpacked otherwise, one item
/// appended per call regardless of interleaving with other field numbers.
fn read_repeated_field<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    inner: &ValueKind,
    wire_type: WireType,
    reader: &mut Reader<S>,
    host: &mut Host,
    touched_repeated: &mut HashSet<u32>,
) -> Result<()> {
    // `overwrite_list`: a host object reused across calls (or handed in
    // pre-populated) has its existing items discarded the first time this
    // field number is seen on the wire during this call, then accumulates
    // normally across any further occurrences of the same field (§4.H).
    let first_occurrence = touched_repeated.insert(field.number);
    let mut items = match (field.get)(host) {
        Value::Repeated(items) if !(field.flags.overwrite_list && first_occurrence) => items,
        _ => Vec::new(),
    };
    if wire_type == WireType::LengthDelimited && is_packable(inner) {
        let token = reader.start_sub_item(field.number, WireType::LengthDelimited)?;
        while !reader.at_frame_end() {
            items.push(read_repeated_item(registry, field, inner, inner_wire_type(inner), reader)?);
        }
        reader.end_sub_item(token)?;
    } else {
        items.push(read_repeated_item(registry, field, inner, wire_type, reader)?);
    }
    (field.set)(host, Value::Repeated(items));
    Ok(())
}

fn inner_wire_type(inner: &ValueKind) -> WireType {
    match inner {
        ValueKind::Scalar(s) => s.wire_type(),
        ValueKind::Enum { .. } => WireType::Varint,
        ValueKind::Message(_) | ValueKind::Map { .. } | ValueKind::Repeated(_) => WireType::LengthDelimited,
    }
}

fn read_repeated_item<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    inner: &ValueKind,
    wire_type: WireType,
    reader: &mut Reader<S>,
) -> Result<Value> {
    match inner {
        ValueKind::Scalar(scalar) => read_scalar_value(field.number, *scalar, field.data_format, wire_type, reader),
        ValueKind::Enum { valid, unknown } => {
            reader.assert_wire_type(field.number, wire_type, WireType::Varint)?;
            let raw = reader.read_int32()?;
            if valid(raw) {
                Ok(Value::Enum(raw))
            } else {
                match unknown {
                    crate::descriptor::EnumUnknownPolicy::MapTo(fallback) => Ok(Value::Enum(*fallback)),
                    crate::descriptor::EnumUnknownPolicy::Fail => {
                        Err(Error::UnknownEnumValue { field: field.number, value: raw })
                    }
                }
            }
        }
        ValueKind::Message(type_key) => {
            let expect_group = matches!(field.data_format, DataFormat::Group);
            let framing = if expect_group {
                WireType::StartGroup
            } else {
                WireType::LengthDelimited
            };
            reader.assert_wire_type(field.number, wire_type, framing)?;
            let token = reader.start_sub_item(field.number, wire_type)?;
            let msg = dispatch::read_message(registry, *type_key, reader)?;
            reader.end_sub_item(token)?;
            Ok(Value::Message(Arc::from(msg)))
        }
        ValueKind::Repeated(_) | ValueKind::Map { .. } => Err(Error::InvalidAccessor { field: field.number }),
    }
}

/// A hashable projection of a map key's [`Value`], used only to detect
/// duplicate keys when `map_duplicate_fails` is set. Proto map keys are
/// restricted to integer/bool/string scalars -- never floats, bytes,
/// messages, or enums -- so this covers the legal key space exactly.
#[derive(PartialEq, Eq, Hash)]
enum MapKeyDigest {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

fn map_key_digest(field_number: u32, value: &Value) -> Result<MapKeyDigest> {
    Ok(match value {
        Value::Bool(v) => MapKeyDigest::Bool(*v),
        Value::I32(v) => MapKeyDigest::I32(*v),
        Value::I64(v) => MapKeyDigest::I64(*v),
        Value::U32(v) => MapKeyDigest::U32(*v),
        Value::U64(v) => MapKeyDigest::U64(*v),
        Value::String(v) => MapKeyDigest::String(v.to_string()),
        _ => return Err(Error::InvalidAccessor { field: field_number }),
    })
}

fn read_map_field<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    key_type: ScalarType,
    value_kind: &ValueKind,
    wire_type: WireType,
    reader: &mut Reader<S>,
    host: &mut Host,
) -> Result<()> {
    reader.assert_wire_type(field.number, wire_type, WireType::LengthDelimited)?;
    let token = reader.start_sub_item(field.number, WireType::LengthDelimited)?;
    let mut key: Option<Value> = None;
    let mut val: Option<Value> = None;
    loop {
        let raw = reader.read_field_header()?;
        if raw == 0 {
            break;
        }
        let tag = crate::wire::Tag(raw);
        match tag.field_number() {
            1 => key = Some(read_scalar_value(field.number, key_type, DataFormat::Default, tag.wire_type()?, reader)?),
            2 => val = Some(read_map_value(registry, field, value_kind, tag.wire_type()?, reader)?),
            _ => reader.skip_field(tag.field_number(), tag.wire_type()?)?,
        }
    }
    reader.end_sub_item(token)?;
    let key = key.unwrap_or(Value::Absent);
    let val = val.unwrap_or(Value::Absent);

    let mut entries = match (field.get)(host) {
        Value::Map(entries) => entries,
        _ => Vec::new(),
    };
    if field.flags.map_duplicate_fails {
        let digest = map_key_digest(field.number, &key)?;
        for (existing_key, _) in &entries {
            if map_key_digest(field.number, existing_key)? == digest {
                return Err(Error::DuplicateMapKey { field: field.number });
            }
        }
    }
    entries.push((key, val));
    (field.set)(host, Value::Map(entries));
    Ok(())
}

fn read_map_value<S: Source>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    value_kind: &ValueKind,
    wire_type: WireType,
    reader: &mut Reader<S>,
) -> Result<Value> {
    match value_kind {
        ValueKind::Scalar(scalar) => read_scalar_value(field.number, *scalar, DataFormat::Default, wire_type, reader),
        ValueKind::Enum { valid, unknown } => {
            reader.assert_wire_type(field.number, wire_type, WireType::Varint)?;
            let raw = reader.read_int32()?;
            if valid(raw) {
                Ok(Value::Enum(raw))
            } else {
                match unknown {
                    crate::descriptor::EnumUnknownPolicy::MapTo(fallback) => Ok(Value::Enum(*fallback)),
                    crate::descriptor::EnumUnknownPolicy::Fail => {
                        Err(Error::UnknownEnumValue { field: field.number, value: raw })
                    }
                }
            }
        }
        ValueKind::Message(type_key) => {
            reader.assert_wire_type(field.number, wire_type, WireType::LengthDelimited)?;
            let token = reader.start_sub_item(field.number, WireType::LengthDelimited)?;
            let msg = dispatch::read_message(registry, *type_key, reader)?;
            reader.end_sub_item(token)?;
            Ok(Value::Message(Arc::from(msg)))
        }
        ValueKind::Repeated(_) | ValueKind::Map { .. } => Err(Error::InvalidAccessor { field: field.number }),
    }
}
