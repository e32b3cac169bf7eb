// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The inheritance dispatcher (§4.G): walks a type's base chain rootmost
//! first, writing or reading each level's own fields, nesting a derived
//! level's payload inside its base's discriminator field as a
//! length-delimited sub-item.
//!
//! Reading is the harder direction. Field order on the wire is not
//! guaranteed (§5: "readers must accept any order"), so the discriminator
//! field for a derived level can in principle appear before or after that
//! level's own fields -- but the discriminator's *payload* always contains
//! the next level nested inside it, so the host object's most-derived type
//! must be known before any field can be applied to it. True single-pass
//! lazy construction (build the host only once the first non-ancestor field
//! is seen) is therefore not achievable over an unordered wire stream
//! without buffering; this engine buffers the frame once with
//! [`crate::reader::Reader::read_remaining`], scans it non-destructively to
//! find the leaf type, constructs the host exactly once via the leaf's
//! factory, and then re-reads the same bytes to apply fields. See
//! `DESIGN.md` for the trade-off.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::codec;
use crate::error::{Error, Result};
use crate::reader::{Reader, Source, SliceSource};
use crate::registry::{TypeEntry, TypeKey, TypeRegistry};
use crate::value::Value;
use crate::wire::{Tag, WireType};
use crate::writer::{Sink, Writer};

type Host = dyn Any + Send + Sync;

/// Serializes `value`, whose declared field type is `type_key`, recursing
/// through the inheritance chain from `type_key` down to the value's actual
/// runtime type. `type_key` need not be the value's own registered type --
/// a base class field holding a derived instance is the normal case this
/// dispatcher exists for.
pub(crate) fn write_message<S: Sink>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
    writer: &mut Writer<S>,
) -> Result<()> {
    let runtime_key = registry
        .lookup((**value).type_id())
        .ok_or(Error::UnexpectedType)?;
    if !registry.is_ancestor_or_self(type_key, runtime_key) {
        tracing::debug!(
            declared = type_key.0,
            runtime = runtime_key.0,
            "value's runtime type is not a registered sub-type of the declared field type"
        );
        return Err(Error::UnexpectedSubType);
    }
    let entry = registry.entry(runtime_key);
    let identity = Arc::as_ptr(value) as *const () as usize;
    if entry.recursion_check {
        writer.begin_object(identity)?;
    }
    let host: &Host = value.as_ref();
    if let Some(hook) = &entry.before_serialize {
        hook(host);
    }
    let result = write_chain(registry, type_key, runtime_key, host, writer);
    if let Some(hook) = &entry.after_serialize {
        hook(host);
    }
    if entry.recursion_check {
        writer.end_object(identity);
    }
    result
}

/// Writes one level's own fields, then recurses into the next level (if
/// any) nested inside its discriminator field, until `current_key` reaches
/// `runtime_key`.
pub(crate) fn write_chain<S: Sink>(
    registry: &TypeRegistry,
    current_key: TypeKey,
    runtime_key: TypeKey,
    host: &Host,
    writer: &mut Writer<S>,
) -> Result<()> {
    let entry = registry.entry(current_key);
    for field in &entry.fields {
        codec::write_field(registry, field, host, writer)?;
    }
    if current_key == runtime_key {
        return Ok(());
    }
    let (child_key, discriminator) = registry
        .sub_type_toward(current_key, runtime_key)
        .ok_or(Error::UnexpectedSubType)?;
    writer.write_field_header(discriminator, WireType::LengthDelimited)?;
    let token = writer.start_sub_item()?;
    write_chain(registry, child_key, runtime_key, host, writer)?;
    writer.end_sub_item(token)
}

/// Deserializes a message declared at `type_key`, returning the constructed
/// host object boxed behind `dyn Any`. The caller (`crate::codec`) wraps it
/// in an `Arc` for storage.
pub(crate) fn read_message<S: Source>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    reader: &mut Reader<S>,
) -> Result<Box<dyn Any + Send + Sync>> {
    let entry = registry.entry(type_key);
    if entry.sub_types.is_empty() {
        return read_single_level(registry, type_key, &entry, reader);
    }

    let buf = reader.read_remaining()?;
    let leaf_key = find_leaf_type(registry, type_key, &buf)?;
    let leaf_entry = registry.entry(leaf_key);
    let mut host = (leaf_entry.factory.as_ref().ok_or(Error::UnexpectedType)?)();
    if let Some(hook) = &leaf_entry.before_deserialize {
        hook(host.as_mut());
    }
    let mut fresh = Reader::new(SliceSource::new(buf), reader.strict, registry.options.intern_strings);
    read_levels(registry, type_key, leaf_key, &mut fresh, host.as_mut())?;
    if let Some(hook) = &leaf_entry.after_deserialize {
        hook(host.as_mut());
    }
    Ok(host)
}

fn read_single_level<S: Source>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    entry: &Arc<TypeEntry>,
    reader: &mut Reader<S>,
) -> Result<Box<dyn Any + Send + Sync>> {
    let mut host = (entry.factory.as_ref().ok_or(Error::UnexpectedType)?)();
    if let Some(hook) = &entry.before_deserialize {
        hook(host.as_mut());
    }
    read_levels(registry, type_key, type_key, reader, host.as_mut())?;
    if let Some(hook) = &entry.after_deserialize {
        hook(host.as_mut());
    }
    Ok(host)
}

/// Applies `current_key`'s own fields onto `host` from `reader`'s current
/// frame, descending into the next level when the discriminator field for
/// the path toward `leaf_key` is encountered. `current_key == leaf_key`
/// means there is nothing left to descend into: every field in this frame
/// belongs to the single most-derived level.
fn read_levels<S: Source>(
    registry: &TypeRegistry,
    current_key: TypeKey,
    leaf_key: TypeKey,
    reader: &mut Reader<S>,
    host: &mut Host,
) -> Result<()> {
    let entry = registry.entry(current_key);
    // Tracks which repeated fields have already had one wire occurrence
    // applied at this level, so `overwrite_list` can clear a host's
    // pre-existing items on the *first* occurrence while still appending
    // normally across repeated occurrences of the same field number within
    // this same call (per §4.H, interleaved repeats always accumulate).
    let mut touched_repeated: HashSet<u32> = HashSet::new();
    // Every field number actually seen on the wire at this level, so that
    // once the frame is exhausted any field carrying a default can be
    // seeded onto the host (§4.D: "On read, if the field is absent, seed
    // the destination with the default").
    let mut touched: HashSet<u32> = HashSet::new();
    loop {
        let raw = reader.read_field_header()?;
        if raw == 0 {
            break;
        }
        let tag = Tag(raw);
        let field_number = tag.field_number();
        let wire_type = tag.wire_type()?;

        if current_key != leaf_key {
            if let Some(child_key) = child_for_discriminator(&entry, field_number) {
                reader.assert_wire_type(field_number, wire_type, WireType::LengthDelimited)?;
                let token = reader.start_sub_item(field_number, WireType::LengthDelimited)?;
                read_levels(registry, child_key, leaf_key, reader, host)?;
                reader.end_sub_item(token)?;
                continue;
            }
        }

        match entry.field_by_number(field_number) {
            Some(field) => {
                touched.insert(field_number);
                codec::read_field(registry, field, wire_type, reader, host, &mut touched_repeated)?
            }
            None => reader.skip_field(field_number, wire_type)?,
        }
    }
    for field in &entry.fields {
        if touched.contains(&field.number) {
            continue;
        }
        // Repeated/map absence is ordinary emptiness, not a missing value
        // (§8: "empty repeated field is indistinguishable from absent"),
        // so `required`/default-seeding only apply to singular fields --
        // matching the write side, which never required-checks a repeated
        // or map field either (`codec::write_repeated_field`/`write_map_field`).
        if matches!(field.value_kind, crate::descriptor::ValueKind::Repeated(_) | crate::descriptor::ValueKind::Map { .. }) {
            continue;
        }
        if field.flags.required {
            return Err(Error::MissingRequiredField { field: field.number });
        }
        if let Some(default) = &field.default {
            (field.set)(host, default.to_value());
        } else if registry.options.use_implicit_zero_defaults {
            if let Some(zero) = implicit_zero_value(&field.value_kind) {
                (field.set)(host, zero);
            }
        }
    }
    Ok(())
}

/// The implicit zero value for a field with no explicit default, under
/// `RegistryOptions::use_implicit_zero_defaults` (§6). Messages have no
/// zero value of their own -- absence stays absence even with the option
/// on, the same way an unset message field behaves in proto3.
fn implicit_zero_value(value_kind: &crate::descriptor::ValueKind) -> Option<Value> {
    use crate::descriptor::ValueKind;
    match value_kind {
        ValueKind::Scalar(scalar) => Some(crate::value::ScalarDefault::zero(*scalar).to_value()),
        ValueKind::Enum { .. } => Some(Value::Enum(0)),
        ValueKind::Message(_) | ValueKind::Repeated(_) | ValueKind::Map { .. } => None,
    }
}

fn child_for_discriminator(entry: &TypeEntry, field_number: u32) -> Option<TypeKey> {
    for (child, discriminator) in entry.sub_types.iter() {
        if *discriminator == field_number {
            return Some(*child);
        }
    }
    None
}

/// Non-destructively scans a buffered frame for the discriminator field
/// that identifies the next level down, recursing into that field's own
/// buffered payload until no further sub-type is found. The type at that
/// point is the most-derived (leaf) type the wire data describes.
fn find_leaf_type(registry: &TypeRegistry, base_key: TypeKey, buf: &bytes::Bytes) -> Result<TypeKey> {
    let entry = registry.entry(base_key);
    if entry.sub_types.is_empty() {
        return Ok(base_key);
    }
    let mut scan = Reader::new(SliceSource::new(buf.clone()), true, false);
    loop {
        let raw = scan.read_field_header()?;
        if raw == 0 {
            break;
        }
        let tag = Tag(raw);
        let field_number = tag.field_number();
        let wire_type = tag.wire_type()?;
        if let Some(child_key) = child_for_discriminator(&entry, field_number) {
            scan.assert_wire_type(field_number, wire_type, WireType::LengthDelimited)?;
            let token = scan.start_sub_item(field_number, WireType::LengthDelimited)?;
            let inner_buf = scan.read_remaining()?;
            scan.end_sub_item(token)?;
            return find_leaf_type(registry, child_key, &inner_buf);
        }
        scan.skip_field(field_number, wire_type)?;
    }
    // No discriminator present on the wire: the data describes `base_key`
    // itself rather than any registered derived type.
    Ok(base_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptorBuilder, ScalarType, ValueKind};
    use crate::registry::{RegistryOptions, TypeEntry};
    use crate::value::Value;
    use crate::writer::Writer;
    use std::any::TypeId;

    #[derive(Default)]
    struct Base {
        a: i32,
    }
    #[derive(Default)]
    struct Mid {
        a: i32,
        b: i32,
    }
    #[derive(Default)]
    struct Leaf {
        a: i32,
        b: i32,
        c: i32,
    }

    fn int_field(
        number: u32,
        get: impl Fn(&(dyn Any + Send + Sync)) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut (dyn Any + Send + Sync), Value) + Send + Sync + 'static,
    ) -> crate::descriptor::FieldDescriptor {
        FieldDescriptorBuilder::new(number, ValueKind::Scalar(ScalarType::Int32), Box::new(get), Box::new(set)).build()
    }

    fn build_registry() -> (TypeRegistry, TypeKey, TypeKey, TypeKey) {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let base_key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Base>(),
                    "Base",
                    vec![int_field(
                        1,
                        |h| Value::I32(h.downcast_ref::<Base>().unwrap().a),
                        |h, v| h.downcast_mut::<Base>().unwrap().a = v.as_i32(1).unwrap(),
                    )],
                )
                .unwrap()
                .with_factory(Box::new(|| Box::<Base>::default())),
            )
            .unwrap();
        let mid_key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Mid>(),
                    "Mid",
                    vec![
                        int_field(
                            1,
                            |h| Value::I32(h.downcast_ref::<Mid>().unwrap().a),
                            |h, v| h.downcast_mut::<Mid>().unwrap().a = v.as_i32(1).unwrap(),
                        ),
                        int_field(
                            2,
                            |h| Value::I32(h.downcast_ref::<Mid>().unwrap().b),
                            |h, v| h.downcast_mut::<Mid>().unwrap().b = v.as_i32(2).unwrap(),
                        ),
                    ],
                )
                .unwrap()
                .with_factory(Box::new(|| Box::<Mid>::default())),
            )
            .unwrap();
        let leaf_key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Leaf>(),
                    "Leaf",
                    vec![int_field(
                        3,
                        |h| Value::I32(h.downcast_ref::<Leaf>().unwrap().c),
                        |h, v| h.downcast_mut::<Leaf>().unwrap().c = v.as_i32(3).unwrap(),
                    )],
                )
                .unwrap()
                .with_factory(Box::new(|| Box::<Leaf>::default())),
            )
            .unwrap();
        registry.register_sub_type(base_key, mid_key, 100).unwrap();
        registry.register_sub_type(mid_key, leaf_key, 200).unwrap();
        registry.freeze().unwrap();
        (registry, base_key, mid_key, leaf_key)
    }

    #[test]
    fn write_chain_nests_discriminators_rootmost_first() {
        // Leaf only carries field 3 directly; fields 1/2 belong to Base/Mid
        // and are reached by downcasting the *same* host object at each
        // level via the registered accessors -- but our toy Base/Mid/Leaf
        // are independent structs here, so exercise write_chain against a
        // single concrete Leaf-shaped host isn't representative of real
        // shared-base-class layout. This test instead checks that encoding
        // simply nests as expected using Leaf's own entry chain in isolation.
        let (registry, _base, _mid, leaf_key) = build_registry();
        let host = Leaf { a: 0, b: 0, c: 7 };
        let mut w = Writer::new_buffer();
        write_chain(&registry, leaf_key, leaf_key, &host, &mut w).unwrap();
        let bytes = w.close().unwrap();
        assert_eq!(bytes, vec![0x18, 0x07]); // field 3, varint, value 7
    }

    #[test]
    fn read_levels_applies_leaf_fields_directly() {
        let (registry, _base, _mid, leaf_key) = build_registry();
        let bytes = vec![0x18, 0x09];
        let mut r = Reader::new(SliceSource::new(bytes::Bytes::from(bytes)), true, false);
        let mut host: Box<dyn Any + Send + Sync> = Box::new(Leaf::default());
        read_levels(&registry, leaf_key, leaf_key, &mut r, host.as_mut()).unwrap();
        assert_eq!(host.downcast_ref::<Leaf>().unwrap().c, 9);
    }

    #[test]
    fn find_leaf_type_descends_through_nested_discriminators() {
        let (registry, base_key, mid_key, leaf_key) = build_registry();
        // base field 1 = 1, discriminator 100 { mid field 2 = 2, discriminator 200 { leaf field 3 = 3 } }
        let mut inner_leaf = Writer::new_buffer();
        inner_leaf.write_field_header(3, WireType::Varint).unwrap();
        inner_leaf.write_int32(3).unwrap();
        let leaf_bytes = inner_leaf.close().unwrap();

        let mut mid_writer = Writer::new_buffer();
        mid_writer.write_field_header(2, WireType::Varint).unwrap();
        mid_writer.write_int32(2).unwrap();
        mid_writer.write_field_header(200, WireType::LengthDelimited).unwrap();
        mid_writer.write_length_delimited(&leaf_bytes).unwrap();
        let mid_bytes = mid_writer.close().unwrap();

        let mut base_writer = Writer::new_buffer();
        base_writer.write_field_header(1, WireType::Varint).unwrap();
        base_writer.write_int32(1).unwrap();
        base_writer.write_field_header(100, WireType::LengthDelimited).unwrap();
        base_writer.write_length_delimited(&mid_bytes).unwrap();
        let base_bytes = base_writer.close().unwrap();

        let found = find_leaf_type(&registry, base_key, &bytes::Bytes::from(base_bytes)).unwrap();
        assert_eq!(found, leaf_key);
        let _ = mid_key;
    }

    #[derive(Default)]
    struct WithDefault {
        a: i32,
        b: i32,
    }

    fn build_default_registry(required_b: bool) -> (TypeRegistry, TypeKey) {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<WithDefault>(),
                    "WithDefault",
                    vec![
                        int_field(
                            1,
                            |h| Value::I32(h.downcast_ref::<WithDefault>().unwrap().a),
                            |h, v| h.downcast_mut::<WithDefault>().unwrap().a = v.as_i32(1).unwrap(),
                        ),
                        FieldDescriptorBuilder::new(
                            2,
                            ValueKind::Scalar(ScalarType::Int32),
                            Box::new(|h: &(dyn Any + Send + Sync)| Value::I32(h.downcast_ref::<WithDefault>().unwrap().b)),
                            Box::new(|h, v| h.downcast_mut::<WithDefault>().unwrap().b = v.as_i32(2).unwrap()),
                        )
                        .default_value(crate::value::ScalarDefault::I32(42))
                        .required(required_b)
                        .build(),
                    ],
                )
                .unwrap()
                .with_factory(Box::new(|| Box::<WithDefault>::default())),
            )
            .unwrap();
        registry.freeze().unwrap();
        (registry, key)
    }

    #[test]
    fn read_levels_seeds_default_for_untouched_field() {
        let (registry, key) = build_default_registry(false);
        // Only field 1 present on the wire; field 2 is absent and carries a default of 42.
        let bytes = vec![0x08, 0x05];
        let mut r = Reader::new(SliceSource::new(bytes::Bytes::from(bytes)), true, false);
        let mut host: Box<dyn Any + Send + Sync> = Box::new(WithDefault::default());
        read_levels(&registry, key, key, &mut r, host.as_mut()).unwrap();
        let host = host.downcast_ref::<WithDefault>().unwrap();
        assert_eq!(host.a, 5);
        assert_eq!(host.b, 42);
    }

    #[test]
    fn read_levels_does_not_override_a_present_field_with_its_default() {
        let (registry, key) = build_default_registry(false);
        // Field 2 explicitly present on the wire with a non-default value.
        let bytes = vec![0x10, 0x07];
        let mut r = Reader::new(SliceSource::new(bytes::Bytes::from(bytes)), true, false);
        let mut host: Box<dyn Any + Send + Sync> = Box::new(WithDefault::default());
        read_levels(&registry, key, key, &mut r, host.as_mut()).unwrap();
        assert_eq!(host.downcast_ref::<WithDefault>().unwrap().b, 7);
    }

    #[test]
    fn read_levels_fails_when_a_required_field_is_absent() {
        let (registry, key) = build_default_registry(true);
        let bytes = vec![0x08, 0x05];
        let mut r = Reader::new(SliceSource::new(bytes::Bytes::from(bytes)), true, false);
        let mut host: Box<dyn Any + Send + Sync> = Box::new(WithDefault::default());
        let err = read_levels(&registry, key, key, &mut r, host.as_mut()).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredField { field: 2 }));
    }

    #[derive(Default)]
    struct ImplicitZero {
        a: i32,
    }

    #[test]
    fn read_levels_seeds_implicit_zero_when_enabled_and_no_default_registered() {
        let registry = TypeRegistry::new(RegistryOptions {
            use_implicit_zero_defaults: true,
            ..RegistryOptions::default()
        });
        let key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<ImplicitZero>(),
                    "ImplicitZero",
                    vec![int_field(
                        1,
                        |h| Value::I32(h.downcast_ref::<ImplicitZero>().unwrap().a),
                        |h, v| h.downcast_mut::<ImplicitZero>().unwrap().a = v.as_i32(1).unwrap(),
                    )],
                )
                .unwrap()
                .with_factory(Box::new(|| Box::<ImplicitZero>::default())),
            )
            .unwrap();
        registry.freeze().unwrap();
        let mut r = Reader::new(SliceSource::new(bytes::Bytes::new()), true, false);
        let mut host: Box<dyn Any + Send + Sync> = Box::new(ImplicitZero { a: 9 });
        read_levels(&registry, key, key, &mut r, host.as_mut()).unwrap();
        assert_eq!(host.downcast_ref::<ImplicitZero>().unwrap().a, 0);
    }
}
