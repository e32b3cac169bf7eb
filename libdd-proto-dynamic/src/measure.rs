// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The measurement pass (§4.J): an optional pre-serialize traversal that
//! computes, for every nested message field reachable from a root value,
//! the exact encoded length of its payload -- keyed by (object identity,
//! declared field type) so the same object reused at two call sites with
//! different static types is cached independently. A subsequent real write
//! reuses those lengths via [`crate::writer::Writer::write_message_with_len`]
//! instead of the writer's default reserve-and-shift backpatch, skipping
//! the shift at the cost of a fatal [`crate::error::Error::LengthMismatch`]
//! if the value was mutated in between.
//!
//! Only plain (non-group, non-well-known) singular and repeated message
//! fields participate in the cache; map fields with message values and
//! group-framed or well-known-type message fields fall back to the normal
//! uncached backpatch path (see `DESIGN.md`).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::codec;
use crate::descriptor::{DataFormat, FieldDescriptor, ValueKind};
use crate::error::{Error, Result};
use crate::reader::Source;
use crate::registry::{TypeKey, TypeRegistry};
use crate::value::Value;
use crate::wire::WireType;
use crate::writer::{Sink, Writer};

type Host = dyn Any + Send + Sync;

/// Per-(object identity, declared type) length cache built by [`measure`].
#[derive(Default)]
pub struct LengthRecorder {
    lengths: HashMap<(usize, u32), u64>,
}

impl LengthRecorder {
    fn record(&mut self, identity: usize, type_key: TypeKey, len: u64) {
        self.lengths.insert((identity, type_key.0), len);
    }

    fn get(&self, identity: usize, type_key: TypeKey) -> Option<u64> {
        self.lengths.get(&(identity, type_key.0)).copied()
    }
}

/// The pre-pass's output: a handle consumed by [`serialize_with_handle`].
/// Dropping it without consuming it simply frees the cache -- there is no
/// separate pooled resource held beyond the `HashMap` itself.
pub struct MeasureHandle {
    pub top_level_len: u64,
    recorder: LengthRecorder,
}

/// Runs the null-sink pre-pass: serializes `value` into a discarded
/// buffer, recording every cacheable nested message's observed length.
pub fn measure(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
) -> Result<MeasureHandle> {
    let mut recorder = LengthRecorder::default();
    let mut scratch = Writer::<Vec<u8>>::new_buffer();
    record_message(registry, type_key, value, &mut scratch, &mut recorder)?;
    Ok(MeasureHandle {
        top_level_len: scratch.into_staged().len() as u64,
        recorder,
    })
}

/// Serializes `value` into `writer`, reusing `handle`'s cached lengths.
pub fn serialize_with_handle<S: Sink>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
    handle: &MeasureHandle,
    writer: &mut Writer<S>,
) -> Result<()> {
    write_message_cached(registry, type_key, value, writer, &handle.recorder)
}

fn message_field_type(field: &FieldDescriptor) -> Option<TypeKey> {
    let cacheable = !matches!(field.data_format, DataFormat::Group | DataFormat::WellKnown(_));
    if !cacheable {
        return None;
    }
    match &field.value_kind {
        ValueKind::Message(key) => Some(*key),
        ValueKind::Repeated(inner) => match inner.as_ref() {
            ValueKind::Message(key) => Some(*key),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Pass 1: measure (writes into a discarded scratch buffer)
// ---------------------------------------------------------------------

fn record_message<S: Sink>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
    writer: &mut Writer<S>,
    recorder: &mut LengthRecorder,
) -> Result<()> {
    let runtime_key = registry
        .lookup((**value).type_id())
        .ok_or(Error::UnexpectedType)?;
    if !registry.is_ancestor_or_self(type_key, runtime_key) {
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
    let result = record_chain(registry, type_key, runtime_key, host, writer, recorder);
    if let Some(hook) = &entry.after_serialize {
        hook(host);
    }
    if entry.recursion_check {
        writer.end_object(identity);
    }
    result
}

fn record_chain<S: Sink>(
    registry: &TypeRegistry,
    current_key: TypeKey,
    runtime_key: TypeKey,
    host: &Host,
    writer: &mut Writer<S>,
    recorder: &mut LengthRecorder,
) -> Result<()> {
    let entry = registry.entry(current_key);
    for field in &entry.fields {
        record_field(registry, field, host, writer, recorder)?;
    }
    if current_key == runtime_key {
        return Ok(());
    }
    let (child_key, discriminator) = registry
        .sub_type_toward(current_key, runtime_key)
        .ok_or(Error::UnexpectedSubType)?;
    writer.write_field_header(discriminator, WireType::LengthDelimited)?;
    let token = writer.start_sub_item()?;
    record_chain(registry, child_key, runtime_key, host, writer, recorder)?;
    writer.end_sub_item(token)
}

fn record_field<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    host: &Host,
    writer: &mut Writer<S>,
    recorder: &mut LengthRecorder,
) -> Result<()> {
    let type_key = match message_field_type(field) {
        Some(key) => key,
        None => return codec::write_field(registry, field, host, writer),
    };
    let value = (field.get)(host);
    match &value {
        Value::Message(inner) => record_one_message(registry, field.number, type_key, inner, writer, recorder),
        Value::Repeated(items) => {
            for item in items {
                let inner = item.as_message(field.number)?;
                record_one_message(registry, field.number, type_key, inner, writer, recorder)?;
            }
            Ok(())
        }
        v if v.is_absent() => {
            if field.flags.required {
                return Err(Error::NullInNonNullable { field: field.number });
            }
            Ok(())
        }
        _ => Err(Error::InvalidAccessor { field: field.number }),
    }
}

fn record_one_message<S: Sink>(
    registry: &TypeRegistry,
    field_number: u32,
    type_key: TypeKey,
    inner: &Arc<dyn Any + Send + Sync>,
    writer: &mut Writer<S>,
    recorder: &mut LengthRecorder,
) -> Result<()> {
    writer.write_field_header(field_number, WireType::LengthDelimited)?;
    let token = writer.start_sub_item()?;
    let before_payload = writer.len();
    record_message(registry, type_key, inner, writer, recorder)?;
    let payload_len = (writer.len() - before_payload) as u64;
    writer.end_sub_item(token)?;
    let identity = Arc::as_ptr(inner) as *const () as usize;
    recorder.record(identity, type_key, payload_len);
    Ok(())
}

// ---------------------------------------------------------------------
// Pass 2: real write, consuming the cache
// ---------------------------------------------------------------------

fn write_message_cached<S: Sink>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
    writer: &mut Writer<S>,
    recorder: &LengthRecorder,
) -> Result<()> {
    let runtime_key = registry
        .lookup((**value).type_id())
        .ok_or(Error::UnexpectedType)?;
    if !registry.is_ancestor_or_self(type_key, runtime_key) {
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
    let result = write_chain_cached(registry, type_key, runtime_key, host, writer, recorder);
    if let Some(hook) = &entry.after_serialize {
        hook(host);
    }
    if entry.recursion_check {
        writer.end_object(identity);
    }
    result
}

fn write_chain_cached<S: Sink>(
    registry: &TypeRegistry,
    current_key: TypeKey,
    runtime_key: TypeKey,
    host: &Host,
    writer: &mut Writer<S>,
    recorder: &LengthRecorder,
) -> Result<()> {
    let entry = registry.entry(current_key);
    for field in &entry.fields {
        write_field_cached(registry, field, host, writer, recorder)?;
    }
    if current_key == runtime_key {
        return Ok(());
    }
    let (child_key, discriminator) = registry
        .sub_type_toward(current_key, runtime_key)
        .ok_or(Error::UnexpectedSubType)?;
    writer.write_field_header(discriminator, WireType::LengthDelimited)?;
    let token = writer.start_sub_item()?;
    write_chain_cached(registry, child_key, runtime_key, host, writer, recorder)?;
    writer.end_sub_item(token)
}

fn write_field_cached<S: Sink>(
    registry: &TypeRegistry,
    field: &FieldDescriptor,
    host: &Host,
    writer: &mut Writer<S>,
    recorder: &LengthRecorder,
) -> Result<()> {
    let type_key = match message_field_type(field) {
        Some(key) => key,
        None => return codec::write_field(registry, field, host, writer),
    };
    let value = (field.get)(host);
    match &value {
        Value::Message(inner) => write_one_message_cached(registry, field.number, type_key, inner, writer, recorder),
        Value::Repeated(items) => {
            for item in items {
                let inner = item.as_message(field.number)?;
                write_one_message_cached(registry, field.number, type_key, inner, writer, recorder)?;
            }
            Ok(())
        }
        v if v.is_absent() => {
            if field.flags.required {
                return Err(Error::NullInNonNullable { field: field.number });
            }
            Ok(())
        }
        _ => Err(Error::InvalidAccessor { field: field.number }),
    }
}

fn write_one_message_cached<S: Sink>(
    registry: &TypeRegistry,
    field_number: u32,
    type_key: TypeKey,
    inner: &Arc<dyn Any + Send + Sync>,
    writer: &mut Writer<S>,
    recorder: &LengthRecorder,
) -> Result<()> {
    writer.write_field_header(field_number, WireType::LengthDelimited)?;
    let identity = Arc::as_ptr(inner) as *const () as usize;
    match recorder.get(identity, type_key) {
        Some(len) => {
            writer.write_message_with_len(len, |w| write_message_cached(registry, type_key, inner, w, recorder))
        }
        None => {
            let token = writer.start_sub_item()?;
            write_message_cached(registry, type_key, inner, writer, recorder)?;
            writer.end_sub_item(token)
        }
    }
}

impl TypeRegistry {
    /// Runs the measurement pre-pass over `value` (declared at `type_key`),
    /// returning a handle that a following [`Self::serialize_with_handle`]
    /// call can consume to skip the writer's default backpatch shift.
    pub fn measure_message(
        &self,
        type_key: TypeKey,
        value: &Arc<dyn Any + Send + Sync>,
    ) -> Result<MeasureHandle> {
        measure(self, type_key, value)
    }

    /// Serializes `value` reusing lengths cached by a prior `measure_message`
    /// call. `handle` must have been produced against the same `value` and
    /// registry state, or the cache will simply miss (falling back to the
    /// ordinary backpatch path) or, if the object mutated in a way that
    /// changes its encoded length, fail with [`Error::LengthMismatch`].
    pub fn serialize_with_handle<S: Sink>(
        &self,
        type_key: TypeKey,
        value: &Arc<dyn Any + Send + Sync>,
        handle: &MeasureHandle,
        writer: &mut Writer<S>,
    ) -> Result<()> {
        serialize_with_handle(self, type_key, value, handle, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptorBuilder, ScalarType};
    use crate::registry::{RegistryOptions, TypeEntry};
    use std::any::TypeId;

    struct Leaf {
        value: i32,
    }
    struct Root {
        child: Arc<dyn Any + Send + Sync>,
    }

    fn build() -> (TypeRegistry, TypeKey, TypeKey) {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let leaf_key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Leaf>(),
                    "Leaf",
                    vec![FieldDescriptorBuilder::new(
                        1,
                        ValueKind::Scalar(ScalarType::Int32),
                        Box::new(|h: &(dyn Any + Send + Sync)| Value::I32(h.downcast_ref::<Leaf>().unwrap().value)),
                        Box::new(|h: &mut (dyn Any + Send + Sync), v: Value| {
                            h.downcast_mut::<Leaf>().unwrap().value = v.as_i32(1).unwrap()
                        }),
                    )
                    .build()],
                )
                .unwrap(),
            )
            .unwrap();
        let root_key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Root>(),
                    "Root",
                    vec![FieldDescriptorBuilder::new(
                        1,
                        ValueKind::Message(leaf_key),
                        Box::new(|h: &(dyn Any + Send + Sync)| Value::Message(h.downcast_ref::<Root>().unwrap().child.clone())),
                        Box::new(|_, _| unreachable!("test never deserializes Root")),
                    )
                    .build()],
                )
                .unwrap(),
            )
            .unwrap();
        registry.freeze().unwrap();
        (registry, root_key, leaf_key)
    }

    #[test]
    fn measure_then_serialize_matches_direct_write() {
        let (registry, root_key, _leaf_key) = build();
        let root: Arc<dyn Any + Send + Sync> = Arc::new(Root {
            child: Arc::new(Leaf { value: 42 }),
        });

        let mut direct = Writer::new_buffer();
        crate::dispatch::write_message(&registry, root_key, &root, &mut direct).unwrap();
        let direct_bytes = direct.close().unwrap();

        let handle = registry.measure_message(root_key, &root).unwrap();
        assert_eq!(handle.top_level_len, direct_bytes.len() as u64);

        let mut cached = Writer::new_buffer();
        registry.serialize_with_handle(root_key, &root, &handle, &mut cached).unwrap();
        let cached_bytes = cached.close().unwrap();

        assert_eq!(cached_bytes, direct_bytes);
    }

    #[test]
    fn cache_miss_falls_back_without_error() {
        let (registry, root_key, _leaf_key) = build();
        let root: Arc<dyn Any + Send + Sync> = Arc::new(Root {
            child: Arc::new(Leaf { value: 7 }),
        });
        let empty_handle = MeasureHandle {
            top_level_len: 0,
            recorder: LengthRecorder::default(),
        };
        let mut w = Writer::new_buffer();
        registry
            .serialize_with_handle(root_key, &root, &empty_handle, &mut w)
            .unwrap();
        assert!(!w.close().unwrap().is_empty());
    }
}
