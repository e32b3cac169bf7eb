// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Integration coverage for the concrete hex scenarios enumerated in the
//! testable-properties section of this crate's design: build a tiny
//! registry by hand (the way a schema-discovery front-end would, but
//! without depending on one), serialize, and assert byte-for-byte against
//! the official protobuf wire encoding.

use std::any::{Any, TypeId};
use std::sync::Arc;

use libdd_proto_dynamic::descriptor::{DataFormat, FieldDescriptorBuilder, ScalarType, ValueKind, WellKnownKind};
use libdd_proto_dynamic::registry::{RegistryOptions, TypeEntry, TypeRegistry};
use libdd_proto_dynamic::value::Value;
use libdd_proto_dynamic::wkt;
use libdd_proto_dynamic::{deserialize_slice, serialize_to_vec};

type Host = dyn Any + Send + Sync;

#[derive(Default)]
struct SingleInt32 {
    a: i32,
}

#[test]
fn scenario_1_message_field1_int32_150() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<SingleInt32>(),
                "SingleInt32",
                vec![FieldDescriptorBuilder::new(
                    1,
                    ValueKind::Scalar(ScalarType::Int32),
                    Box::new(|h: &Host| Value::I32(h.downcast_ref::<SingleInt32>().unwrap().a)),
                    Box::new(|h: &mut Host, v: Value| h.downcast_mut::<SingleInt32>().unwrap().a = v.as_i32(1).unwrap()),
                )
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<SingleInt32>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(SingleInt32 { a: 150 });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    assert_eq!(bytes, vec![0x08, 0x96, 0x01]);

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    assert_eq!(decoded.downcast_ref::<SingleInt32>().unwrap().a, 150);
}

#[derive(Default)]
struct SingleString {
    s: String,
}

#[test]
fn scenario_2_message_field2_string_testing() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<SingleString>(),
                "SingleString",
                vec![FieldDescriptorBuilder::new(
                    2,
                    ValueKind::Scalar(ScalarType::String),
                    Box::new(|h: &Host| Value::String(Arc::from(h.downcast_ref::<SingleString>().unwrap().s.as_str()))),
                    Box::new(|h: &mut Host, v: Value| {
                        h.downcast_mut::<SingleString>().unwrap().s = v.as_str(2).unwrap().to_owned()
                    }),
                )
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<SingleString>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(SingleString { s: "testing".to_owned() });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    assert_eq!(
        bytes,
        vec![0x12, 0x07, 0x74, 0x65, 0x73, 0x74, 0x69, 0x6e, 0x67]
    );

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    assert_eq!(decoded.downcast_ref::<SingleString>().unwrap().s, "testing");
}

#[derive(Default)]
struct PackedInts {
    items: Vec<i32>,
}

#[test]
fn scenario_3_packed_repeated_int32_field4() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<PackedInts>(),
                "PackedInts",
                vec![FieldDescriptorBuilder::new(
                    4,
                    ValueKind::Repeated(Box::new(ValueKind::Scalar(ScalarType::Int32))),
                    Box::new(|h: &Host| {
                        Value::Repeated(
                            h.downcast_ref::<PackedInts>()
                                .unwrap()
                                .items
                                .iter()
                                .map(|v| Value::I32(*v))
                                .collect(),
                        )
                    }),
                    Box::new(|h: &mut Host, v: Value| {
                        if let Value::Repeated(items) = v {
                            h.downcast_mut::<PackedInts>().unwrap().items =
                                items.into_iter().map(|item| item.as_i32(4).unwrap()).collect();
                        }
                    }),
                )
                .packed(true)
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<PackedInts>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(PackedInts {
        items: vec![3, 270, 86942],
    });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    assert_eq!(
        bytes,
        vec![0x22, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05]
    );

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    assert_eq!(decoded.downcast_ref::<PackedInts>().unwrap().items, vec![3, 270, 86942]);
}

#[derive(Default)]
struct Inner {
    a: i32,
}
#[derive(Default)]
struct Outer {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

#[test]
fn scenario_4_submessage_field3() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    let inner_key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<Inner>(),
                "Inner",
                vec![FieldDescriptorBuilder::new(
                    1,
                    ValueKind::Scalar(ScalarType::Int32),
                    Box::new(|h: &Host| Value::I32(h.downcast_ref::<Inner>().unwrap().a)),
                    Box::new(|h: &mut Host, v: Value| h.downcast_mut::<Inner>().unwrap().a = v.as_i32(1).unwrap()),
                )
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<Inner>::default())),
        )
        .unwrap();
    let outer_key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<Outer>(),
                "Outer",
                vec![FieldDescriptorBuilder::new(
                    3,
                    ValueKind::Message(inner_key),
                    Box::new(|h: &Host| match &h.downcast_ref::<Outer>().unwrap().inner {
                        Some(inner) => Value::Message(inner.clone()),
                        None => Value::Absent,
                    }),
                    Box::new(|h: &mut Host, v: Value| {
                        if let Value::Message(inner) = v {
                            h.downcast_mut::<Outer>().unwrap().inner = Some(inner);
                        }
                    }),
                )
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<Outer>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(Outer {
        inner: Some(Arc::new(Inner { a: 150 })),
    });
    let bytes = serialize_to_vec(&registry, outer_key, &value).unwrap();
    assert_eq!(bytes, vec![0x1a, 0x03, 0x08, 0x96, 0x01]);

    let decoded = deserialize_slice(&registry, outer_key, bytes, true).unwrap();
    let outer = decoded.downcast_ref::<Outer>().unwrap();
    let inner = outer.inner.as_ref().unwrap().downcast_ref::<Inner>().unwrap();
    assert_eq!(inner.a, 150);
}

#[derive(Default)]
struct HoldsDuration {
    d: Option<Arc<dyn Any + Send + Sync>>,
}

#[test]
fn scenario_5_duration_1_5_seconds() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    // `TypeKey` is never consulted for a well-known-type field (its shape
    // is fixed, not registry-described), but a `ValueKind::Message` still
    // needs one; any registered entry works as the unread placeholder.
    let placeholder_key = registry
        .register(TypeEntry::new(TypeId::of::<()>(), "Unit", vec![]).unwrap())
        .unwrap();
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<HoldsDuration>(),
                "HoldsDuration",
                vec![FieldDescriptorBuilder::new(
                    1,
                    ValueKind::Message(placeholder_key),
                    Box::new(|h: &Host| match &h.downcast_ref::<HoldsDuration>().unwrap().d {
                        Some(d) => Value::Message(d.clone()),
                        None => Value::Absent,
                    }),
                    Box::new(|h: &mut Host, v: Value| {
                        if let Value::Message(d) = v {
                            h.downcast_mut::<HoldsDuration>().unwrap().d = Some(d);
                        }
                    }),
                )
                .data_format(DataFormat::WellKnown(WellKnownKind::Duration))
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<HoldsDuration>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(HoldsDuration {
        d: Some(Arc::new(wkt::Duration {
            seconds: 1,
            nanos: 500_000_000,
        })),
    });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    // field 1, LEN, then the Duration sub-message's own {1: 1}{2: 500000000}
    assert_eq!(
        bytes,
        vec![0x0a, 0x08, 0x08, 0x01, 0x10, 0x80, 0x94, 0xeb, 0xdc, 0x01]
    );

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    let host = decoded.downcast_ref::<HoldsDuration>().unwrap();
    let d = host.d.as_ref().unwrap().downcast_ref::<wkt::Duration>().unwrap();
    assert_eq!(*d, wkt::Duration { seconds: 1, nanos: 500_000_000 });
}

#[derive(Default)]
struct StringIntMap {
    entries: Vec<(String, i32)>,
}

#[test]
fn scenario_6_map_string_int32_field7() {
    let registry = TypeRegistry::new(RegistryOptions::default());
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<StringIntMap>(),
                "StringIntMap",
                vec![FieldDescriptorBuilder::new(
                    7,
                    ValueKind::Map {
                        key: ScalarType::String,
                        value: Box::new(ValueKind::Scalar(ScalarType::Int32)),
                    },
                    Box::new(|h: &Host| {
                        Value::Map(
                            h.downcast_ref::<StringIntMap>()
                                .unwrap()
                                .entries
                                .iter()
                                .map(|(k, v)| (Value::String(Arc::from(k.as_str())), Value::I32(*v)))
                                .collect(),
                        )
                    }),
                    Box::new(|h: &mut Host, v: Value| {
                        if let Value::Map(entries) = v {
                            h.downcast_mut::<StringIntMap>().unwrap().entries = entries
                                .into_iter()
                                .map(|(k, v)| (k.as_str(7).unwrap().to_owned(), v.as_i32(7).unwrap()))
                                .collect();
                        }
                    }),
                )
                .build()],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<StringIntMap>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();

    let value: Arc<dyn Any + Send + Sync> = Arc::new(StringIntMap {
        entries: vec![("a".to_owned(), 1), ("b".to_owned(), 2)],
    });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    assert_eq!(
        bytes,
        vec![
            0x3a, 0x05, 0x0a, 0x01, 0x61, 0x10, 0x01, 0x3a, 0x05, 0x0a, 0x01, 0x62, 0x10, 0x02,
        ]
    );

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    let mut entries = decoded.downcast_ref::<StringIntMap>().unwrap().entries.clone();
    entries.sort();
    assert_eq!(entries, vec![("a".to_owned(), 1), ("b".to_owned(), 2)]);
}

#[derive(Default)]
struct TwoInts {
    a: i32,
    b: i32,
}

fn two_ints_registry(use_implicit_zero_defaults: bool) -> (TypeRegistry, libdd_proto_dynamic::registry::TypeKey) {
    let registry = TypeRegistry::new(RegistryOptions {
        use_implicit_zero_defaults,
        ..RegistryOptions::default()
    });
    let key = registry
        .register(
            TypeEntry::new(
                TypeId::of::<TwoInts>(),
                "TwoInts",
                vec![
                    FieldDescriptorBuilder::new(
                        1,
                        ValueKind::Scalar(ScalarType::Int32),
                        Box::new(|h: &Host| Value::I32(h.downcast_ref::<TwoInts>().unwrap().a)),
                        Box::new(|h: &mut Host, v: Value| h.downcast_mut::<TwoInts>().unwrap().a = v.as_i32(1).unwrap()),
                    )
                    .build(),
                    FieldDescriptorBuilder::new(
                        2,
                        ValueKind::Scalar(ScalarType::Int32),
                        Box::new(|h: &Host| Value::I32(h.downcast_ref::<TwoInts>().unwrap().b)),
                        Box::new(|h: &mut Host, v: Value| h.downcast_mut::<TwoInts>().unwrap().b = v.as_i32(2).unwrap()),
                    )
                    .build(),
                ],
            )
            .unwrap()
            .with_factory(Box::new(|| Box::<TwoInts>::default())),
        )
        .unwrap();
    registry.freeze().unwrap();
    (registry, key)
}

#[test]
fn implicit_zero_default_suppresses_write_and_seeds_read_when_enabled() {
    let (registry, key) = two_ints_registry(true);
    let value: Arc<dyn Any + Send + Sync> = Arc::new(TwoInts { a: 0, b: 3 });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    // field 1 == its implicit zero and is suppressed entirely; only field 2 is written.
    assert_eq!(bytes, vec![0x10, 0x03]);

    let decoded = deserialize_slice(&registry, key, bytes, true).unwrap();
    let decoded = decoded.downcast_ref::<TwoInts>().unwrap();
    assert_eq!(decoded.a, 0);
    assert_eq!(decoded.b, 3);
}

#[test]
fn implicit_zero_default_off_by_default_writes_the_zero_scalar() {
    let (registry, key) = two_ints_registry(false);
    let value: Arc<dyn Any + Send + Sync> = Arc::new(TwoInts { a: 0, b: 3 });
    let bytes = serialize_to_vec(&registry, key, &value).unwrap();
    // with the option off, a zero-valued field with no explicit default still writes.
    assert_eq!(bytes, vec![0x08, 0x00, 0x10, 0x03]);
}
