// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A pretty-printer for a decoded (or about-to-be-encoded) dynamic message:
//! field number -> value, recursively through nested messages, repeated
//! items, and map entries. Not part of the wire-format core -- useful for
//! the test harness and for anyone embedding this engine who wants a quick
//! look at what a registry-described value actually holds, the same role
//! the teacher's manually-derived `Debug` impls play for its fixed-schema
//! [`crate::wkt`]-style types.

use std::any::Any;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::{TypeKey, TypeRegistry};
use crate::value::Value;

type Host = dyn Any + Send + Sync;

/// Formats `value` (declared at `type_key`) as an indented `field_number:
/// value` tree. Fails the same way the dispatch layer would: an
/// unregistered runtime type, or a runtime type outside `type_key`'s
/// sub-type tree.
pub fn format_message(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
) -> Result<String> {
    let runtime_key = registry
        .lookup((**value).type_id())
        .ok_or(Error::UnexpectedType)?;
    if !registry.is_ancestor_or_self(type_key, runtime_key) {
        return Err(Error::UnexpectedSubType);
    }
    let mut out = String::new();
    write_fields(registry, runtime_key, value.as_ref(), &mut out, 0)?;
    Ok(out)
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_fields(registry: &TypeRegistry, runtime_key: TypeKey, host: &Host, out: &mut String, depth: usize) -> Result<()> {
    let _ = writeln!(out, "{{");
    for level in registry.inheritance_chain(runtime_key) {
        let entry = registry.entry(level);
        for field in &entry.fields {
            let value = (field.get)(host);
            if value.is_absent() {
                continue;
            }
            indent(out, depth + 1);
            let _ = write!(out, "{}: ", field.number);
            write_value(registry, &value, out, depth + 1)?;
            out.push('\n');
        }
    }
    indent(out, depth);
    out.push('}');
    Ok(())
}

fn write_value(registry: &TypeRegistry, value: &Value, out: &mut String, depth: usize) -> Result<()> {
    match value {
        Value::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Value::I32(v) => {
            let _ = write!(out, "{v}");
        }
        Value::I64(v) => {
            let _ = write!(out, "{v}");
        }
        Value::U32(v) => {
            let _ = write!(out, "{v}");
        }
        Value::U64(v) => {
            let _ = write!(out, "{v}");
        }
        Value::F32(v) => {
            let _ = write!(out, "{v}");
        }
        Value::F64(v) => {
            let _ = write!(out, "{v}");
        }
        Value::String(v) => {
            let _ = write!(out, "{v:?}");
        }
        Value::Bytes(v) => {
            let _ = write!(out, "<{} bytes>", v.len());
        }
        Value::Enum(v) => {
            let _ = write!(out, "#{v}");
        }
        Value::Message(inner) => {
            let runtime_key = registry
                .lookup((**inner).type_id())
                .ok_or(Error::UnexpectedType)?;
            write_fields(registry, runtime_key, inner.as_ref(), out, depth)?;
        }
        Value::Repeated(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(registry, item, out, depth)?;
            }
            out.push(']');
        }
        Value::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(registry, k, out, depth)?;
                out.push_str(" => ");
                write_value(registry, v, out, depth)?;
            }
            out.push('}');
        }
        Value::Absent => out.push_str("<absent>"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptorBuilder, ScalarType, ValueKind};
    use crate::registry::{RegistryOptions, TypeEntry};
    use std::any::TypeId;

    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn formats_flat_scalar_fields() {
        let registry = TypeRegistry::new(RegistryOptions::default());
        let key = registry
            .register(
                TypeEntry::new(
                    TypeId::of::<Point>(),
                    "Point",
                    vec![
                        FieldDescriptorBuilder::new(
                            1,
                            ValueKind::Scalar(ScalarType::Int32),
                            Box::new(|h: &(dyn Any + Send + Sync)| Value::I32(h.downcast_ref::<Point>().unwrap().x)),
                            Box::new(|_, _| {}),
                        )
                        .build(),
                        FieldDescriptorBuilder::new(
                            2,
                            ValueKind::Scalar(ScalarType::Int32),
                            Box::new(|h: &(dyn Any + Send + Sync)| Value::I32(h.downcast_ref::<Point>().unwrap().y)),
                            Box::new(|_, _| {}),
                        )
                        .build(),
                    ],
                )
                .unwrap(),
            )
            .unwrap();
        registry.freeze().unwrap();
        let value: Arc<dyn Any + Send + Sync> = Arc::new(Point { x: 1, y: 2 });
        let text = format_message(&registry, key, &value).unwrap();
        assert!(text.contains("1: 1"));
        assert!(text.contains("2: 2"));
    }
}
