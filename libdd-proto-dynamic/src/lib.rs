// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! A runtime-configured Protocol Buffers serialization engine.
//!
//! Unlike a generated-code protobuf library, this crate never sees a
//! `.proto` file: a [`registry::TypeRegistry`] is populated at startup with
//! one [`registry::TypeEntry`] per record type describing its fields
//! ([`descriptor::FieldDescriptor`]) -- numbers, wire framing, defaults,
//! inheritance -- and that description alone drives both directions of wire
//! encoding. Populating the registry (reading annotations off a type,
//! generating accessor closures) is the caller's job; this crate consumes a
//! finished registry and does the field-by-field encode/decode.
//!
//! The three pieces line up with the three subsystems this crate
//! implements:
//!
//! - [`wire`] + [`reader`] + [`writer`]: the stateful binary codec --
//!   varints, fixed-width little-endian, length-delimited framing, and the
//!   sub-message length-backpatching problem.
//! - [`descriptor`] + [`registry`]: the type model -- per-field metadata and
//!   the registry that indexes it by type, with inheritance and freeze
//!   semantics.
//! - [`codec`] + [`dispatch`]: the mechanism that walks a type entry's
//!   fields against a reader/writer, including the inheritance walk, packed
//!   repeated encoding, and map entry framing.
//!
//! [`wkt`] layers the well-known-type adapters (`Duration`, `Timestamp`,
//! the legacy scaled-ticks time-span, `Decimal`, `Guid`) on top, and
//! [`measure`] offers an optional pre-serialize length-computation pass for
//! callers that want to skip the writer's default backpatch shift.
//!
//! Condensed reference for the wire format itself:
//!
//! ```reference
//! message    := (tag value)*
//! tag        := (field << 3) bit-or wire_type;
//!                 encoded as uint32 varint
//! value      := varint      for wire_type == VARINT,
//!               fixed64     for wire_type == FIXED64,
//!               len-prefix  for wire_type == LEN,
//!               fixed32     for wire_type == FIXED32
//! len-prefix := size (message | string | packed);
//!                 size encoded as int32 varint
//! ```

pub mod codec;
pub mod debug;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod measure;
#[cfg(feature = "prost_impls")]
pub mod prost_impls;
pub mod reader;
pub mod registry;
pub mod value;
pub mod wire;
pub mod wkt;
pub mod writer;

use std::any::Any;
use std::io::Read;
use std::sync::Arc;

pub use error::{Error, Result};
pub use registry::{RegistryOptions, TypeEntry, TypeKey, TypeRegistry};

use reader::{Reader, SliceSource, Source, StreamSource};
use writer::{Sink, Writer};

/// Serializes `value` (declared at `type_key` in `registry`) to an owned
/// `Vec<u8>`. The common case: most callers don't need a custom [`Sink`].
pub fn serialize_to_vec(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_buffer();
    if let Err(err) = dispatch::write_message(registry, type_key, value, &mut writer) {
        writer.abandon();
        return Err(err);
    }
    writer.close()
}

/// Serializes `value` through a caller-supplied [`Sink`], following the
/// lifecycle contract in the spec's external-interfaces section: create
/// state, run the codec, `close()` (which flushes), dispose. On any failure
/// the writer is `abandon()`-ed before the error propagates, releasing its
/// staged buffer and voiding any open backpatch scratch.
pub fn serialize<S: Sink>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    value: &Arc<dyn Any + Send + Sync>,
    sink: S,
) -> Result<S> {
    let mut writer = Writer::new(sink);
    if let Err(err) = dispatch::write_message(registry, type_key, value, &mut writer) {
        writer.abandon();
        return Err(err);
    }
    writer.close()
}

/// Deserializes a message declared at `type_key` from a contiguous byte
/// buffer. `strict` controls whether a wire-type mismatch against a field's
/// declared framing is fatal (`true`) or eligible for the `signed-varint`
/// reinterpretation hint (`false`); see [`reader::Reader::assert_wire_type`].
pub fn deserialize_slice(
    registry: &TypeRegistry,
    type_key: TypeKey,
    bytes: impl Into<bytes::Bytes>,
    strict: bool,
) -> Result<Box<dyn Any + Send + Sync>> {
    let mut reader = Reader::new(SliceSource::new(bytes), strict, registry.options.intern_strings);
    dispatch::read_message(registry, type_key, &mut reader)
}

/// Deserializes a message declared at `type_key` from a streaming
/// [`Read`] source. See [`deserialize_slice`] for the `strict` parameter.
pub fn deserialize<R: Read>(
    registry: &TypeRegistry,
    type_key: TypeKey,
    source: R,
    strict: bool,
) -> Result<Box<dyn Any + Send + Sync>> {
    let mut reader = Reader::new(StreamSource::new(source), strict, registry.options.intern_strings);
    dispatch::read_message(registry, type_key, &mut reader)
}

/// Reads one top-level field header off any [`Source`], exposed at the
/// crate root since callers occasionally need to peek the wire without
/// going through a registered type (e.g. a CLI front-end's dump mode, out
/// of scope for this crate but worth not locking behind `pub(crate)`).
pub fn peek_field_header<S: Source>(reader: &mut Reader<S>) -> Result<u32> {
    reader.read_field_header()
}
