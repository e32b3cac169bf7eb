// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the engine. Every failure is synchronous and surfaces
//! out of the `serialize`/`deserialize` call that triggered it; there is no
//! partial/recoverable state kept around afterward (the writer is
//! abandoned, the reader's sub-item tokens are discarded).

use crate::wire::WireType;

/// Enum representing possible failures of a serialize or deserialize call.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A varint occupied more than 10 bytes.
    #[error("malformed varint: exceeds 10 bytes")]
    MalformedVarint,

    /// End of input reached while more bytes were required.
    #[error("truncated input: expected more bytes than were available")]
    Truncated,

    /// A field header carried a wire-type tag outside 0..=5.
    #[error("unknown wire type tag {bits}")]
    UnknownWireType { bits: u32 },

    /// A sub-item (length-delimited or group) ended with bytes remaining,
    /// or its cursor ran past the declared limit.
    #[error("sub-item framing error: {reason}")]
    SubItemFraming { reason: &'static str },

    /// A declared wire-type is incompatible with the field's value type
    /// while strict mode is active.
    #[error("type mismatch on field {field}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        field: u32,
        expected: WireType,
        found: WireType,
    },

    /// A runtime value's type has no registry entry and `auto_add_missing_types` is off.
    #[error("unexpected type: no registry entry and auto_add_missing_types is disabled")]
    UnexpectedType,

    /// A runtime type at a sub-type surface is not covered by the static
    /// type's sub-type table.
    #[error("unexpected sub-type: runtime type not registered under the static base type")]
    UnexpectedSubType,

    /// A cyclic object graph was observed while the registry's per-type
    /// recursion check was enabled.
    #[error("recursion detected while serializing an object graph")]
    Recursion,

    /// A sub-message's measured length did not match its observed encoded
    /// length -- the value mutated between the measure and write passes, or
    /// a descriptor is buggy.
    #[error("length mismatch: measured {measured}, observed {observed}")]
    LengthMismatch { measured: u64, observed: u64 },

    /// The registry's single writer lock was not acquired within its
    /// configured deadline.
    #[error("metadata timeout: registry lock not acquired within {timeout_ms}ms")]
    MetadataTimeout { timeout_ms: u64 },

    /// A mutation was attempted against a registry that has already been
    /// frozen. Unlike [`Error::MetadataTimeout`], retrying after a backoff
    /// never helps: the registry stays frozen forever.
    #[error("registry is frozen and no longer accepts mutation")]
    RegistryFrozen,

    /// A field marked non-nullable received a null/absent value on write.
    #[error("null value written for a non-nullable field {field}")]
    NullInNonNullable { field: u32 },

    /// An enum field read an integer with no matching variant and no
    /// catch-all mapping configured.
    #[error("unknown enum value {value} for field {field}")]
    UnknownEnumValue { field: u32, value: i32 },

    /// A map field read a duplicate key while `map_duplicate_fails` is set.
    #[error("duplicate key in map field {field}")]
    DuplicateMapKey { field: u32 },

    /// A required field was absent on read.
    #[error("required field {field} was absent")]
    MissingRequiredField { field: u32 },

    /// A field number was registered more than once for a type (including
    /// an inherited discriminator slot).
    #[error("duplicate field number {number} on type {type_name}")]
    DuplicateFieldNumber { type_name: &'static str, number: u32 },

    /// A sink could not obtain buffer memory to satisfy a write.
    #[error("out of space: sink could not satisfy a write of {requested} bytes")]
    OutOfSpace { requested: usize },

    /// A field's getter/setter returned or expected a [`crate::value::Value`]
    /// variant incompatible with the field's declared [`crate::descriptor::ValueKind`].
    /// This is a registration bug on the (out-of-scope) accessor-generation
    /// side, not a wire-format failure; the core surfaces it rather than
    /// panicking on the hot path.
    #[error("field {field} accessor produced a value incompatible with its declared kind")]
    InvalidAccessor { field: u32 },

    /// Underlying stream I/O failure from a `Read`/`Write` sink or source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
