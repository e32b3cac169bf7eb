// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writer state: a positioned output cursor that stages every message into
//! a growable scratch buffer and flushes it to the real sink on `close`.
//!
//! Open question (spec §9): "the choice [of backpatch strategy] appears
//! driven by the sink capability... the precise precedence is
//! implementation-defined." Resolved here (see `DESIGN.md`) by always
//! staging into an internal `Vec<u8>` and using the *buffered* strategy
//! (reserve the 10-byte max varint window, write the payload, then shift
//! it back once the true length is known) for every sub-item regardless
//! of the final sink -- a stream sink just gets the finished buffer handed
//! to it in `close()`. This drops the measure-then-write double traversal
//! entirely rather than choosing between it and the buffered strategy per
//! call.

use std::collections::HashSet;
use std::io::Write;

use crate::error::{Error, Result};
use crate::wire::{fixed, varint, Tag, WireType};

/// A sink the writer flushes its finished buffer into. Blanket-implemented
/// for anything implementing [`std::io::Write`] -- `Vec<u8>` included --
/// which covers both the "stream-like write(bytes) sink" and, via the
/// caller choosing a `Vec<u8>` sink, the "segmented buffer-writer" shape
/// from the spec's external interface.
pub trait Sink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

impl<W: Write> Sink for W {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        Write::write_all(self, bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Write::flush(self)?;
        Ok(())
    }
}

/// Returned by `start_sub_item`, threaded back into `end_sub_item`.
pub struct SubItemToken {
    /// Offset of the reserved max-width length varint.
    len_pos: usize,
    /// Offset where the payload begins, after the reserved window.
    payload_start: usize,
    kind: SubItemKind,
}

enum SubItemKind {
    Length,
    Group(u32),
}

/// The expected shape of the next scalar write, mirroring the spec's
/// `{None, Varint, Fixed32, Fixed64, String, StartGroup, SignedVarint}`
/// writer states. Unlike the reader, the writer doesn't enforce this as a
/// hard state machine (scalar writers are free functions called directly
/// by codec nodes); it exists so `write_field_header` can validate the
/// packed-field state machine and so callers have a named vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedPayload {
    None,
    Varint,
    Fixed32,
    Fixed64,
    String,
    StartGroup,
    SignedVarint,
}

pub struct Writer<S> {
    sink: S,
    buf: Vec<u8>,
    /// Field number currently in packed mode: between `set_packed_field`
    /// and `clear_packed_field`, `write_field_header` calls for this field
    /// emit no header; any other field number is an error.
    packed_field: Option<u32>,
    /// Object identities currently being serialized, for the optional
    /// per-type recursion check.
    in_progress: HashSet<usize>,
    abandoned: bool,
}

impl<S: Sink> Writer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            buf: Vec::new(),
            packed_field: None,
            in_progress: HashSet::new(),
            abandoned: false,
        }
    }

    /// Bytes staged so far in the current top-level message. Used by the
    /// measurement pass (`crate::measure`) and by packed-field length
    /// bookkeeping.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_field_header(&mut self, number: u32, wire_type: WireType) -> Result<()> {
        if let Some(packed) = self.packed_field {
            if packed != number {
                return Err(Error::SubItemFraming {
                    reason: "write_field_header for a different field while packed mode is active",
                });
            }
            return Ok(());
        }
        self.write_varint(Tag::new(number, wire_type).0 as u64)
    }

    /// Enters packed mode for field `number`: subsequent
    /// `write_field_header(number, _)` calls are no-ops until
    /// `clear_packed_field`.
    pub fn set_packed_field(&mut self, number: u32) {
        self.packed_field = Some(number);
    }

    pub fn clear_packed_field(&mut self, number: u32) -> Result<()> {
        match self.packed_field {
            Some(current) if current == number => {
                self.packed_field = None;
                Ok(())
            }
            _ => Err(Error::SubItemFraming {
                reason: "clear_packed_field for a field that wasn't the active packed field",
            }),
        }
    }

    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        varint::encode(value, &mut |b| {
            self.buf.push(b);
            Ok(())
        })
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_varint(value as u64)
    }

    pub fn write_int32(&mut self, value: i32) -> Result<()> {
        // Negative int32 is sign-extended to a 10-byte varint, matching
        // the official encoding (never truncated to 5 bytes).
        self.write_varint(value as i64 as u64)
    }

    pub fn write_int64(&mut self, value: i64) -> Result<()> {
        self.write_varint(value as u64)
    }

    pub fn write_sint32(&mut self, value: i32) -> Result<()> {
        self.write_varint(varint::zigzag_encode32(value) as u64)
    }

    pub fn write_sint64(&mut self, value: i64) -> Result<()> {
        self.write_varint(varint::zigzag_encode(value))
    }

    pub fn write_fixed32(&mut self, value: u32) -> Result<()> {
        self.buf.extend_from_slice(&fixed::encode32(value));
        Ok(())
    }

    pub fn write_fixed64(&mut self, value: u64) -> Result<()> {
        self.buf.extend_from_slice(&fixed::encode64(value));
        Ok(())
    }

    pub fn write_float(&mut self, value: f32) -> Result<()> {
        self.write_fixed32(value.to_bits())
    }

    pub fn write_double(&mut self, value: f64) -> Result<()> {
        self.write_fixed64(value.to_bits())
    }

    /// Writes raw bytes with no length prefix -- the caller is responsible
    /// for framing (used inside an already-opened sub-item, or for packed
    /// fixed-width items).
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes a length-delimited field's content: the length varint
    /// followed by `bytes`. Used for strings/bytes scalars, which never
    /// need backpatching since their length is known up front.
    pub fn write_length_delimited(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_varint(bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Opens a length-delimited sub-item: reserves the 10-byte max varint
    /// window for the length, to be backpatched by `end_sub_item`.
    pub fn start_sub_item(&mut self) -> Result<SubItemToken> {
        let len_pos = self.buf.len();
        self.buf.resize(len_pos + varint::MAX_BYTES, 0);
        Ok(SubItemToken {
            len_pos,
            payload_start: len_pos + varint::MAX_BYTES,
            kind: SubItemKind::Length,
        })
    }

    /// Opens a group: writes the start-group tag directly, no backpatch.
    pub fn start_group(&mut self, field_number: u32) -> Result<SubItemToken> {
        self.write_field_header(field_number, WireType::StartGroup)?;
        Ok(SubItemToken {
            len_pos: 0,
            payload_start: self.buf.len(),
            kind: SubItemKind::Group(field_number),
        })
    }

    /// Closes a sub-item opened by `start_sub_item`/`start_group`,
    /// writing the real length varint into the reserved window (and
    /// shifting the payload left to close the gap) or the end-group tag.
    pub fn end_sub_item(&mut self, token: SubItemToken) -> Result<()> {
        match token.kind {
            SubItemKind::Length => {
                let payload_len = self.buf.len() - token.payload_start;
                let mut len_bytes = [0u8; varint::MAX_BYTES];
                let mut n = 0usize;
                varint::encode(payload_len as u64, &mut |b| {
                    len_bytes[n] = b;
                    n += 1;
                    Ok(())
                })?;
                let gap = varint::MAX_BYTES - n;
                if gap > 0 {
                    self.buf
                        .copy_within(token.payload_start..token.payload_start + payload_len, token.payload_start - gap);
                    let new_len = self.buf.len() - gap;
                    self.buf.truncate(new_len);
                }
                self.buf[token.len_pos..token.len_pos + n].copy_from_slice(&len_bytes[..n]);
                Ok(())
            }
            SubItemKind::Group(field_number) => {
                self.write_field_header(field_number, WireType::EndGroup)
            }
        }
    }

    /// Serializes a nested message by measuring its length up front via
    /// [`crate::measure`] and writing the length prefix once, then the
    /// payload -- used for message fields going through the measurement
    /// pass. Most call sites use `start_sub_item`/`end_sub_item` directly.
    pub fn write_message_with_len(&mut self, len: u64, write_body: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.write_varint(len)?;
        let before = self.buf.len();
        write_body(self)?;
        let observed = (self.buf.len() - before) as u64;
        if observed != len {
            return Err(Error::LengthMismatch {
                measured: len,
                observed,
            });
        }
        Ok(())
    }

    /// Per-type recursion check: records `identity` as in-progress, erring
    /// if it's already present (a cycle). Call `end_object` on every exit
    /// path, including errors, to keep the set balanced.
    pub fn begin_object(&mut self, identity: usize) -> Result<()> {
        if !self.in_progress.insert(identity) {
            return Err(Error::Recursion);
        }
        Ok(())
    }

    pub fn end_object(&mut self, identity: usize) {
        self.in_progress.remove(&identity);
    }

    /// Releases pooled resources and voids any in-progress backpatch
    /// scratch without flushing to the sink -- called on any failure path.
    pub fn abandon(&mut self) {
        self.abandoned = true;
        self.buf.clear();
        self.in_progress.clear();
        self.packed_field = None;
    }

    /// Flushes the staged buffer to the sink without closing it (the
    /// caller may continue writing, e.g. for a streaming multi-message
    /// wire protocol on top of this engine).
    pub fn flush(&mut self) -> Result<()> {
        if self.abandoned {
            return Ok(());
        }
        self.sink.write_all(&self.buf)?;
        self.buf.clear();
        self.sink.flush()
    }

    /// Flushes and unwinds: fails if a sub-item token was never closed
    /// (packed mode still active, or the backing buffer was left at an
    /// inconsistent length -- caught indirectly since every open token
    /// holds a mutable borrow of the writer in this design, so an
    /// unclosed token is a compile error, not a runtime one).
    pub fn close(mut self) -> Result<S> {
        if self.packed_field.is_some() {
            return Err(Error::SubItemFraming {
                reason: "close() called with packed-field mode still active",
            });
        }
        self.flush()?;
        Ok(self.sink)
    }
}

impl Writer<Vec<u8>> {
    /// Convenience constructor for the common "serialize to an owned
    /// buffer" path.
    pub fn new_buffer() -> Self {
        Writer::new(Vec::new())
    }

    /// Consumes the writer, returning the staged buffer directly. Used by
    /// the measurement pass's null-ish probe writer, which never reaches
    /// `close()`.
    pub fn into_staged(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_int32_field_1_150() {
        let mut w = Writer::new_buffer();
        w.write_field_header(1, WireType::Varint).unwrap();
        w.write_int32(150).unwrap();
        assert_eq!(w.close().unwrap(), vec![0x08, 0x96, 0x01]);
    }

    #[test]
    fn scenario_string_field_2_testing() {
        let mut w = Writer::new_buffer();
        w.write_field_header(2, WireType::LengthDelimited).unwrap();
        w.write_length_delimited(b"testing").unwrap();
        assert_eq!(
            w.close().unwrap(),
            vec![0x12, 0x07, 0x74, 0x65, 0x73, 0x74, 0x69, 0x6e, 0x67]
        );
    }

    #[test]
    fn scenario_sub_message_field_3() {
        let mut w = Writer::new_buffer();
        w.write_field_header(3, WireType::LengthDelimited).unwrap();
        let token = w.start_sub_item().unwrap();
        w.write_field_header(1, WireType::Varint).unwrap();
        w.write_int32(150).unwrap();
        w.end_sub_item(token).unwrap();
        assert_eq!(w.close().unwrap(), vec![0x1a, 0x03, 0x08, 0x96, 0x01]);
    }

    #[test]
    fn nested_sub_items_backpatch_independently() {
        let mut w = Writer::new_buffer();
        w.write_field_header(1, WireType::LengthDelimited).unwrap();
        let outer = w.start_sub_item().unwrap();
        w.write_field_header(1, WireType::LengthDelimited).unwrap();
        let inner = w.start_sub_item().unwrap();
        w.write_field_header(5, WireType::Varint).unwrap();
        w.write_int64(42).unwrap();
        w.end_sub_item(inner).unwrap();
        w.end_sub_item(outer).unwrap();
        let bytes = w.close().unwrap();
        // outer: tag(1,LEN) len=5 { tag(1,LEN) len=3 { tag(5,varint) 42 } }
        assert_eq!(bytes, vec![0x0a, 0x05, 0x0a, 0x03, 0x28, 0x2a]);
    }

    #[test]
    fn group_framing_round_trip() {
        let mut w = Writer::new_buffer();
        let token = w.start_group(1).unwrap();
        w.write_field_header(5, WireType::Varint).unwrap();
        w.write_int64(1).unwrap();
        w.end_sub_item(token).unwrap();
        assert_eq!(w.close().unwrap(), vec![0x0b, 0x28, 0x01, 0x0c]);
    }

    #[test]
    fn packed_field_state_machine_rejects_other_fields() {
        let mut w = Writer::new_buffer();
        w.set_packed_field(4);
        assert!(w.write_field_header(7, WireType::Varint).is_err());
        w.clear_packed_field(4).unwrap();
    }

    #[test]
    fn scenario_packed_repeated_int32() {
        let mut w = Writer::new_buffer();
        w.write_field_header(4, WireType::LengthDelimited).unwrap();
        let token = w.start_sub_item().unwrap();
        w.set_packed_field(4);
        for v in [3, 270, 86942] {
            w.write_int32(v).unwrap();
        }
        w.clear_packed_field(4).unwrap();
        w.end_sub_item(token).unwrap();
        assert_eq!(
            w.close().unwrap(),
            vec![0x22, 0x06, 0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05]
        );
    }

    #[test]
    fn recursion_check_flags_repeated_identity() {
        let mut w = Writer::new_buffer();
        w.begin_object(0x1234).unwrap();
        assert!(matches!(w.begin_object(0x1234), Err(Error::Recursion)));
        w.end_object(0x1234);
        assert!(w.begin_object(0x1234).is_ok());
    }
}
