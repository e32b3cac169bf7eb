// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reader state: a positioned input cursor over either a contiguous
//! in-memory buffer or a byte stream, with field-header/length-prefix
//! framing and sub-message nesting.
//!
//! The reader never keeps a stack of open sub-items itself. Each
//! `start_sub_item` returns a [`SubItemToken`] carrying the *previous*
//! framing state; the caller (the dispatch layer) threads that token back
//! into `end_sub_item`, which restores it. This makes nesting depth the
//! dispatcher's recursion, not a reader-owned `Vec`.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::wire::{fixed, varint, Tag, WireType};

/// A byte source the reader pulls from. One impl is a contiguous buffer
/// (`ReadOnlyMemory`/`ReadOnlySequence`-shaped); the other wraps a
/// streaming [`Read`], refilling a scratch buffer on demand.
pub trait Source {
    /// Returns the next byte, or `None` only at a legitimate end of input.
    fn next_byte(&mut self) -> Result<Option<u8>>;
    /// Reads exactly `len` bytes. Truncated input is `Error::Truncated`.
    fn read_len(&mut self, len: usize) -> Result<Bytes>;
    /// Absolute count of bytes consumed so far, used for sub-item limits.
    fn position(&self) -> u64;
}

/// A contiguous in-memory source. Cloning `Bytes` is a refcount bump, so
/// `read_len` is zero-copy.
pub struct SliceSource {
    data: Bytes,
    pos: usize,
}

impl SliceSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl Source for SliceSource {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    fn read_len(&mut self, len: usize) -> Result<Bytes> {
        if self.pos + len > self.data.len() {
            return Err(Error::Truncated);
        }
        let slice = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(slice)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}

/// A streaming source. Reads are unbuffered at this layer -- a caller
/// driving a slow `Read` should wrap it in `std::io::BufReader` the same
/// way the writer side expects a buffered sink for byte-at-a-time varint
/// writes.
pub struct StreamSource<R> {
    reader: R,
    consumed: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            consumed: 0,
        }
    }
}

impl<R: Read> Source for StreamSource<R> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte)? {
            0 => Ok(None),
            _ => {
                self.consumed += 1;
                Ok(Some(byte[0]))
            }
        }
    }

    fn read_len(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::Truncated
            } else {
                Error::Io(e)
            }
        })?;
        self.consumed += len as u64;
        Ok(Bytes::from(buf))
    }

    fn position(&self) -> u64 {
        self.consumed
    }
}

/// The active sub-item framing, if any. `None` means top-level: reads stop
/// only at genuine end of input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Frame {
    /// Length-delimited: absolute end position.
    Length(u64),
    /// Group: the field number an `EndGroup` tag must carry to close it.
    Group(u32),
}

/// Returned by `start_sub_item`, threaded back into `end_sub_item`.
pub struct SubItemToken {
    prev_frame: Option<Frame>,
}

pub struct Reader<S> {
    source: S,
    frame: Option<Frame>,
    /// Set once an `EndGroup` matching the open `Frame::Group` has been
    /// consumed by `read_field_header`, so `end_sub_item` can verify it
    /// without re-reading.
    group_end_seen: bool,
    /// Non-strict mode lets a wire-type mismatch fall through to
    /// reinterpretation (e.g. varint read as signed-varint) instead of
    /// failing; strict mode always raises `Error::TypeMismatch`.
    pub strict: bool,
    intern: Option<HashMap<Box<str>, Arc<str>>>,
}

impl<S: Source> Reader<S> {
    pub fn new(source: S, strict: bool, intern_strings: bool) -> Self {
        Self {
            source,
            frame: None,
            group_end_seen: false,
            strict,
            intern: intern_strings.then(HashMap::new),
        }
    }

    /// Reads the next field header, returning its raw tag bits or `0` at a
    /// legitimate end of input or sub-item. `0` is never a valid on-wire
    /// tag (field number 0 is reserved), so it doubles as the sentinel.
    pub fn read_field_header(&mut self) -> Result<u32> {
        if self.group_end_seen {
            return Ok(0);
        }
        if let Some(Frame::Length(end)) = self.frame {
            if self.source.position() >= end {
                return Ok(0);
            }
        }
        let raw = match varint::decode(|| self.source.next_byte())? {
            Some(v) => v,
            None => {
                return match self.frame {
                    None => Ok(0),
                    Some(_) => Err(Error::Truncated),
                }
            }
        };
        if raw > u32::MAX as u64 {
            return Err(Error::MalformedVarint);
        }
        let tag = Tag(raw as u32);
        let wire_type = tag.wire_type()?;
        if wire_type == WireType::EndGroup {
            return match self.frame {
                Some(Frame::Group(field)) if tag.field_number() == field => {
                    self.group_end_seen = true;
                    Ok(0)
                }
                _ => Err(Error::SubItemFraming {
                    reason: "unexpected end-group",
                }),
            };
        }
        Ok(raw as u32)
    }

    /// Starts a sub-item whose framing is `wire_type` (length-delimited or
    /// start-group) for `field_number`.
    pub fn start_sub_item(&mut self, field_number: u32, wire_type: WireType) -> Result<SubItemToken> {
        match wire_type {
            WireType::LengthDelimited => {
                let len = varint::decode(|| self.source.next_byte())?.ok_or(Error::Truncated)?;
                let end = self.source.position() + len;
                if let Some(Frame::Length(outer_end)) = self.frame {
                    if end > outer_end {
                        return Err(Error::Truncated);
                    }
                }
                let prev = self.frame.replace(Frame::Length(end));
                Ok(SubItemToken { prev_frame: prev })
            }
            WireType::StartGroup => {
                let prev = self.frame.replace(Frame::Group(field_number));
                self.group_end_seen = false;
                Ok(SubItemToken { prev_frame: prev })
            }
            other => Err(Error::TypeMismatch {
                field: field_number,
                expected: WireType::LengthDelimited,
                found: other,
            }),
        }
    }

    /// Closes a sub-item, restoring the enclosing framing. Fails if a
    /// length-delimited item ends with bytes remaining or overrun, or if a
    /// group never saw its matching `EndGroup`.
    pub fn end_sub_item(&mut self, token: SubItemToken) -> Result<()> {
        match self.frame {
            Some(Frame::Length(end)) => {
                if self.source.position() != end {
                    return Err(Error::SubItemFraming {
                        reason: "sub-item ended with bytes remaining or overrun",
                    });
                }
            }
            Some(Frame::Group(_)) => {
                if !self.group_end_seen {
                    return Err(Error::SubItemFraming {
                        reason: "missing end-group",
                    });
                }
                self.group_end_seen = false;
            }
            None => {}
        }
        self.frame = token.prev_frame;
        Ok(())
    }

    /// Skips a field's payload entirely: an unrecognized field number, or
    /// a recognized one the caller chooses not to decode.
    pub fn skip_field(&mut self, field_number: u32, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                varint::decode(|| self.source.next_byte())?.ok_or(Error::Truncated)?;
                Ok(())
            }
            WireType::Fixed32 => {
                self.source.read_len(4)?;
                Ok(())
            }
            WireType::Fixed64 => {
                self.source.read_len(8)?;
                Ok(())
            }
            WireType::LengthDelimited => {
                let len = varint::decode(|| self.source.next_byte())?.ok_or(Error::Truncated)?;
                self.source.read_len(len as usize)?;
                Ok(())
            }
            WireType::StartGroup => {
                let token = self.start_sub_item(field_number, WireType::StartGroup)?;
                loop {
                    let raw = self.read_field_header()?;
                    if raw == 0 {
                        break;
                    }
                    let tag = Tag(raw);
                    self.skip_field(tag.field_number(), tag.wire_type()?)?;
                }
                self.end_sub_item(token)
            }
            WireType::EndGroup => Err(Error::SubItemFraming {
                reason: "unexpected end-group",
            }),
        }
    }

    /// True when the cursor has reached the current length-delimited
    /// sub-item's end. Used by the packed-repeated reader, which has no
    /// per-item field header to signal "one more item vs. done". Always
    /// `false` outside a length-delimited frame (top-level or group framing
    /// have their own end signals via `read_field_header`).
    pub fn at_frame_end(&self) -> bool {
        match self.frame {
            Some(Frame::Length(end)) => self.source.position() >= end,
            _ => false,
        }
    }

    /// Drains every byte left in the current frame (or, at top-level, every
    /// byte left in the source) into an owned, randomly-re-readable buffer.
    /// Used by the inheritance dispatcher to look ahead for a discriminator
    /// field before the host object's concrete type is known -- the one
    /// place this engine needs more than a single forward pass over the
    /// wire. Not supported inside an open group frame, since a group has no
    /// length prefix to bound the drain.
    pub fn read_remaining(&mut self) -> Result<Bytes> {
        match self.frame {
            Some(Frame::Length(end)) => {
                let remaining = end.saturating_sub(self.source.position());
                self.source.read_len(remaining as usize)
            }
            None => {
                let mut buf = Vec::new();
                while let Some(byte) = self.source.next_byte()? {
                    buf.push(byte);
                }
                Ok(Bytes::from(buf))
            }
            Some(Frame::Group(_)) => Err(Error::SubItemFraming {
                reason: "cannot buffer remaining bytes inside a group frame",
            }),
        }
    }

    /// Asserts `found` matches `expected` in strict mode; in non-strict
    /// mode a mismatch is tolerated so the caller can attempt the
    /// `signed-varint` reinterpretation hint instead of failing outright.
    pub fn assert_wire_type(&self, field: u32, found: WireType, expected: WireType) -> Result<()> {
        if self.strict && found != expected {
            return Err(Error::TypeMismatch {
                field,
                expected,
                found,
            });
        }
        Ok(())
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        varint::decode(|| self.source.next_byte())?.ok_or(Error::Truncated)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_varint()? as i32)
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    /// Reads a varint and reinterprets it via the zig-zag transform -- the
    /// `hint(wire_type)` operation from the spec, applied without an extra
    /// on-wire bit.
    pub fn read_sint32(&mut self) -> Result<i32> {
        Ok(varint::zigzag_decode32(self.read_varint()? as u32))
    }

    pub fn read_sint64(&mut self) -> Result<i64> {
        Ok(varint::zigzag_decode(self.read_varint()?))
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self.source.read_len(4)?;
        let arr: [u8; 4] = bytes.as_ref().try_into().map_err(|_| Error::Truncated)?;
        Ok(fixed::decode32(arr))
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        let bytes = self.source.read_len(8)?;
        let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| Error::Truncated)?;
        Ok(fixed::decode64(arr))
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_fixed32()?))
    }

    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }

    /// Reads length-delimited bytes without interpreting them as UTF-8.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()?;
        Ok(self.source.read_len(len as usize)?.to_vec())
    }

    /// Appends length-delimited bytes onto an existing buffer, avoiding an
    /// extra allocation when the caller already owns scratch space
    /// (`append_bytes(existing)` in the spec).
    pub fn append_bytes(&mut self, existing: &mut Vec<u8>) -> Result<()> {
        let len = self.read_varint()?;
        existing.extend_from_slice(self.source.read_len(len as usize)?.as_ref());
        Ok(())
    }

    /// Reads a length-delimited UTF-8 string. When string interning is
    /// enabled, equal strings read during this call share one allocation.
    pub fn read_string(&mut self) -> Result<Arc<str>> {
        let len = self.read_varint()?;
        let bytes = self.source.read_len(len as usize)?;
        let s = std::str::from_utf8(bytes.as_ref())
            .map_err(|_| Error::MalformedVarint)?
            .to_owned();
        if let Some(intern) = &mut self.intern {
            if let Some(existing) = intern.get(s.as_str()) {
                return Ok(existing.clone());
            }
            let arc: Arc<str> = Arc::from(s.into_boxed_str());
            intern.insert(arc.as_ref().into(), arc.clone());
            Ok(arc)
        } else {
            Ok(Arc::from(s))
        }
    }
}
