// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Well-known-type adapters (§4.I): `Duration`, `Timestamp`, the legacy
//! scaled-ticks time-span format, `Decimal`, and `Guid`. Each adapter
//! reads/writes its fixed two- or three-field sub-message shape directly
//! against a [`Writer`]/[`Reader`] rather than going through the general
//! field-descriptor machinery, since their wire layout is fixed by the
//! upstream `.proto` (for `Duration`/`Timestamp`) or by legacy
//! compatibility (scaled-ticks, `Decimal`, `Guid`) and not user-described.

use crate::error::{Error, Result};
use crate::reader::{Reader, Source};
use crate::wire::WireType;
use crate::writer::{Sink, Writer};

/// `google.protobuf.Duration`: `{1: seconds (int64), 2: nanos (int32)}`.
/// Negative durations keep seconds and nanos the same sign; nanos is
/// always normalized non-negative on serialize, borrowing a unit of sign
/// from seconds when the ticks value was negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(test, derive(bolero::generator::TypeGenerator))]
pub struct Duration {
    pub seconds: i64,
    pub nanos: i32,
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

impl Duration {
    /// Converts from a tick count at `ticks_per_second` resolution (e.g.
    /// 10_000_000 for .NET-style 100ns ticks), matching
    /// `seconds = ticks / tps; nanos = (ticks % tps) * (1e9 / tps)`, with
    /// nanos normalized non-negative.
    pub fn from_ticks(ticks: i64, ticks_per_second: i64) -> Self {
        let mut seconds = ticks / ticks_per_second;
        let mut remainder = ticks % ticks_per_second;
        if remainder < 0 {
            remainder += ticks_per_second;
            seconds -= 1;
        }
        let nanos = (remainder * NANOS_PER_SEC / ticks_per_second) as i32;
        Self { seconds, nanos }
    }

    pub fn to_ticks(self, ticks_per_second: i64) -> i64 {
        self.seconds * ticks_per_second + (self.nanos as i64) * ticks_per_second / NANOS_PER_SEC
    }

    pub fn write<S: Sink>(self, writer: &mut Writer<S>) -> Result<()> {
        if self.seconds != 0 {
            writer.write_field_header(1, WireType::Varint)?;
            writer.write_int64(self.seconds)?;
        }
        if self.nanos != 0 {
            writer.write_field_header(2, WireType::Varint)?;
            writer.write_int32(self.nanos)?;
        }
        Ok(())
    }

    pub fn read<S: Source>(reader: &mut Reader<S>) -> Result<Self> {
        let mut seconds = 0i64;
        let mut nanos = 0i32;
        loop {
            let raw = reader.read_field_header()?;
            if raw == 0 {
                break;
            }
            let tag = crate::wire::Tag(raw);
            match tag.field_number() {
                1 => seconds = reader.read_int64()?,
                2 => nanos = reader.read_int32()?,
                _ => reader.skip_field(tag.field_number(), tag.wire_type()?)?,
            }
        }
        Ok(Self { seconds, nanos })
    }
}

/// `google.protobuf.Timestamp`: identical shape to `Duration`, offset from
/// the Unix epoch (1970-01-01 UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(test, derive(bolero::generator::TypeGenerator))]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn write<S: Sink>(self, writer: &mut Writer<S>) -> Result<()> {
        Duration {
            seconds: self.seconds,
            nanos: self.nanos,
        }
        .write(writer)
    }

    pub fn read<S: Source>(reader: &mut Reader<S>) -> Result<Self> {
        let d = Duration::read(reader)?;
        Ok(Self {
            seconds: d.seconds,
            nanos: d.nanos,
        })
    }
}

/// Scale unit for the legacy scaled-ticks time-span format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum TimeScale {
    Days = 0,
    Hours = 1,
    Minutes = 2,
    Seconds = 3,
    Milliseconds = 4,
    Ticks = 5,
    MinMax = 6,
}

impl TimeScale {
    pub fn from_wire(value: i32) -> Result<Self> {
        Ok(match value {
            0 => TimeScale::Days,
            1 => TimeScale::Hours,
            2 => TimeScale::Minutes,
            3 => TimeScale::Seconds,
            4 => TimeScale::Milliseconds,
            5 => TimeScale::Ticks,
            6 => TimeScale::MinMax,
            other => {
                return Err(Error::UnknownEnumValue {
                    field: 2,
                    value: other,
                })
            }
        })
    }
}

/// The date-time "kind" discriminator, serialized only when
/// `RegistryOptions::include_datetime_kind` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum DateTimeKind {
    Unspecified = 0,
    Utc = 1,
    Local = 2,
}

/// The legacy project-specific scaled-ticks format:
/// `{1: value (signed-varint), 2: scale (varint), 3: kind (varint)}`.
/// `value` at `i64::MIN`/`i64::MAX` encodes saturating +/-infinity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaledTicks {
    pub value: i64,
    pub scale: TimeScale,
    pub kind: DateTimeKind,
}

impl ScaledTicks {
    pub fn write<S: Sink>(self, writer: &mut Writer<S>, include_kind: bool) -> Result<()> {
        if self.value != 0 {
            writer.write_field_header(1, WireType::Varint)?;
            writer.write_sint64(self.value)?;
        }
        if !matches!(self.scale, TimeScale::Days) {
            writer.write_field_header(2, WireType::Varint)?;
            writer.write_int32(self.scale as i32)?;
        }
        if include_kind && !matches!(self.kind, DateTimeKind::Unspecified) {
            writer.write_field_header(3, WireType::Varint)?;
            writer.write_int32(self.kind as i32)?;
        }
        Ok(())
    }

    pub fn read<S: Source>(reader: &mut Reader<S>) -> Result<Self> {
        let mut value = 0i64;
        let mut scale = TimeScale::Days;
        let mut kind = DateTimeKind::Unspecified;
        loop {
            let raw = reader.read_field_header()?;
            if raw == 0 {
                break;
            }
            let tag = crate::wire::Tag(raw);
            match tag.field_number() {
                1 => value = reader.read_sint64()?,
                2 => scale = TimeScale::from_wire(reader.read_int32()?)?,
                3 => {
                    kind = match reader.read_int32()? {
                        0 => DateTimeKind::Unspecified,
                        1 => DateTimeKind::Utc,
                        2 => DateTimeKind::Local,
                        other => return Err(Error::UnknownEnumValue { field: 3, value: other }),
                    }
                }
                _ => reader.skip_field(tag.field_number(), tag.wire_type()?)?,
            }
        }
        Ok(Self { value, scale, kind })
    }
}

/// A 128-bit decimal split as `{1: low64, 2: high32, 3: signscale}`, where
/// `signscale`'s low 16 bits are the scale (0..=28) and bit 31 is the sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decimal {
    pub low: u64,
    pub high: u32,
    pub scale: u8,
    pub negative: bool,
}

impl Decimal {
    fn signscale(self) -> u32 {
        let mut v = self.scale as u32 & 0xFFFF;
        if self.negative {
            v |= 1 << 31;
        }
        v
    }

    pub fn write<S: Sink>(self, writer: &mut Writer<S>) -> Result<()> {
        if self.low != 0 {
            writer.write_field_header(1, WireType::Varint)?;
            writer.write_int64(self.low as i64)?;
        }
        if self.high != 0 {
            writer.write_field_header(2, WireType::Varint)?;
            writer.write_int32(self.high as i32)?;
        }
        let signscale = self.signscale();
        if signscale != 0 {
            writer.write_field_header(3, WireType::Varint)?;
            writer.write_int32(signscale as i32)?;
        }
        Ok(())
    }

    pub fn read<S: Source>(reader: &mut Reader<S>) -> Result<Self> {
        let mut low = 0u64;
        let mut high = 0u32;
        let mut signscale = 0u32;
        loop {
            let raw = reader.read_field_header()?;
            if raw == 0 {
                break;
            }
            let tag = crate::wire::Tag(raw);
            match tag.field_number() {
                1 => low = reader.read_int64()? as u64,
                2 => high = reader.read_int32()? as u32,
                3 => signscale = reader.read_int32()? as u32,
                _ => reader.skip_field(tag.field_number(), tag.wire_type()?)?,
            }
        }
        Ok(Self {
            low,
            high,
            scale: (signscale & 0xFFFF) as u8,
            negative: signscale & (1 << 31) != 0,
        })
    }
}

/// A GUID: `{1: low64, 2: high64}`, the little-endian byte halves of the
/// canonical 16-byte form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Guid {
    pub low: u64,
    pub high: u64,
}

impl Guid {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let low = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let high = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Self { low, high }
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..8].copy_from_slice(&self.low.to_le_bytes());
        out[8..16].copy_from_slice(&self.high.to_le_bytes());
        out
    }

    pub fn write<S: Sink>(self, writer: &mut Writer<S>) -> Result<()> {
        if self.low != 0 {
            writer.write_field_header(1, WireType::Varint)?;
            writer.write_int64(self.low as i64)?;
        }
        if self.high != 0 {
            writer.write_field_header(2, WireType::Varint)?;
            writer.write_int64(self.high as i64)?;
        }
        Ok(())
    }

    pub fn read<S: Source>(reader: &mut Reader<S>) -> Result<Self> {
        let mut low = 0u64;
        let mut high = 0u64;
        loop {
            let raw = reader.read_field_header()?;
            if raw == 0 {
                break;
            }
            let tag = crate::wire::Tag(raw);
            match tag.field_number() {
                1 => low = reader.read_int64()? as u64,
                2 => high = reader.read_int64()? as u64,
                _ => reader.skip_field(tag.field_number(), tag.wire_type()?)?,
            }
        }
        Ok(Self { low, high })
    }
}
