// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `prost`-derived shadow types for the handful of well-known types
//! (`google.protobuf.Duration`/`Timestamp`) that have a real upstream
//! `.proto` definition, used purely for test-time cross-validation against
//! [`crate::wkt`] -- never on the runtime dispatch path, which has no fixed
//! schema for `prost` to generate against in the first place.

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Message)]
pub struct Duration {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl From<crate::wkt::Duration> for Duration {
    fn from(d: crate::wkt::Duration) -> Self {
        Self {
            seconds: d.seconds,
            nanos: d.nanos,
        }
    }
}

impl From<crate::wkt::Timestamp> for Timestamp {
    fn from(t: crate::wkt::Timestamp) -> Self {
        Self {
            seconds: t.seconds,
            nanos: t.nanos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Reader, SliceSource};
    use crate::writer::Writer;
    use ::prost::Message;
    use bytes::Bytes;

    #[test]
    fn duration_matches_prost_encoding() {
        let ours = crate::wkt::Duration {
            seconds: 1,
            nanos: 500_000_000,
        };
        let mut w = Writer::new_buffer();
        ours.write(&mut w).unwrap();
        let our_bytes = w.close().unwrap();

        let theirs: Duration = ours.into();
        let prost_bytes = theirs.encode_to_vec();

        assert_eq!(our_bytes, prost_bytes);
    }

    #[test]
    fn timestamp_round_trips_through_prost_bytes() {
        let theirs = Timestamp {
            seconds: 1_700_000_000,
            nanos: 123_000_000,
        };
        let prost_bytes = theirs.encode_to_vec();

        let mut r = Reader::new(SliceSource::new(Bytes::from(prost_bytes)), true, false);
        let ours = crate::wkt::Timestamp::read(&mut r).unwrap();
        assert_eq!(ours.seconds, theirs.seconds);
        assert_eq!(ours.nanos, theirs.nanos);
    }
}
