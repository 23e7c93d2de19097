//! Encoded packets as read from a container.

use bytes::Bytes;

use super::Rational;

/// An encoded, not-yet-decoded unit of one stream.
///
/// The payload is a reference-counted [`Bytes`] handle: cloning a packet
/// duplicates the reference, not the data, and the payload is released when
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Index of the stream within the container.
    pub stream_index: usize,
    /// Presentation timestamp in the stream time base.
    pub pts: Option<i64>,
    /// Decode timestamp in the stream time base.
    pub dts: Option<i64>,
    /// Duration in the stream time base (0 when unknown).
    pub duration: i64,
    pub is_key: bool,
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, pts: Option<i64>, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts,
            dts: pts,
            duration: 0,
            is_key: false,
            data: data.into(),
        }
    }

    /// Timestamp used for presentation: pts, falling back to dts.
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }

    /// Presentation time in milliseconds; packets without any timestamp map to 0.
    pub fn presentation_ms(&self, time_base: Rational) -> i64 {
        self.timestamp().map_or(0, |ts| time_base.ts_to_ms(ts))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
