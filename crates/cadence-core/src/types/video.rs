//! Decoded picture types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded picture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Y plane, then U and V planes at quarter resolution.
    Yuv420p,
    /// 8-bit packed RGB.
    Rgb24,
}

impl PixelFormat {
    /// Number of planes the format carries.
    pub const fn planes(&self) -> usize {
        match self {
            Self::Yuv420p => 3,
            Self::Rgb24 => 1,
        }
    }
}

/// A decoded picture as produced by a video decoder.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Bytes>,
    /// Bytes per row for each plane.
    pub strides: Vec<usize>,
    /// Timestamp in the stream time base.
    pub pts: Option<i64>,
}

/// A picture converted for presentation (packed RGB24).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
    pub data: Bytes,
    /// Presentation time in milliseconds.
    pub pts_ms: i64,
}

impl RgbFrame {
    /// Returns the pixel at (x, y) or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }
}
