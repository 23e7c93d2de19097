//! Audio format descriptors, decoded frames, and output chunks.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Rational;

/// Sample encoding of decoded audio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8P,
    S16P,
    S32P,
    F32P,
    F64P,
}

impl SampleFormat {
    /// Size of a single sample of one channel, in bytes.
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8P => 1,
            Self::S16 | Self::S16P => 2,
            Self::S32 | Self::S32P | Self::F32 | Self::F32P => 4,
            Self::F64 | Self::F64P => 8,
        }
    }

    /// Whether each channel lives in its own plane.
    pub const fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8P | Self::S16P | Self::S32P | Self::F32P | Self::F64P
        )
    }

    /// The interleaved variant of this format.
    pub const fn packed(&self) -> Self {
        match self {
            Self::U8 | Self::U8P => Self::U8,
            Self::S16 | Self::S16P => Self::S16,
            Self::S32 | Self::S32P => Self::S32,
            Self::F32 | Self::F32P => Self::F32,
            Self::F64 | Self::F64P => Self::F64,
        }
    }

    /// Short lowercase name, matching the usual decoder naming.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "flt",
            Self::F64 => "dbl",
            Self::U8P => "u8p",
            Self::S16P => "s16p",
            Self::S32P => "s32p",
            Self::F32P => "fltp",
            Self::F64P => "dblp",
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Speaker arrangement as a channel bit mask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    pub const MONO: Self = Self(0x4);
    pub const STEREO: Self = Self(0x3);
    pub const SURROUND_2_1: Self = Self(0x103);
    pub const QUAD: Self = Self(0x33);
    pub const SURROUND_5_0: Self = Self(0x607);
    pub const SURROUND_5_1: Self = Self(0x60F);
    pub const SURROUND_6_1: Self = Self(0x70F);
    pub const SURROUND_7_1: Self = Self(0x63F);

    /// Synthesize the conventional layout for a channel count.
    pub fn default_for(channels: u16) -> Self {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            3 => Self::SURROUND_2_1,
            4 => Self::QUAD,
            5 => Self::SURROUND_5_0,
            6 => Self::SURROUND_5_1,
            7 => Self::SURROUND_6_1,
            8 => Self::SURROUND_7_1,
            0 => Self(0),
            n if n >= 64 => Self(u64::MAX),
            n => Self((1u64 << n) - 1),
        }
    }

    /// Number of channels in the mask.
    pub const fn channels(&self) -> u16 {
        self.0.count_ones() as u16
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Description of a decoded audio stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channels: u16,
    /// Declared layout; `None` when the source does not say.
    pub layout: Option<ChannelLayout>,
    /// Time base of the decoder's frame timestamps.
    pub time_base: Rational,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, sample_format: SampleFormat, channels: u16) -> Self {
        Self {
            sample_rate,
            sample_format,
            channels,
            layout: None,
            time_base: Rational::new(1, sample_rate as i32),
        }
    }

    /// Bytes occupied by one sample across all channels.
    pub const fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }

    /// Declared layout, or the default one for the channel count.
    pub fn layout_or_default(&self) -> ChannelLayout {
        self.layout
            .unwrap_or_else(|| ChannelLayout::default_for(self.channels))
    }

    /// The same stream description with an interleaved sample format.
    pub const fn packed(&self) -> Self {
        Self {
            sample_format: self.sample_format.packed(),
            ..*self
        }
    }

    /// Bytes per second of the interleaved stream.
    pub const fn byte_rate(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }
}

/// A block of decoded (or filtered) audio samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub format: AudioFormat,
    /// Samples per channel.
    pub samples: usize,
    /// One plane for packed formats, one per channel for planar formats.
    pub planes: Vec<Bytes>,
    /// Timestamp in `format.time_base`, if the decoder provided one.
    pub pts: Option<i64>,
}

impl AudioFrame {
    /// Whether the frame carries any sample data at all.
    pub fn has_data(&self) -> bool {
        self.samples > 0 && self.planes.first().is_some_and(|p| !p.is_empty())
    }

    /// Size of the sample data across all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(Bytes::len).sum()
    }

    /// Duration in whole milliseconds (`samples × 1000 / sample_rate`).
    pub fn duration_ms(&self) -> i64 {
        if self.format.sample_rate == 0 {
            return 0;
        }
        (self.samples as i64 * 1000) / i64::from(self.format.sample_rate)
    }
}

/// Filtered audio ready for the output sink.
#[derive(Debug, Clone)]
pub struct DecodedAudioChunk {
    /// Interleaved sample bytes in the sink format.
    pub data: Bytes,
    /// Presentation timestamp in milliseconds (taken before filtering).
    pub pts_ms: i64,
    /// Duration in milliseconds of the filtered samples.
    pub duration_ms: i64,
    /// Samples per channel.
    pub samples: usize,
}

impl DecodedAudioChunk {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
