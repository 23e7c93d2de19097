//! Core media types for Cadence.

pub mod audio;
pub mod packet;
pub mod stream;
pub mod time;
pub mod video;

pub use audio::{AudioFormat, AudioFrame, ChannelLayout, DecodedAudioChunk, SampleFormat};
pub use packet::Packet;
pub use stream::{Dimensions, MediaInfo, MediaKind, StreamInfo};
pub use time::Rational;
pub use video::{PixelFormat, RgbFrame, VideoFrame};
