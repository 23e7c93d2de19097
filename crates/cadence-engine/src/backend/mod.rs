//! Media backends: container reading, decoding, and pixel conversion.
//!
//! A backend opens a file into a [`MediaSession`]: one demuxer plus the
//! decoders for the selected audio and (optional) video streams. Each part is
//! a trait object so the pipeline never sees which library sits underneath.

mod symphonia;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod pixel;

pub use self::symphonia::SymphoniaBackend;
#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegBackend;
pub use self::pixel::Yuv420ToRgb;

use cadence_core::{
    AudioFormat, AudioFrame, DecodeError, MediaInfo, Packet, Result, RgbFrame, VideoFrame,
};
use std::path::Path;
use std::sync::Arc;

/// Reads packets from a container in file order.
pub trait Demuxer: Send {
    /// Next packet, or `Ok(None)` once the container is exhausted.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Reposition so the next packet read is at or before `target_ms`.
    ///
    /// Returns the position landed on, in milliseconds.
    fn seek(&mut self, target_ms: i64) -> Result<i64>;
}

/// Where a seek to `target_ms` landed, given the position of the first packet
/// read afterwards. Kept within `0..=target_ms`; with no timestamped packet to
/// go by, the target itself.
pub fn landed_position(first_ms: Option<i64>, target_ms: i64) -> i64 {
    let target_ms = target_ms.max(0);
    first_ms.map_or(target_ms, |ms| ms.clamp(0, target_ms))
}

/// Turns compressed audio packets into sample frames.
pub trait AudioDecoder: Send {
    /// Format of the frames this decoder produces.
    fn format(&self) -> AudioFormat;

    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Next decoded frame. [`DecodeError::Again`] means more input is needed.
    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, DecodeError>;

    /// Drop all buffered decoder state.
    fn flush(&mut self);
}

/// Turns compressed video packets into pictures.
pub trait VideoDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    fn receive_frame(&mut self) -> std::result::Result<VideoFrame, DecodeError>;

    fn flush(&mut self);
}

/// Converts decoded pictures into packed RGB24.
pub trait PixelConverter: Send {
    fn convert(&mut self, frame: &VideoFrame, pts_ms: i64) -> Result<RgbFrame>;
}

/// Decoder and converter for the selected video stream.
pub struct VideoParts {
    pub decoder: Box<dyn VideoDecoder>,
    pub converter: Box<dyn PixelConverter>,
}

/// Everything needed to play one opened file.
pub struct MediaSession {
    pub info: MediaInfo,
    pub demuxer: Box<dyn Demuxer>,
    pub audio: Box<dyn AudioDecoder>,
    pub video: Option<VideoParts>,
}

/// Opens files into playable sessions.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> Result<MediaSession>;
}

/// Thread-safe reference to a backend.
pub type SharedBackend = Arc<dyn MediaBackend>;

/// The best backend compiled into this build.
pub fn default_backend() -> SharedBackend {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(FfmpegBackend::new())
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(SymphoniaBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landed_position() {
        // Keyframe before the target.
        assert_eq!(landed_position(Some(4_200), 5_000), 4_200);
        assert_eq!(landed_position(Some(5_000), 5_000), 5_000);
        // Never reported past the target or before the start.
        assert_eq!(landed_position(Some(5_040), 5_000), 5_000);
        assert_eq!(landed_position(Some(-23), 5_000), 0);
        assert_eq!(landed_position(None, 5_000), 5_000);
        assert_eq!(landed_position(None, -10), 0);
    }
}
