//! Container stream descriptions.

use serde::{Deserialize, Serialize};

use super::{AudioFormat, Rational};

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Other,
}

/// One stream of an opened container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub time_base: Rational,
    /// Codec name as reported by the backend.
    pub codec: String,
}

/// Video stream dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Everything the player learns about a file when it is opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaInfo {
    /// Total duration in milliseconds (0 when unknown).
    pub duration_ms: i64,
    pub audio: StreamInfo,
    pub audio_format: AudioFormat,
    pub video: Option<StreamInfo>,
    /// Coded picture size, when a video stream exists.
    pub dimensions: Option<Dimensions>,
}

impl MediaInfo {
    pub const fn has_video(&self) -> bool {
        self.video.is_some()
    }
}
