//! Synthetic in-memory media for end-to-end tests.
//!
//! A "file" is an 8 kHz mono S16 audio stream in 20 ms packets, optionally
//! interleaved with a 25 fps 64x48 YUV 4:2:0 video stream keyed every second.
//! Every packet payload is tracked so tests can check that all of them are
//! released.

#![allow(dead_code, clippy::unwrap_used)] // Tests use unwrap for brevity

use bytes::Bytes;
use cadence_core::{
    AudioFormat, AudioFrame, DecodeError, Dimensions, Error, MediaInfo, MediaKind, Packet,
    PixelFormat, PlayerConfig, Rational, Result, SampleFormat, StreamInfo, VideoFrame,
};
use cadence_engine::backend::{
    AudioDecoder, Demuxer, MediaBackend, MediaSession, VideoDecoder, VideoParts, Yuv420ToRgb,
};
use cadence_engine::{Player, PlayerEvent, VirtualOutput};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SAMPLE_RATE: u32 = 8000;
pub const AUDIO_PACKET_MS: i64 = 20;
pub const FRAME_MS: i64 = 40;
pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

const AUDIO_INDEX: usize = 0;
const VIDEO_INDEX: usize = 1;

/// Counts payloads that are still alive.
#[derive(Clone, Default)]
pub struct Tracker {
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn payload(&self, data: Vec<u8>) -> Bytes {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        Bytes::from_owner(Tracked {
            data,
            live: self.live.clone(),
        })
    }
}

struct Tracked {
    data: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend producing synthetic files.
#[derive(Clone)]
pub struct SyntheticBackend {
    pub duration_ms: i64,
    pub with_video: bool,
    pub seekable: bool,
    pub tracker: Tracker,
}

impl SyntheticBackend {
    pub fn new(duration_ms: i64, with_video: bool) -> Self {
        Self {
            duration_ms,
            with_video,
            seekable: true,
            tracker: Tracker::default(),
        }
    }

    fn audio_format() -> AudioFormat {
        AudioFormat::new(SAMPLE_RATE, SampleFormat::S16, 1)
    }
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, path: &Path) -> Result<MediaSession> {
        if path.to_string_lossy().contains("missing") {
            return Err(Error::Open(format!("{} not found", path.display())));
        }

        let audio_format = Self::audio_format();
        let info = MediaInfo {
            duration_ms: self.duration_ms,
            audio: StreamInfo {
                index: AUDIO_INDEX,
                kind: MediaKind::Audio,
                time_base: Rational::new(1, SAMPLE_RATE as i32),
                codec: "pcm_s16le".to_string(),
            },
            audio_format,
            video: self.with_video.then(|| StreamInfo {
                index: VIDEO_INDEX,
                kind: MediaKind::Video,
                time_base: Rational::new(1, 90_000),
                codec: "synthetic".to_string(),
            }),
            dimensions: self.with_video.then(|| Dimensions::new(WIDTH, HEIGHT)),
        };

        Ok(MediaSession {
            info,
            demuxer: Box::new(SyntheticDemuxer {
                duration_ms: self.duration_ms,
                with_video: self.with_video,
                seekable: self.seekable,
                next_audio_ms: 0,
                next_video_ms: 0,
                tracker: self.tracker.clone(),
            }),
            audio: Box::new(PcmDecoder {
                format: audio_format,
                pending: None,
            }),
            video: self.with_video.then(|| VideoParts {
                decoder: Box::new(PatternDecoder { pending: None }),
                converter: Box::new(Yuv420ToRgb::new()),
            }),
        })
    }
}

struct SyntheticDemuxer {
    duration_ms: i64,
    with_video: bool,
    seekable: bool,
    next_audio_ms: i64,
    next_video_ms: i64,
    tracker: Tracker,
}

impl SyntheticDemuxer {
    fn audio_packet(&mut self) -> Packet {
        let start = self.next_audio_ms * i64::from(SAMPLE_RATE) / 1000;
        let samples = AUDIO_PACKET_MS as usize * SAMPLE_RATE as usize / 1000;
        let data: Vec<u8> = (0..samples)
            .flat_map(|i| {
                let t = (start + i as i64) as f32 / SAMPLE_RATE as f32;
                let value = (t * 440.0 * std::f32::consts::TAU).sin() * 8000.0;
                (value as i16).to_ne_bytes()
            })
            .collect();

        let mut packet = Packet::new(AUDIO_INDEX, Some(start), self.tracker.payload(data));
        packet.duration = samples as i64;
        packet.is_key = true;
        self.next_audio_ms += AUDIO_PACKET_MS;
        packet
    }

    fn video_packet(&mut self) -> Packet {
        let ms = self.next_video_ms;
        let mut packet = Packet::new(
            VIDEO_INDEX,
            Some(ms * 90),
            self.tracker.payload(vec![(ms / FRAME_MS) as u8; 32]),
        );
        packet.duration = FRAME_MS * 90;
        packet.is_key = ms % 1000 == 0;
        self.next_video_ms += FRAME_MS;
        packet
    }
}

impl Demuxer for SyntheticDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let audio_left = self.next_audio_ms < self.duration_ms;
        let video_left = self.with_video && self.next_video_ms < self.duration_ms;
        let packet = match (audio_left, video_left) {
            (false, false) => return Ok(None),
            (true, true) if self.next_video_ms <= self.next_audio_ms => self.video_packet(),
            (true, _) => self.audio_packet(),
            (false, true) => self.video_packet(),
        };
        Ok(Some(packet))
    }

    fn seek(&mut self, target_ms: i64) -> Result<i64> {
        if !self.seekable {
            return Err(Error::Seek("stream is not seekable".to_string()));
        }
        // Land on the keyframe at or before the target.
        let landed = target_ms / 1000 * 1000;
        self.next_audio_ms = landed;
        self.next_video_ms = landed;
        Ok(landed)
    }
}

struct PcmDecoder {
    format: AudioFormat,
    pending: Option<AudioFrame>,
}

impl AudioDecoder for PcmDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.pending = Some(AudioFrame {
            format: self.format,
            samples: packet.data.len() / self.format.bytes_per_frame(),
            planes: vec![packet.data.clone()],
            pts: packet.pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, DecodeError> {
        self.pending.take().ok_or(DecodeError::Again)
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Flat gray pictures whose luma follows the frame number.
struct PatternDecoder {
    pending: Option<VideoFrame>,
}

impl VideoDecoder for PatternDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let luma = 16 + packet.data.first().copied().unwrap_or(0) % 200;
        let (w, h) = (WIDTH as usize, HEIGHT as usize);
        self.pending = Some(VideoFrame {
            width: WIDTH,
            height: HEIGHT,
            format: PixelFormat::Yuv420p,
            planes: vec![
                Bytes::from(vec![luma; w * h]),
                Bytes::from(vec![128u8; w * h / 4]),
                Bytes::from(vec![128u8; w * h / 4]),
            ],
            strides: vec![w, w / 2, w / 2],
            pts: packet.pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<VideoFrame, DecodeError> {
        self.pending.take().ok_or(DecodeError::Again)
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Player over `backend` with a real-time virtual sink.
pub fn player(backend: &SyntheticBackend) -> Player {
    Player::new(
        PlayerConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(VirtualOutput::new(500)),
    )
}

/// Collect events for `duration`.
pub fn collect_for(player: &Player, duration: Duration) -> Vec<PlayerEvent> {
    let deadline = Instant::now() + duration;
    let mut events = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        if let Some(event) = player.recv_event_timeout(left.min(Duration::from_millis(20))) {
            events.push(event);
        }
    }
    events
}

/// Collect events until `pred` matches one, or `timeout` passes.
pub fn wait_for(
    player: &Player,
    timeout: Duration,
    pred: impl Fn(&PlayerEvent) -> bool,
) -> (Vec<PlayerEvent>, bool) {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        if let Some(event) = player.recv_event_timeout(left.min(Duration::from_millis(20))) {
            let hit = pred(&event);
            events.push(event);
            if hit {
                return (events, true);
            }
        }
    }
    (events, false)
}

pub fn positions(events: &[PlayerEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::PositionChanged(ms) => Some(*ms),
            _ => None,
        })
        .collect()
}

pub fn drain(player: &Player) -> Vec<PlayerEvent> {
    std::iter::from_fn(|| player.try_recv_event()).collect()
}
