//! Clock-gated video decode stage.
//!
//! Only the head of the video queue is ever looked at. A packet whose
//! presentation time is past the clock stays queued, which is the only
//! back-pressure between the container reader and the audio clock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::backend::{PixelConverter, VideoDecoder, VideoParts};
use crate::queue::{shared_queue, SharedQueue};
use cadence_core::{Dimensions, Packet, Rational, RgbFrame};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Result of one gating step.
#[derive(Debug, Clone)]
pub enum VideoOutcome {
    /// Nothing queued.
    Empty,
    /// The head packet is not due yet.
    Gated { head_ms: i64 },
    /// The head packet was consumed without producing a frame.
    Discarded,
    Presented {
        frame: Arc<RgbFrame>,
        /// Externally visible position: the clock at presentation.
        position_ms: i64,
        dimensions_changed: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    pub frames_presented: u64,
    pub packets_discarded: u64,
}

pub struct VideoStage {
    queue: SharedQueue<Packet>,
    decoder: Box<dyn VideoDecoder>,
    converter: Box<dyn PixelConverter>,
    time_base: Rational,
    dimensions: Option<Dimensions>,
    stats: VideoStats,
}

impl VideoStage {
    pub fn new(parts: VideoParts, time_base: Rational) -> Self {
        Self {
            queue: shared_queue(),
            decoder: parts.decoder,
            converter: parts.converter,
            time_base,
            dimensions: None,
            stats: VideoStats::default(),
        }
    }

    pub fn queue(&self) -> SharedQueue<Packet> {
        self.queue.clone()
    }

    pub fn push(&self, packet: Packet) {
        self.queue.push(packet);
    }

    /// Size of the last presented frame.
    pub const fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub const fn stats(&self) -> VideoStats {
        self.stats
    }

    /// Present the head packet if it is due at `clock_ms`.
    pub fn step(&mut self, clock_ms: i64) -> VideoOutcome {
        let time_base = self.time_base;
        let Some(head_ms) = self.queue.peek_map(|p| p.presentation_ms(time_base)) else {
            return VideoOutcome::Empty;
        };
        let Some(packet) = self
            .queue
            .pop_if(|p| p.presentation_ms(time_base) <= clock_ms)
        else {
            trace!("Video packet at {head_ms} ms gated by clock {clock_ms} ms");
            return VideoOutcome::Gated { head_ms };
        };

        let pts_ms = packet.presentation_ms(time_base);
        if let Err(e) = self.decoder.send_packet(&packet) {
            return self.discard(pts_ms, &e.to_string());
        }
        let frame = match self.decoder.receive_frame() {
            Ok(frame) => frame,
            Err(e) => return self.discard(pts_ms, &e.to_string()),
        };

        let frame_ms = frame.pts.map_or(pts_ms, |pts| time_base.ts_to_ms(pts));
        let rgb = match self.converter.convert(&frame, frame_ms) {
            Ok(rgb) => rgb,
            Err(e) => return self.discard(pts_ms, &e.to_string()),
        };

        let dimensions = Dimensions::new(rgb.width, rgb.height);
        let dimensions_changed = self.dimensions != Some(dimensions);
        if dimensions_changed {
            debug!("Video dimensions now {}x{}", rgb.width, rgb.height);
            self.dimensions = Some(dimensions);
        }
        self.stats.frames_presented += 1;

        VideoOutcome::Presented {
            frame: Arc::new(rgb),
            position_ms: clock_ms,
            dimensions_changed,
        }
    }

    fn discard(&mut self, pts_ms: i64, reason: &str) -> VideoOutcome {
        self.stats.packets_discarded += 1;
        warn!("Dropping video packet at {pts_ms} ms: {reason}");
        VideoOutcome::Discarded
    }

    /// Drop queued packets and decoder state. Returns the number of packets
    /// discarded.
    pub fn flush(&mut self) -> usize {
        let dropped = self.queue.clear();
        self.decoder.flush();
        debug!("Video stage flushed ({dropped} packets)");
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Yuv420ToRgb;
    use bytes::Bytes;
    use cadence_core::{DecodeError, Error, PixelFormat, Result, VideoFrame};
    use proptest::prelude::*;

    /// Emits a solid RGB24 frame per packet; the first payload byte is the
    /// frame width.
    #[derive(Default)]
    struct SolidDecoder {
        pending: Option<VideoFrame>,
    }

    impl VideoDecoder for SolidDecoder {
        fn send_packet(&mut self, packet: &Packet) -> Result<()> {
            let Some(&width) = packet.data.first() else {
                return Err(Error::Decode(DecodeError::Refused("empty".into())));
            };
            let width = u32::from(width);
            self.pending = Some(VideoFrame {
                width,
                height: 2,
                format: PixelFormat::Rgb24,
                planes: vec![Bytes::from(vec![200u8; width as usize * 3 * 2])],
                strides: vec![width as usize * 3],
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

    fn stage() -> VideoStage {
        VideoStage::new(
            VideoParts {
                decoder: Box::new(SolidDecoder::default()),
                converter: Box::new(Yuv420ToRgb::new()),
            },
            Rational::MILLIS,
        )
    }

    fn packet(pts_ms: i64, width: u8) -> Packet {
        Packet::new(1, Some(pts_ms), vec![width])
    }

    #[test]
    fn test_empty_queue() {
        assert!(matches!(stage().step(1000), VideoOutcome::Empty));
    }

    #[test]
    fn test_future_packet_stays_queued() {
        let mut stage = stage();
        stage.push(packet(40, 4));
        assert!(matches!(stage.step(39), VideoOutcome::Gated { head_ms: 40 }));
        assert_eq!(stage.queue().len(), 1);

        match stage.step(40) {
            VideoOutcome::Presented {
                frame,
                position_ms,
                dimensions_changed,
            } => {
                assert_eq!(position_ms, 40);
                assert!(dimensions_changed);
                assert_eq!(frame.pts_ms, 40);
                assert_eq!(frame.pixel(0, 0), Some([200, 200, 200]));
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert!(stage.queue().is_empty());
    }

    #[test]
    fn test_position_follows_clock() {
        let mut stage = stage();
        stage.push(packet(0, 4));
        match stage.step(120) {
            VideoOutcome::Presented { position_ms, .. } => assert_eq!(position_ms, 120),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn test_dimension_change_is_reported_once() {
        let mut stage = stage();
        for (i, width) in [4u8, 4, 8, 8].into_iter().enumerate() {
            stage.push(packet(i as i64 * 40, width));
        }
        let changes: Vec<bool> = (0..4)
            .map(|_| match stage.step(1000) {
                VideoOutcome::Presented {
                    dimensions_changed, ..
                } => dimensions_changed,
                other => panic!("expected a frame, got {other:?}"),
            })
            .collect();
        assert_eq!(changes, vec![true, false, true, false]);
        assert_eq!(stage.dimensions(), Some(Dimensions::new(8, 2)));
    }

    #[test]
    fn test_undecodable_packet_is_discarded() {
        let mut stage = stage();
        stage.push(Packet::new(1, Some(0), Vec::<u8>::new()));
        stage.push(packet(10, 4));
        assert!(matches!(stage.step(100), VideoOutcome::Discarded));
        assert!(matches!(stage.step(100), VideoOutcome::Presented { .. }));
        assert_eq!(stage.stats().packets_discarded, 1);
        assert_eq!(stage.stats().frames_presented, 1);
    }

    #[test]
    fn test_flush_drops_queue() {
        let mut stage = stage();
        for i in 0..5 {
            stage.push(packet(i * 40, 4));
        }
        assert_eq!(stage.flush(), 5);
        assert!(matches!(stage.step(i64::MAX), VideoOutcome::Empty));
    }

    proptest! {
        #[test]
        fn prop_never_presents_ahead_of_clock(
            stamps in proptest::collection::vec(0i64..5000, 1..60),
            clocks in proptest::collection::vec(0i64..200, 1..120),
        ) {
            let mut stage = stage();
            for pts in &stamps {
                stage.push(packet(*pts, 4));
            }
            let mut clock = 0;
            for delta in clocks {
                clock += delta;
                let before = stage.queue().len();
                match stage.step(clock) {
                    VideoOutcome::Presented { frame, .. } => {
                        prop_assert!(frame.pts_ms <= clock);
                    }
                    VideoOutcome::Gated { head_ms } => {
                        prop_assert!(head_ms > clock);
                        prop_assert_eq!(stage.queue().len(), before);
                    }
                    VideoOutcome::Empty | VideoOutcome::Discarded => {}
                }
            }
        }
    }
}
