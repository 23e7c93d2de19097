//! Audio-driven master clock.
//!
//! The audio worker is the only publisher during playback. Each publication
//! is the projected presentation time of the sound that will be audible once
//! the sink has drained what it already holds. Video frames are released
//! only once their presentation time is at or below this value.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::DecodedAudioChunk;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Milliseconds-valued master clock shared between workers.
#[derive(Debug, Default)]
pub struct Clock {
    now_ms: AtomicI64,
}

/// Thread-safe reference to the clock.
pub type SharedClock = Arc<Clock>;

impl Clock {
    pub const fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Current clock value in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Move the clock forward to `ms`. Never moves it backwards.
    ///
    /// Returns the value the clock holds afterwards.
    pub fn advance_to(&self, ms: i64) -> i64 {
        let previous = self.now_ms.fetch_max(ms, Ordering::AcqRel);
        previous.max(ms)
    }

    /// Set the clock unconditionally. Used when playback jumps (seek, stop).
    pub fn reset(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::Release);
    }
}

/// Create a shared clock starting at zero.
pub fn shared_clock() -> SharedClock {
    Arc::new(Clock::default())
}

/// Turns a chunk handed to the sink into a clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCalibration {
    /// Constant lead added on top of the projection.
    pub lead_ms: i64,
}

impl ClockCalibration {
    pub const fn new(lead_ms: i64) -> Self {
        Self { lead_ms }
    }

    /// Presentation time at which the sink will have played `chunk` and
    /// everything it already holds.
    ///
    /// `backlog_bytes` is the amount queued in the sink before `chunk` is
    /// written, measured in units of `chunk`'s own size and duration. The
    /// duration terms are wall-clock milliseconds of filtered audio, so they
    /// are scaled by `speed` to land on the media timeline; at 1.0 this is
    /// `pts + duration + backlog / size * duration + lead`.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn project(&self, chunk: &DecodedAudioChunk, backlog_bytes: usize, speed: f64) -> i64 {
        let size = chunk.byte_len().max(1) as f64;
        let backlog_chunks = backlog_bytes as f64 / size;
        let ahead = chunk.duration_ms as f64 * (1.0 + backlog_chunks) * speed;
        chunk.pts_ms + ahead.round() as i64 + self.lead_ms
    }
}

impl Default for ClockCalibration {
    fn default() -> Self {
        Self::new(15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn chunk(pts_ms: i64, duration_ms: i64, bytes: usize) -> DecodedAudioChunk {
        DecodedAudioChunk {
            data: Bytes::from(vec![0u8; bytes]),
            pts_ms,
            duration_ms,
            samples: bytes / 4,
        }
    }

    #[test]
    fn test_advance_never_goes_back() {
        let clock = Clock::new(0);
        assert_eq!(clock.advance_to(100), 100);
        assert_eq!(clock.advance_to(40), 100);
        assert_eq!(clock.now_ms(), 100);
        assert_eq!(clock.advance_to(140), 140);
    }

    #[test]
    fn test_reset_moves_backwards() {
        let clock = Clock::new(0);
        clock.advance_to(9000);
        clock.reset(5000);
        assert_eq!(clock.now_ms(), 5000);
        assert_eq!(clock.advance_to(5100), 5100);
    }

    #[test]
    fn test_projection_at_normal_speed() {
        let calibration = ClockCalibration::new(15);
        let chunk = chunk(1000, 20, 3840);

        // Empty sink: pts + duration + lead.
        assert_eq!(calibration.project(&chunk, 0, 1.0), 1035);
        // Three chunks already queued ahead.
        assert_eq!(calibration.project(&chunk, 3840 * 3, 1.0), 1000 + 20 * 4 + 15);
    }

    #[test]
    fn test_projection_scales_with_speed() {
        let calibration = ClockCalibration::new(0);
        let chunk = chunk(2000, 20, 3840);
        assert_eq!(calibration.project(&chunk, 3840, 2.0), 2000 + 80);
        assert_eq!(calibration.project(&chunk, 3840, 0.5), 2000 + 20);
    }

    #[test]
    fn test_concurrent_publishers_keep_max() {
        let clock = shared_clock();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        clock.advance_to(i * 4 + t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.now_ms(), 999 * 4 + 3);
    }

    proptest! {
        #[test]
        fn prop_clock_is_non_decreasing(values in proptest::collection::vec(-10_000i64..1_000_000, 1..100)) {
            let clock = Clock::new(0);
            let mut last = clock.now_ms();
            for v in values {
                let now = clock.advance_to(v);
                prop_assert!(now >= last);
                prop_assert_eq!(now, clock.now_ms());
                last = now;
            }
        }
    }
}
