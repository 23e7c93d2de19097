//! Software sink that consumes audio at the nominal byte rate.
//!
//! Used for headless playback and for exercising the pipeline without a
//! sound device. In [`DrainMode::Manual`] nothing is consumed until a probe
//! asks for it, which makes timing fully deterministic.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::ring::RingBuffer;
use super::{AudioSink, OutputProvider};
use cadence_core::{AudioFormat, Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// How a virtual sink consumes its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Consume at the stream's byte rate, tracked against wall time.
    RealTime,
    /// Consume only through [`VirtualSinkProbe::consume`].
    Manual,
}

struct DrainState {
    last: Instant,
    /// Fractional bytes owed from the previous drain.
    carry: f64,
    paused: bool,
}

struct Shared {
    ring: RingBuffer<u8>,
    capacity: usize,
    byte_rate: usize,
    mode: DrainMode,
    drain: Mutex<DrainState>,
    written: AtomicU64,
    played: AtomicU64,
    clears: AtomicU64,
}

impl Shared {
    /// Advance playback to now. Serialized by the drain lock, so the ring
    /// only ever has one consumer at a time.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn drain(&self) {
        let mut state = self.drain.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last);
        state.last = now;

        if self.mode == DrainMode::Manual || state.paused {
            return;
        }

        let owed = elapsed.as_secs_f64() * self.byte_rate as f64 + state.carry;
        let whole = owed.floor();
        let consumed = self.ring.skip(whole as usize);
        self.played.fetch_add(consumed as u64, Ordering::Relaxed);
        // An underrun does not bank time for later.
        state.carry = if self.ring.is_empty() { 0.0 } else { owed - whole };
    }

    fn queued(&self) -> usize {
        self.drain();
        self.ring.available()
    }
}

/// Observer handle for a sink opened by [`VirtualOutput`].
#[derive(Clone)]
pub struct VirtualSinkProbe {
    shared: Arc<Shared>,
}

impl VirtualSinkProbe {
    /// Total bytes accepted by the sink.
    pub fn written_bytes(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    /// Total bytes consumed (played).
    pub fn played_bytes(&self) -> u64 {
        self.shared.played.load(Ordering::Relaxed)
    }

    pub fn backlog_bytes(&self) -> usize {
        self.shared.queued()
    }

    /// Number of times the sink was cleared.
    pub fn clears(&self) -> u64 {
        self.shared.clears.load(Ordering::Relaxed)
    }

    /// Consume up to `bytes`, as a device would. Returns the amount consumed.
    pub fn consume(&self, bytes: usize) -> usize {
        let _state = self.shared.drain.lock();
        let consumed = self.shared.ring.skip(bytes);
        self.shared
            .played
            .fetch_add(consumed as u64, Ordering::Relaxed);
        consumed
    }
}

pub struct VirtualSink {
    format: AudioFormat,
    shared: Arc<Shared>,
}

impl AudioSink for VirtualSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn bytes_free(&self) -> usize {
        self.shared.capacity.saturating_sub(self.shared.queued())
    }

    fn backlog_bytes(&self) -> usize {
        self.shared.queued()
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let room = self.bytes_free();
        let written = self.shared.ring.write(&data[..data.len().min(room)]);
        self.shared
            .written
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }

    fn clear(&mut self) {
        let _state = self.shared.drain.lock();
        let dropped = self.shared.ring.discard_all();
        self.shared.clears.fetch_add(1, Ordering::Relaxed);
        debug!("Virtual sink cleared ({dropped} bytes)");
    }

    fn set_paused(&mut self, paused: bool) {
        self.shared.drain();
        self.shared.drain.lock().paused = paused;
    }
}

/// Opens [`VirtualSink`]s sized in milliseconds of audio.
pub struct VirtualOutput {
    capacity_ms: u64,
    mode: DrainMode,
    last: Mutex<Option<VirtualSinkProbe>>,
}

impl VirtualOutput {
    /// Real-time output.
    pub const fn new(capacity_ms: u64) -> Self {
        Self::with_mode(capacity_ms, DrainMode::RealTime)
    }

    /// Output whose sinks only drain through their probe.
    pub const fn manual(capacity_ms: u64) -> Self {
        Self::with_mode(capacity_ms, DrainMode::Manual)
    }

    pub const fn with_mode(capacity_ms: u64, mode: DrainMode) -> Self {
        Self {
            capacity_ms,
            mode,
            last: parking_lot::const_mutex(None),
        }
    }

    /// Probe for the most recently opened sink.
    pub fn last_sink(&self) -> Option<VirtualSinkProbe> {
        self.last.lock().clone()
    }
}

impl OutputProvider for VirtualOutput {
    fn name(&self) -> &'static str {
        "virtual"
    }

    #[allow(clippy::cast_possible_truncation)]
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioSink>> {
        let byte_rate = format.byte_rate();
        if byte_rate == 0 {
            return Err(Error::AudioOutput(format!(
                "cannot open a sink for {} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let frame = format.bytes_per_frame();
        let capacity = (byte_rate * self.capacity_ms as usize / 1000).max(frame) / frame * frame;
        let shared = Arc::new(Shared {
            ring: RingBuffer::new(capacity),
            capacity,
            byte_rate,
            mode: self.mode,
            drain: Mutex::new(DrainState {
                last: Instant::now(),
                carry: 0.0,
                paused: false,
            }),
            written: AtomicU64::new(0),
            played: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        });

        debug!(
            "Virtual sink opened: {} Hz, {} channels, {capacity} bytes",
            format.sample_rate, format.channels
        );
        *self.last.lock() = Some(VirtualSinkProbe {
            shared: shared.clone(),
        });

        Ok(Box::new(VirtualSink {
            format: *format,
            shared,
        }))
    }
}
