//! Audio sinks fed by the audio worker.

pub mod ring;
mod virtual_sink;
#[cfg(feature = "cpal")]
mod cpal;
#[cfg(feature = "cpal")]
mod resample;

#[cfg(feature = "cpal")]
pub use self::cpal::CpalOutput;
#[cfg(feature = "cpal")]
pub use self::resample::Resampler;
pub use ring::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
pub use virtual_sink::{DrainMode, VirtualOutput, VirtualSinkProbe};

use cadence_core::{AudioFormat, Result};
use std::sync::Arc;

/// Byte-oriented audio output with a bounded buffer.
///
/// Data written must be in [`AudioSink::format`]: packed samples at the
/// source rate. Queries may be answered from any thread; writes come from the
/// audio worker only.
pub trait AudioSink: Send {
    fn format(&self) -> AudioFormat;

    /// Bytes that can be written without blocking.
    fn bytes_free(&self) -> usize;

    /// Bytes written but not yet audible.
    fn backlog_bytes(&self) -> usize;

    /// Write as much of `data` as fits. Returns the number of bytes taken.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Drop everything not yet played.
    fn clear(&mut self);

    /// Stop (or resume) consuming buffered audio.
    fn set_paused(&mut self, paused: bool);
}

/// Opens sinks for a given stream format.
pub trait OutputProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioSink>>;
}

/// Thread-safe reference to an output provider.
pub type SharedOutput = Arc<dyn OutputProvider>;

/// The device output when compiled in, else a real-time virtual sink.
pub fn default_output(virtual_capacity_ms: u64) -> SharedOutput {
    #[cfg(feature = "cpal")]
    {
        let _ = virtual_capacity_ms;
        Arc::new(CpalOutput::new())
    }
    #[cfg(not(feature = "cpal"))]
    {
        Arc::new(VirtualOutput::new(virtual_capacity_ms))
    }
}
