//! Sample rate conversion to the device rate using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Input frames per resampler pass.
const CHUNK_FRAMES: usize = 1024;

/// Streaming planar resampler. Input is buffered until a full chunk exists.
pub struct Resampler {
    #[allow(clippy::struct_field_names)]
    resampler: FftFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let resampler = FftFixedIn::new(
            input_rate as usize,
            output_rate as usize,
            CHUNK_FRAMES,
            2,
            channels,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?;

        debug!("Resampler created: {input_rate}Hz -> {output_rate}Hz, {channels} channels");

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            pending: vec![Vec::new(); channels],
        })
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Input frames waiting for a full chunk.
    pub fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len)
    }

    /// Feed planar input; returns whatever planar output is ready.
    pub fn process(&mut self, planes: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        for (pending, plane) in self.pending.iter_mut().zip(planes) {
            pending.extend_from_slice(plane);
        }

        let mut output = vec![Vec::new(); self.pending.len()];
        while self.pending_frames() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();

            let resampled = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;

            for (out, plane) in output.iter_mut().zip(resampled) {
                out.extend(plane);
            }
        }
        Ok(output)
    }

    /// Drop buffered input and filter history.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending.iter_mut().for_each(Vec::clear);
    }
}
