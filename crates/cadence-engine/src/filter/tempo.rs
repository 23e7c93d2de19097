//! Pitch-preserving tempo change (WSOLA).
//!
//! Output is assembled from Hann-windowed segments of the input with 50%
//! overlap. Segments are read at `factor` times the output hop; each one is
//! nudged within a small search range to the offset that best continues the
//! previous segment, which keeps the waveform phase-coherent.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use cadence_core::{Error, Result};
use std::f32::consts::PI;

/// Analysis window length.
const WINDOW_MS: usize = 40;

pub struct Tempo {
    factor: f64,
    channels: usize,
    window: Vec<f32>,
    hop: usize,
    search: u64,
    input: Vec<Vec<f32>>,
    /// Absolute index of `input[_][0]`.
    input_start: u64,
    /// Absolute nominal read position of the next segment.
    nominal: f64,
    /// Absolute start of the previously emitted segment.
    prev: Option<u64>,
    /// Windowed second half of the previous segment.
    tail: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl Tempo {
    pub fn new(factor: f64, sample_rate: u32, channels: usize) -> Result<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(Error::FilterGraph(format!("invalid tempo {factor}")));
        }
        if sample_rate == 0 || channels == 0 {
            return Err(Error::FilterGraph(format!(
                "invalid tempo input: {sample_rate} Hz, {channels} channels"
            )));
        }

        let window_len = ((sample_rate as usize * WINDOW_MS / 1000).max(16)) & !1;
        let hop = window_len / 2;
        let window = (0..window_len)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / window_len as f32).cos())
            .collect();

        Ok(Self {
            factor,
            channels,
            window,
            hop,
            search: (window_len / 8).max(1) as u64,
            input: vec![Vec::new(); channels],
            input_start: 0,
            nominal: 0.0,
            prev: None,
            tail: vec![vec![0.0; hop]; channels],
            output: vec![Vec::new(); channels],
        })
    }

    pub const fn factor(&self) -> f64 {
        self.factor
    }

    /// A factor of exactly 1.0 copies input to output untouched.
    pub fn is_passthrough(&self) -> bool {
        (self.factor - 1.0).abs() < f64::EPSILON
    }

    /// Input samples held back waiting for more data.
    pub fn pending(&self) -> usize {
        self.input.first().map_or(0, Vec::len)
    }

    /// Feed planar samples. Every plane must have the same length.
    pub fn push(&mut self, planes: &[Vec<f32>]) {
        if self.is_passthrough() {
            for (out, plane) in self.output.iter_mut().zip(planes) {
                out.extend_from_slice(plane);
            }
            return;
        }

        for (input, plane) in self.input.iter_mut().zip(planes) {
            input.extend_from_slice(plane);
        }
        while self.step() {}
    }

    /// Run out what is still held back, padding the input with silence,
    /// and start over. The last segment's fade-out ends the output.
    pub fn finish(&mut self) {
        if self.is_passthrough() {
            return;
        }

        let end = self.input_end();
        let reach = (self.window.len() * 2) as u64 + self.search;
        while (self.nominal.round() as u64) < end {
            let needed = self.nominal.round() as u64 + reach;
            let missing = needed.saturating_sub(self.input_end()) as usize;
            for input in &mut self.input {
                input.resize(input.len() + missing, 0.0);
            }
            if !self.step() {
                break;
            }
        }

        if self.prev.is_some() {
            for (out, tail) in self.output.iter_mut().zip(&self.tail) {
                out.extend_from_slice(tail);
            }
        }
        for input in &mut self.input {
            input.clear();
        }
        for tail in &mut self.tail {
            tail.fill(0.0);
        }
        self.input_start = 0;
        self.nominal = 0.0;
        self.prev = None;
    }

    /// Take everything produced so far.
    pub fn take_output(&mut self) -> Vec<Vec<f32>> {
        std::mem::replace(&mut self.output, vec![Vec::new(); self.channels])
    }

    fn input_end(&self) -> u64 {
        self.input_start + self.pending() as u64
    }

    fn step(&mut self) -> bool {
        let w = self.window.len() as u64;
        let h = self.hop as u64;
        let nominal = self.nominal.round() as u64;

        let (lo, hi, natural) = match self.prev {
            None => (nominal, nominal, None),
            Some(prev) => (
                nominal.saturating_sub(self.search).max(self.input_start),
                nominal + self.search,
                Some(prev + h),
            ),
        };

        let mut needed = hi + w;
        if let Some(natural) = natural {
            needed = needed.max(natural + h);
        }
        if self.input_end() < needed {
            return false;
        }

        let best = natural.map_or(nominal, |natural| self.best_offset(lo, hi, natural));
        let at = (best - self.input_start) as usize;

        for ((input, tail), out) in self
            .input
            .iter()
            .zip(self.tail.iter_mut())
            .zip(self.output.iter_mut())
        {
            let segment = &input[at..at + self.window.len()];
            for i in 0..self.hop {
                out.push(tail[i] + segment[i] * self.window[i]);
                tail[i] = segment[self.hop + i] * self.window[self.hop + i];
            }
        }

        self.prev = Some(best);
        self.nominal += self.hop as f64 * self.factor;

        let next_lo = (self.nominal.round() as u64).saturating_sub(self.search);
        let keep_from = next_lo.min(best + h).max(self.input_start);
        let discard = (keep_from - self.input_start) as usize;
        if discard > 0 {
            for input in &mut self.input {
                input.drain(..discard);
            }
            self.input_start = keep_from;
        }
        true
    }

    /// Candidate start in `lo..=hi` whose first half best matches the natural
    /// continuation of the previous segment.
    fn best_offset(&self, lo: u64, hi: u64, natural: u64) -> u64 {
        let len = self.hop;
        let mix = |from: u64, count: usize| -> Vec<f32> {
            let at = (from - self.input_start) as usize;
            (0..count)
                .map(|i| self.input.iter().map(|ch| ch[at + i]).sum())
                .collect()
        };

        let template = mix(natural, len);
        let span = (hi - lo) as usize;
        let region = mix(lo, span + len);

        let mut energy: f32 = region[..len].iter().map(|x| x * x).sum();
        let mut best = (lo, f32::MIN);
        for offset in 0..=span {
            if offset > 0 {
                let leaving = region[offset - 1];
                let entering = region[offset + len - 1];
                energy = (energy - leaving * leaving + entering * entering).max(0.0);
            }
            let corr: f32 = region[offset..offset + len]
                .iter()
                .zip(&template)
                .map(|(x, t)| x * t)
                .sum();
            let score = corr / (energy + 1e-9).sqrt();
            if score > best.1 {
                best = (lo + offset as u64, score);
            }
        }
        best.0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    fn sine(freq: f32, rate: u32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn run(factor: f64, input: &[f32]) -> Vec<f32> {
        let mut tempo = Tempo::new(factor, 8000, 1).unwrap();
        for chunk in input.chunks(256) {
            tempo.push(&[chunk.to_vec()]);
        }
        tempo.take_output().remove(0)
    }

    #[test]
    fn test_unity_is_exact_passthrough() {
        let input = sine(440.0, 8000, 8000);
        let output = run(1.0, &input);
        assert_eq!(output, input);
    }

    /// Sign changes per sample, ignoring one window at each end.
    fn crossing_rate(signal: &[f32]) -> f64 {
        let body = &signal[320..signal.len() - 320];
        let crossings = body
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        crossings as f64 / body.len() as f64
    }

    #[test]
    fn test_pitch_is_preserved() {
        let input = sine(300.0, 8000, 48_000);
        let reference = crossing_rate(&input);
        for factor in [0.5, 0.75, 1.5, 2.0, 3.0] {
            let output = run(factor, &input);
            let ratio = crossing_rate(&output) / reference;
            assert!((0.98..=1.02).contains(&ratio), "{factor}x: ratio {ratio}");
        }
    }

    #[test]
    fn test_finish_runs_out_held_back_input() {
        let input = sine(440.0, 8000, 8000);
        for (factor, expected) in [(2.0, 4000), (0.5, 16_000)] {
            let mut tempo = Tempo::new(factor, 8000, 1).unwrap();
            for chunk in input.chunks(256) {
                tempo.push(&[chunk.to_vec()]);
            }
            let mut output = tempo.take_output().remove(0);
            let before = output.len();

            tempo.finish();
            output.extend(tempo.take_output().remove(0));
            assert!(output.len() > before);
            assert!(output.len() >= expected, "{factor}x: {}", output.len());
            assert!(output.len() <= expected + 640, "{factor}x: {}", output.len());
            assert_eq!(tempo.pending(), 0);

            // Nothing is left to run out a second time.
            tempo.finish();
            assert!(tempo.take_output()[0].is_empty());
        }
    }

    #[test]
    fn test_finish_without_input_is_silent() {
        let mut tempo = Tempo::new(1.5, 8000, 2).unwrap();
        tempo.finish();
        assert!(tempo.take_output().iter().all(Vec::is_empty));
    }

    #[test]
    fn test_double_speed_halves_length() {
        let input = sine(440.0, 8000, 8000);
        let output = run(2.0, &input);
        assert!(output.len() >= 3200, "got {}", output.len());
        assert!(output.len() <= 4160, "got {}", output.len());
    }

    #[test]
    fn test_half_speed_doubles_length() {
        let input = sine(440.0, 8000, 8000);
        let output = run(0.5, &input);
        assert!(output.len() >= 14_400, "got {}", output.len());
        assert!(output.len() <= 16_160, "got {}", output.len());
    }

    #[test]
    fn test_output_keeps_level() {
        let input = sine(440.0, 8000, 16_000);
        let output = run(1.5, &input);
        let body = &output[160..];
        let rms = (body.iter().map(|x| x * x).sum::<f32>() / body.len() as f32).sqrt();
        assert!(rms > 0.6, "rms {rms}");
        assert!(output.iter().all(|x| x.abs() <= 1.0 + 1e-4));
    }

    #[test]
    fn test_extreme_factor_accepts_input() {
        let input = sine(220.0, 8000, 80_000);
        let output = run(100.0, &input);
        assert!(output.len() < 1200);
        assert!(Tempo::new(0.0, 8000, 1).is_err());
        assert!(Tempo::new(f64::NAN, 8000, 1).is_err());
        assert!(Tempo::new(1.0, 0, 1).is_err());
    }

    #[test]
    fn test_channels_stay_separate() {
        let mut tempo = Tempo::new(2.0, 8000, 2).unwrap();
        let left = vec![0.5f32; 4000];
        let right = vec![-0.5f32; 4000];
        tempo.push(&[left, right]);
        let out = tempo.take_output();
        assert_eq!(out[0].len(), out[1].len());
        // Past the fade-in the constant input is reconstructed exactly.
        assert!(out[0][200..].iter().all(|x| (x - 0.5).abs() < 1e-4));
        assert!(out[1][200..].iter().all(|x| (x + 0.5).abs() < 1e-4));
    }
}
