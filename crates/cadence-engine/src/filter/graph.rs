//! Linear audio filter graph: buffer source, tempo, buffer sink.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::sample::{from_planar_f32, to_planar_f32};
use super::tempo::Tempo;
use bytes::Bytes;
use cadence_core::{validate_speed, AudioFormat, AudioFrame, Error, Result};
use std::collections::VecDeque;
use tracing::debug;

/// Entry point of the graph. Accepts frames matching the declared format.
struct BufferSource {
    format: AudioFormat,
}

impl BufferSource {
    fn accept(&self, frame: &AudioFrame) -> Result<Vec<Vec<f32>>> {
        let got = &frame.format;
        if got.sample_rate != self.format.sample_rate
            || got.channels != self.format.channels
            || got.sample_format != self.format.sample_format
        {
            return Err(Error::FilterGraph(format!(
                "frame format {} Hz/{}/{}ch does not match source {} Hz/{}/{}ch",
                got.sample_rate,
                got.sample_format,
                got.channels,
                self.format.sample_rate,
                self.format.sample_format,
                self.format.channels
            )));
        }
        to_planar_f32(frame)
    }
}

/// Exit point of the graph. Holds filtered frames until pulled.
struct BufferSink {
    format: AudioFormat,
    ready: VecDeque<AudioFrame>,
}

impl BufferSink {
    fn collect(&mut self, planes: &[Vec<f32>]) {
        let samples = planes.first().map_or(0, Vec::len);
        if samples == 0 {
            return;
        }
        let data = from_planar_f32(planes, self.format.sample_format);
        self.ready.push_back(AudioFrame {
            format: self.format,
            samples,
            planes: vec![Bytes::from(data)],
            pts: None,
        });
    }
}

/// A configured tempo chain for one source format and speed factor.
pub struct FilterGraph {
    source: BufferSource,
    tempo: Tempo,
    sink: BufferSink,
    description: String,
}

impl FilterGraph {
    /// Build and validate a graph for `source` at `factor`.
    ///
    /// A source without a channel layout gets the default layout for its
    /// channel count. The sink emits the packed equivalent of the source
    /// sample format at the source rate.
    pub fn build(source: &AudioFormat, factor: f64) -> Result<Self> {
        validate_speed(factor).map_err(|e| Error::FilterGraph(e.to_string()))?;

        if source.sample_rate == 0 {
            return Err(Error::FilterGraph("source sample rate is zero".to_string()));
        }
        if source.channels == 0 {
            return Err(Error::FilterGraph("source has no channels".to_string()));
        }
        if !source.time_base.is_valid() {
            return Err(Error::FilterGraph(format!(
                "invalid source time base {}",
                source.time_base
            )));
        }

        let layout = match source.layout {
            Some(layout) => layout,
            None => {
                let layout = source.layout_or_default();
                debug!(
                    "No channel layout for {} channels, using {layout}",
                    source.channels
                );
                layout
            }
        };
        if layout.channels() != source.channels {
            return Err(Error::FilterGraph(format!(
                "channel layout {layout} does not describe {} channels",
                source.channels
            )));
        }

        let source_format = AudioFormat {
            layout: Some(layout),
            ..*source
        };
        let sink_format = source_format.packed();
        let tempo = Tempo::new(factor, source.sample_rate, usize::from(source.channels))?;

        let description = format!(
            "abuffer=time_base={}:sample_rate={}:sample_fmt={}:channel_layout={layout},atempo={factor},abuffersink=sample_fmt={}",
            source.time_base,
            source.sample_rate,
            source.sample_format,
            sink_format.sample_format
        );

        Ok(Self {
            source: BufferSource {
                format: source_format,
            },
            tempo,
            sink: BufferSink {
                format: sink_format,
                ready: VecDeque::new(),
            },
            description,
        })
    }

    pub const fn factor(&self) -> f64 {
        self.tempo.factor()
    }

    pub const fn source_format(&self) -> &AudioFormat {
        &self.source.format
    }

    pub const fn sink_format(&self) -> &AudioFormat {
        &self.sink.format
    }

    /// Textual form of the chain, for logs.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Push one decoded frame through the chain.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        let planes = self.source.accept(frame)?;
        self.tempo.push(&planes);
        let produced = self.tempo.take_output();
        self.sink.collect(&produced);
        Ok(())
    }

    /// Run out audio the tempo is still holding back. Used at end of input.
    pub fn drain(&mut self) {
        self.tempo.finish();
        let produced = self.tempo.take_output();
        self.sink.collect(&produced);
    }

    /// Next filtered frame, or `None` when the sink needs more input.
    pub fn pull_frame(&mut self) -> Option<AudioFrame> {
        self.sink.ready.pop_front()
    }
}
