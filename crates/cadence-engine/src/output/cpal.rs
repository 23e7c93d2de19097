//! Sound device output using cpal.

use super::resample::Resampler;
use super::ring::{shared_ring_buffer, SharedRingBuffer};
use super::{AudioSink, OutputProvider};
use crate::filter::to_planar_f32;
use bytes::Bytes;
use cadence_core::{AudioFormat, AudioFrame, Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Device buffer length.
const RING_MS: usize = 500;

/// Flags shared with the device callback.
#[derive(Default)]
struct Control {
    paused: AtomicBool,
    flush: AtomicBool,
}

/// Opens sinks on the default output device.
#[derive(Debug, Default)]
pub struct CpalOutput;

impl CpalOutput {
    pub const fn new() -> Self {
        Self
    }
}

struct DeviceInfo {
    sample_rate: u32,
    channels: u16,
    name: String,
}

impl OutputProvider for CpalOutput {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&self, format: &AudioFormat) -> Result<Box<dyn AudioSink>> {
        let control = Arc::new(Control::default());
        let (ready_tx, ready_rx) = bounded::<Result<(DeviceInfo, SharedRingBuffer<f32>)>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let stream_control = control.clone();
        // cpal::Stream is not Send, so the stream lives on its own thread.
        let thread = std::thread::Builder::new()
            .name("cadence-output".to_string())
            .spawn(move || match open_stream(stream_control) {
                Ok((stream, device, ring)) => {
                    let _ = ready_tx.send(Ok((device, ring)));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Output stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let (device, ring) = ready_rx
            .recv()
            .map_err(|e| Error::AudioOutput(format!("Output thread exited: {e}")))??;

        info!(
            "Audio output initialized: {} Hz, {} channels, device: {}",
            device.sample_rate, device.channels, device.name
        );

        let resampler = if device.sample_rate == format.sample_rate {
            None
        } else {
            Some(Resampler::new(
                format.sample_rate,
                device.sample_rate,
                usize::from(device.channels),
            )?)
        };

        Ok(Box::new(CpalSink {
            format: *format,
            device_rate: device.sample_rate,
            device_channels: usize::from(device.channels),
            ring,
            resampler,
            control,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }))
    }
}

fn open_stream(control: Arc<Control>) -> Result<(Stream, DeviceInfo, SharedRingBuffer<f32>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;
    debug!("Supported output config: {supported:?}");

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let ring = shared_ring_buffer::<f32>(
        config.sample_rate.0 as usize * usize::from(config.channels) * RING_MS / 1000,
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, ring.clone(), control)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, ring.clone(), control)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, ring.clone(), control)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {other:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    let info = DeviceInfo {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        name,
    };
    Ok((stream, info, ring))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    ring: SharedRingBuffer<f32>,
    control: Arc<Control>,
) -> Result<Stream> {
    let mut scratch = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if control.flush.swap(false, Ordering::AcqRel) {
                    ring.discard_all();
                }
                if control.paused.load(Ordering::Acquire) {
                    data.fill(T::from_sample(0.0f32));
                    return;
                }

                scratch.resize(data.len(), 0.0f32);
                let read = ring.read(&mut scratch);
                for (i, sample) in data.iter_mut().enumerate() {
                    let value = if i < read { scratch[i].clamp(-1.0, 1.0) } else { 0.0 };
                    *sample = T::from_sample(value);
                }
            },
            |err| error!("Audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

struct CpalSink {
    format: AudioFormat,
    device_rate: u32,
    device_channels: usize,
    ring: SharedRingBuffer<f32>,
    resampler: Option<Resampler>,
    control: Arc<Control>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Device-side sample count expressed as source bytes.
    fn device_to_source_bytes(&self, device_samples: usize) -> usize {
        let frames = device_samples / self.device_channels.max(1);
        let source_frames =
            frames * self.format.sample_rate as usize / self.device_rate.max(1) as usize;
        source_frames * self.format.bytes_per_frame()
    }

    /// Map source channels onto device channels.
    fn remap(&self, planes: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        if planes.len() == self.device_channels {
            return planes;
        }
        let len = planes.first().map_or(0, Vec::len);
        (0..self.device_channels)
            .map(|ch| match planes.len() {
                0 => vec![0.0; len],
                1 => planes[0].clone(),
                n if ch < n => planes[ch].clone(),
                _ => vec![0.0; len],
            })
            .collect()
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn bytes_free(&self) -> usize {
        self.device_to_source_bytes(self.ring.free())
    }

    fn backlog_bytes(&self) -> usize {
        let pending = self
            .resampler
            .as_ref()
            .map_or(0, Resampler::pending_frames);
        self.device_to_source_bytes(self.ring.available())
            + pending * self.format.bytes_per_frame()
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let frame_bytes = self.format.bytes_per_frame().max(1);
        let frame = AudioFrame {
            format: self.format,
            samples: data.len() / frame_bytes,
            planes: vec![Bytes::copy_from_slice(data)],
            pts: None,
        };
        let planes = match to_planar_f32(&frame) {
            Ok(planes) => self.remap(planes),
            Err(e) => {
                warn!("Dropping unplayable audio: {e}");
                return 0;
            }
        };

        let planes = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&planes) {
                Ok(out) => out,
                Err(e) => {
                    warn!("{e}");
                    return 0;
                }
            },
            None => planes,
        };

        let frames = planes.first().map_or(0, Vec::len);
        let mut interleaved = Vec::with_capacity(frames * self.device_channels);
        for i in 0..frames {
            interleaved.extend(planes.iter().map(|p| p[i]));
        }
        let written = self.ring.write(&interleaved);
        if written < interleaved.len() {
            warn!(
                "Output buffer overrun: dropped {} samples",
                interleaved.len() - written
            );
        }
        data.len()
    }

    fn clear(&mut self) {
        self.control.flush.store(true, Ordering::Release);
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.control.paused.store(paused, Ordering::Release);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
