//! Audio-only backend using symphonia.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs::File;
use std::path::Path;

use super::{landed_position, AudioDecoder, Demuxer, MediaBackend, MediaSession};
use ::symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, Packet as SymphoniaPacket, SeekMode, SeekTo, Track},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::{Time, TimeBase},
};
use bytes::Bytes;
use cadence_core::{
    AudioFormat, AudioFrame, ChannelLayout, DecodeError, Error, MediaInfo, MediaKind, Packet,
    Rational, Result, SampleFormat, StreamInfo,
};
use tracing::{debug, info, warn};

/// Opens any container symphonia can probe. Video streams are never selected.
#[derive(Debug, Default)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub const fn new() -> Self {
        Self
    }
}

#[allow(clippy::cast_possible_wrap)]
fn rational(time_base: Option<TimeBase>, sample_rate: u32) -> Rational {
    match time_base {
        Some(tb) if tb.numer > 0 && tb.denom > 0 => {
            Rational::new(tb.numer as i32, tb.denom as i32)
        }
        _ => Rational::new(1, sample_rate.max(1) as i32),
    }
}

fn codec_name(track: &Track) -> String {
    ::symphonia::default::get_codecs()
        .get_codec(track.codec_params.codec)
        .map_or_else(|| "unknown".to_string(), |d| d.short_name.to_string())
}

impl MediaBackend for SymphoniaBackend {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn open(&self, path: &Path) -> Result<MediaSession> {
        let file = File::open(path)
            .map_err(|e| Error::Open(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = ::symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Open(format!("Failed to probe {}: {e}", path.display())))?;
        let format = probed.format;

        let (audio_index, track) = format
            .tracks()
            .iter()
            .enumerate()
            .find(|(_, t)| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Open("No audio stream found".to_string()))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Open("Audio stream has no sample rate".to_string()))?;
        let channels = params.channels.map_or(2, |c| c.count() as u16);
        let layout = params
            .channels
            .map(|c| ChannelLayout(u64::from(c.bits())));
        let time_base = rational(params.time_base, sample_rate);

        let duration_ms = match (params.time_base, params.n_frames) {
            (Some(tb), Some(frames)) => {
                let time = tb.calc_time(frames);
                time.seconds as i64 * 1000 + (time.frac * 1000.0) as i64
            }
            _ => 0,
        };

        let decoder = ::symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Open(format!("Failed to create audio decoder: {e}")))?;

        let audio_format = AudioFormat {
            sample_rate,
            sample_format: SampleFormat::F32,
            channels,
            layout,
            time_base,
        };

        let audio_info = StreamInfo {
            index: audio_index,
            kind: MediaKind::Audio,
            time_base,
            codec: codec_name(track),
        };

        info!(
            "Opened {} via symphonia: {} {} Hz, {} channels, {} ms",
            path.display(),
            audio_info.codec,
            sample_rate,
            channels,
            duration_ms
        );

        let track_ids: Vec<u32> = format.tracks().iter().map(|t| t.id).collect();
        let track_id = track.id;

        Ok(MediaSession {
            info: MediaInfo {
                duration_ms,
                audio: audio_info,
                audio_format,
                video: None,
                dimensions: None,
            },
            demuxer: Box::new(SymphoniaDemuxer {
                format,
                track_ids,
                track_id,
                time_base,
            }),
            audio: Box::new(SymphoniaAudioDecoder {
                decoder,
                track_id,
                format: audio_format,
                pending: None,
            }),
            video: None,
        })
    }
}

struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    track_ids: Vec<u32>,
    track_id: u32,
    time_base: Rational,
}

impl Demuxer for SymphoniaDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("Stream parameters changed mid-file, ending playback");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Decode(DecodeError::Refused(format!(
                    "Failed to read packet: {e}"
                ))));
            }
        };

        let stream_index = self
            .track_ids
            .iter()
            .position(|id| *id == packet.track_id())
            .unwrap_or(usize::MAX);

        #[allow(clippy::cast_possible_wrap)]
        let (ts, dur) = (packet.ts() as i64, packet.dur() as i64);
        Ok(Some(Packet {
            stream_index,
            pts: Some(ts),
            dts: Some(ts),
            duration: dur,
            is_key: true,
            data: Bytes::from(Vec::from(packet.data)),
        }))
    }

    fn seek(&mut self, target_ms: i64) -> Result<i64> {
        #[allow(clippy::cast_precision_loss)]
        let time = Time::from(target_ms.max(0) as f64 / 1000.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Seek(format!("{e}")))?;

        #[allow(clippy::cast_possible_wrap)]
        let landed = self.time_base.ts_to_ms(seeked.actual_ts as i64);
        debug!("Seek to {target_ms} ms landed at {landed} ms");
        Ok(landed_position(Some(landed), target_ms))
    }
}

struct SymphoniaAudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    pending: Option<AudioFrame>,
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    #[allow(clippy::cast_sign_loss)]
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let ts = packet.timestamp().unwrap_or(0).max(0) as u64;
        let dur = packet.duration.max(0) as u64;
        let input = SymphoniaPacket::new_from_slice(self.track_id, ts, dur, &packet.data);

        let decoded = self.decoder.decode(&input).map_err(|e| match e {
            SymphoniaError::DecodeError(msg) => Error::Decode(DecodeError::Refused(msg.to_string())),
            other => Error::Decode(DecodeError::Refused(other.to_string())),
        })?;

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(());
        }

        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        samples.copy_interleaved_ref(decoded);
        let data: Vec<u8> = samples
            .samples()
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();

        #[allow(clippy::cast_possible_wrap)]
        let pts = Some(ts as i64);
        self.pending = Some(AudioFrame {
            format: self.format,
            samples: frames,
            planes: vec![Bytes::from(data)],
            pts,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, DecodeError> {
        self.pending.take().ok_or(DecodeError::Again)
    }

    fn flush(&mut self) {
        self.pending = None;
        self.decoder.reset();
    }
}
