//! Audio/video backend using the system FFmpeg libraries.

use std::path::Path;

use super::{
    landed_position, AudioDecoder, Demuxer, MediaBackend, MediaSession, VideoDecoder,
    VideoParts, Yuv420ToRgb,
};
use bytes::Bytes;
use cadence_core::{
    AudioFormat, AudioFrame, ChannelLayout, DecodeError, Dimensions, Error, MediaInfo, MediaKind,
    Packet, PixelFormat, Rational, Result, SampleFormat, StreamInfo, VideoFrame,
};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScaleContext, flag::Flags};
use tracing::{debug, info, warn};

/// `AV_TIME_BASE` units per millisecond.
const AV_TICKS_PER_MS: i64 = 1000;

#[derive(Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub const fn new() -> Self {
        Self
    }
}

fn rational(tb: ffmpeg::Rational) -> Rational {
    Rational::new(tb.numerator(), tb.denominator())
}

fn sample_format(sample: Sample) -> Option<SampleFormat> {
    let planar = |t: SampleType| t == SampleType::Planar;
    Some(match sample {
        Sample::U8(t) if planar(t) => SampleFormat::U8P,
        Sample::U8(_) => SampleFormat::U8,
        Sample::I16(t) if planar(t) => SampleFormat::S16P,
        Sample::I16(_) => SampleFormat::S16,
        Sample::I32(t) if planar(t) => SampleFormat::S32P,
        Sample::I32(_) => SampleFormat::S32,
        Sample::F32(t) if planar(t) => SampleFormat::F32P,
        Sample::F32(_) => SampleFormat::F32,
        Sample::F64(t) if planar(t) => SampleFormat::F64P,
        Sample::F64(_) => SampleFormat::F64,
        _ => return None,
    })
}

fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out.set_duration(packet.duration);
    out
}

fn map_receive_error(e: ffmpeg::Error) -> DecodeError {
    match e {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => DecodeError::Again,
        ffmpeg::Error::Eof => DecodeError::EndOfStream,
        other => DecodeError::Refused(other.to_string()),
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, path: &Path) -> Result<MediaSession> {
        ffmpeg::init().map_err(|e| Error::Open(format!("FFmpeg init failed: {e}")))?;

        let input = ffmpeg::format::input(&path)
            .map_err(|e| Error::Open(format!("{}: {e}", path.display())))?;

        let audio_stream = input
            .streams()
            .best(Type::Audio)
            .ok_or_else(|| Error::Open("No audio stream found".to_string()))?;
        let audio_index = audio_stream.index();
        let audio_tb = rational(audio_stream.time_base());

        let audio_decoder =
            ffmpeg::codec::context::Context::from_parameters(audio_stream.parameters())
                .and_then(|ctx| ctx.decoder().audio())
                .map_err(|e| Error::Open(format!("Failed to open audio decoder: {e}")))?;

        let sample_format = sample_format(audio_decoder.format()).ok_or_else(|| {
            Error::Open(format!(
                "Unsupported audio sample format {:?}",
                audio_decoder.format()
            ))
        })?;
        let channels = audio_decoder.channels();
        let layout_bits = audio_decoder.channel_layout().bits();
        let audio_format = AudioFormat {
            sample_rate: audio_decoder.rate(),
            sample_format,
            channels,
            layout: (layout_bits != 0).then_some(ChannelLayout(layout_bits)),
            time_base: audio_tb,
        };
        let audio_info = StreamInfo {
            index: audio_index,
            kind: MediaKind::Audio,
            time_base: audio_tb,
            codec: audio_decoder
                .codec()
                .map_or_else(|| "unknown".to_string(), |c| c.name().to_string()),
        };

        let mut video = None;
        let mut video_info = None;
        let mut dimensions = None;
        if let Some(stream) = input.streams().best(Type::Video) {
            let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .and_then(|ctx| ctx.decoder().video())
                .map_err(|e| Error::Open(format!("Failed to open video decoder: {e}")))?;

            let info = StreamInfo {
                index: stream.index(),
                kind: MediaKind::Video,
                time_base: rational(stream.time_base()),
                codec: decoder
                    .codec()
                    .map_or_else(|| "unknown".to_string(), |c| c.name().to_string()),
            };
            dimensions = Some(Dimensions::new(decoder.width(), decoder.height()));
            video_info = Some(info);
            video = Some(VideoParts {
                decoder: Box::new(FfmpegVideoDecoder {
                    decoder,
                    normalizer: None,
                }),
                converter: Box::new(Yuv420ToRgb::new()),
            });
        }

        let time_bases = input.streams().map(|s| rational(s.time_base())).collect();
        let duration_ms = if input.duration() > 0 {
            input.duration() / AV_TICKS_PER_MS
        } else {
            0
        };

        info!(
            "Opened {} via ffmpeg: audio {} {} Hz/{}ch, video {}, {} ms",
            path.display(),
            audio_info.codec,
            audio_format.sample_rate,
            channels,
            video_info.as_ref().map_or("none", |v: &StreamInfo| v.codec.as_str()),
            duration_ms
        );

        Ok(MediaSession {
            info: MediaInfo {
                duration_ms,
                audio: audio_info,
                audio_format,
                video: video_info,
                dimensions,
            },
            demuxer: Box::new(FfmpegDemuxer {
                input,
                time_bases,
                pending: None,
            }),
            audio: Box::new(FfmpegAudioDecoder {
                decoder: audio_decoder,
                format: audio_format,
            }),
            video,
        })
    }
}

struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
    /// Time base of every stream, by index.
    time_bases: Vec<Rational>,
    /// First packet read after a seek, handed out before reading on.
    pending: Option<Packet>,
}

// SAFETY: the demuxer is owned by exactly one thread at a time; FFmpeg format
// contexts have no thread affinity.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => {
                return Err(Error::Decode(DecodeError::Refused(format!(
                    "Failed to read packet: {e}"
                ))));
            }
        }

        Ok(Some(Packet {
            stream_index: packet.stream(),
            pts: packet.pts(),
            dts: packet.dts(),
            duration: packet.duration(),
            is_key: packet.is_key(),
            data: packet.data().map_or_else(Bytes::new, Bytes::copy_from_slice),
        }))
    }

    fn position_ms(&self, packet: &Packet) -> Option<i64> {
        let time_base = self.time_bases.get(packet.stream_index)?;
        packet.timestamp().map(|ts| time_base.ts_to_ms(ts))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.pending.take() {
            return Ok(Some(packet));
        }
        self.next_packet()
    }

    fn seek(&mut self, target_ms: i64) -> Result<i64> {
        let ts = target_ms.max(0) * AV_TICKS_PER_MS;
        // Upper bound at the target: land on the keyframe at or before it.
        self.input
            .seek(ts, ..=ts)
            .map_err(|e| Error::Seek(format!("{e}")))?;
        self.pending = None;

        // The first packet after the jump tells where the container is.
        let first_ms = match self.next_packet() {
            Ok(Some(packet)) => {
                let ms = self.position_ms(&packet);
                self.pending = Some(packet);
                ms
            }
            Ok(None) => None,
            Err(e) => {
                warn!("No packet after seeking to {target_ms} ms: {e}");
                None
            }
        };
        let landed = landed_position(first_ms, target_ms);
        debug!("Seek to {target_ms} ms landed at {landed} ms");
        Ok(landed)
    }
}

struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    format: AudioFormat,
}

// SAFETY: see `FfmpegDemuxer`.
unsafe impl Send for FfmpegAudioDecoder {}

impl AudioDecoder for FfmpegAudioDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet))
            .map_err(|e| Error::Decode(DecodeError::Refused(e.to_string())))
    }

    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, DecodeError> {
        let mut frame = ffmpeg::frame::Audio::empty();
        self.decoder
            .receive_frame(&mut frame)
            .map_err(map_receive_error)?;

        let samples = frame.samples();
        let bps = self.format.sample_format.bytes_per_sample();
        let (plane_count, plane_len) = if self.format.sample_format.is_planar() {
            (usize::from(self.format.channels), samples * bps)
        } else {
            (1, samples * bps * usize::from(self.format.channels))
        };

        let planes = (0..plane_count.min(frame.planes()))
            .map(|i| {
                let data = frame.data(i);
                Bytes::copy_from_slice(&data[..plane_len.min(data.len())])
            })
            .collect();

        Ok(AudioFrame {
            format: self.format,
            samples,
            planes,
            pts: frame.pts(),
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    /// Converts non-4:2:0 sources to YUV 4:2:0.
    normalizer: Option<ScaleContext>,
}

// SAFETY: see `FfmpegDemuxer`. The scaler is only touched by the owning thread.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn normalize(
        &mut self,
        frame: &ffmpeg::frame::Video,
    ) -> std::result::Result<ffmpeg::frame::Video, DecodeError> {
        let (width, height, format) = (frame.width(), frame.height(), frame.format());
        let stale = self.normalizer.as_ref().map_or(true, |s| {
            s.input().format != format || s.input().width != width || s.input().height != height
        });
        if stale {
            warn!("Converting {format:?} video to YUV 4:2:0");
            let scaler = ScaleContext::get(
                format,
                width,
                height,
                Pixel::YUV420P,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|e| DecodeError::Refused(format!("Failed to create scaler: {e}")))?;
            self.normalizer = Some(scaler);
        }

        let mut out = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.normalizer.as_mut() {
            scaler
                .run(frame, &mut out)
                .map_err(|e| DecodeError::Refused(format!("Scaling failed: {e}")))?;
        }
        out.set_pts(frame.pts());
        Ok(out)
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&to_ffmpeg_packet(packet))
            .map_err(|e| Error::Decode(DecodeError::Refused(e.to_string())))
    }

    fn receive_frame(&mut self) -> std::result::Result<VideoFrame, DecodeError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        self.decoder
            .receive_frame(&mut decoded)
            .map_err(map_receive_error)?;

        let frame = if decoded.format() == Pixel::YUV420P {
            decoded
        } else {
            self.normalize(&decoded)?
        };

        let planes = (0..3).map(|i| Bytes::copy_from_slice(frame.data(i))).collect();
        let strides = (0..3).map(|i| frame.stride(i)).collect();

        Ok(VideoFrame {
            width: frame.width(),
            height: frame.height(),
            format: PixelFormat::Yuv420p,
            planes,
            strides,
            pts: frame.pts(),
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
