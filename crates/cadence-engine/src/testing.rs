//! In-memory backend parts shared by unit tests.

use crate::backend::{AudioDecoder, Demuxer, VideoDecoder};
use bytes::Bytes;
use cadence_core::{
    AudioFormat, AudioFrame, DecodeError, Error, PixelFormat, Packet, Result, VideoFrame,
};
use std::collections::VecDeque;

/// Demuxer over a fixed list of read results.
///
/// Seeking drops every packet stamped before the target, or fails when
/// `seekable` is false.
pub struct ListDemuxer {
    pub packets: VecDeque<Result<Packet>>,
    pub seekable: bool,
}

impl ListDemuxer {
    pub fn new(packets: Vec<Result<Packet>>) -> Self {
        Self {
            packets: packets.into(),
            seekable: true,
        }
    }
}

impl Demuxer for ListDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        self.packets.pop_front().transpose()
    }

    fn seek(&mut self, target_ms: i64) -> Result<i64> {
        if !self.seekable {
            return Err(Error::Seek("not seekable".to_string()));
        }
        self.packets.retain(|p| match p {
            Ok(packet) => packet.pts.unwrap_or(0) >= target_ms,
            Err(_) => false,
        });
        Ok(target_ms)
    }
}

/// Packets carry raw samples in the decoder's format. Empty packets are
/// refused.
pub struct PcmDecoder {
    format: AudioFormat,
    pending: Option<AudioFrame>,
}

impl PcmDecoder {
    pub const fn new(format: AudioFormat) -> Self {
        Self {
            format,
            pending: None,
        }
    }
}

impl AudioDecoder for PcmDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.data.is_empty() {
            return Err(Error::Decode(DecodeError::Refused("empty".into())));
        }
        self.pending = Some(AudioFrame {
            format: self.format,
            samples: packet.data.len() / self.format.bytes_per_frame(),
            planes: vec![packet.data.clone()],
            pts: None,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<AudioFrame, DecodeError> {
        self.pending.take().ok_or(DecodeError::Again)
    }

    fn flush(&mut self) {
        self.pending = None;
    }
}

/// Emits a mid-gray RGB24 frame per packet. The first payload byte is the
/// frame width; empty packets are refused.
#[derive(Default)]
pub struct GrayDecoder {
    pending: Option<VideoFrame>,
}

impl VideoDecoder for GrayDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let Some(&width) = packet.data.first() else {
            return Err(Error::Decode(DecodeError::Refused("empty".into())));
        };
        let width = u32::from(width.max(1));
        self.pending = Some(VideoFrame {
            width,
            height: 2,
            format: PixelFormat::Rgb24,
            planes: vec![Bytes::from(vec![128u8; width as usize * 3 * 2])],
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

/// 20 ms of an S16 mono ramp at 8 kHz.
pub fn pcm_packet(stream_index: usize, pts_ms: i64) -> Packet {
    let data: Vec<u8> = (0..160i16).flat_map(|i| (i * 50).to_ne_bytes()).collect();
    Packet::new(stream_index, Some(pts_ms), data)
}
