//! Conversion between raw sample layouts and planar f32.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]

use cadence_core::{AudioFrame, Error, Result, SampleFormat};

/// Decode one native-endian sample to f32 in `[-1, 1]`.
fn read_sample(format: SampleFormat, raw: &[u8]) -> f32 {
    match format.packed() {
        SampleFormat::U8 => (f32::from(raw[0]) - 128.0) / 128.0,
        SampleFormat::S16 => f32::from(i16::from_ne_bytes([raw[0], raw[1]])) / 32768.0,
        SampleFormat::S32 => {
            i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32 / 2_147_483_648.0
        }
        SampleFormat::F32 => f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
        _ => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[..8]);
            f64::from_ne_bytes(bytes) as f32
        }
    }
}

fn write_sample(format: SampleFormat, value: f32, out: &mut Vec<u8>) {
    let clamped = value.clamp(-1.0, 1.0);
    match format.packed() {
        SampleFormat::U8 => out.push((clamped * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8),
        SampleFormat::S16 => {
            let scaled = (clamped * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            out.extend_from_slice(&scaled.to_ne_bytes());
        }
        SampleFormat::S32 => {
            let scaled = (f64::from(clamped) * 2_147_483_648.0)
                .round()
                .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            out.extend_from_slice(&scaled.to_ne_bytes());
        }
        SampleFormat::F32 => out.extend_from_slice(&value.to_ne_bytes()),
        _ => out.extend_from_slice(&f64::from(value).to_ne_bytes()),
    }
}

/// Split a frame into one f32 buffer per channel.
pub fn to_planar_f32(frame: &AudioFrame) -> Result<Vec<Vec<f32>>> {
    let format = frame.format.sample_format;
    let channels = usize::from(frame.format.channels);
    let bps = format.bytes_per_sample();
    let samples = frame.samples;

    if channels == 0 {
        return Err(Error::FilterGraph("frame has no channels".to_string()));
    }

    let mut planes = vec![Vec::with_capacity(samples); channels];

    if format.is_planar() {
        if frame.planes.len() < channels {
            return Err(Error::FilterGraph(format!(
                "expected {channels} planes, got {}",
                frame.planes.len()
            )));
        }
        for (ch, out) in planes.iter_mut().enumerate() {
            let plane = &frame.planes[ch];
            if plane.len() < samples * bps {
                return Err(Error::FilterGraph(format!("plane {ch} is short")));
            }
            out.extend(
                plane[..samples * bps]
                    .chunks_exact(bps)
                    .map(|raw| read_sample(format, raw)),
            );
        }
    } else {
        let data = frame
            .planes
            .first()
            .ok_or_else(|| Error::FilterGraph("frame has no data".to_string()))?;
        let needed = samples * channels * bps;
        if data.len() < needed {
            return Err(Error::FilterGraph(format!(
                "packed buffer holds {} bytes, need {needed}",
                data.len()
            )));
        }
        for (i, raw) in data[..needed].chunks_exact(bps).enumerate() {
            planes[i % channels].push(read_sample(format, raw));
        }
    }

    Ok(planes)
}

/// Interleave planar f32 into packed bytes of `format`.
///
/// The output always uses the packed variant of `format`.
pub fn from_planar_f32(planes: &[Vec<f32>], format: SampleFormat) -> Vec<u8> {
    let samples = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(samples * planes.len() * format.bytes_per_sample());
    for i in 0..samples {
        for plane in planes {
            write_sample(format, plane[i], &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cadence_core::AudioFormat;

    fn s16_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_packed_s16_splits_channels() {
        let format = AudioFormat::new(8000, SampleFormat::S16, 2);
        let frame = AudioFrame {
            format,
            samples: 2,
            planes: vec![Bytes::from(s16_bytes(&[16384, -16384, 0, 32767]))],
            pts: Some(0),
        };

        let planes = to_planar_f32(&frame).unwrap();
        assert_eq!(planes.len(), 2);
        assert!((planes[0][0] - 0.5).abs() < 1e-4);
        assert!((planes[1][0] + 0.5).abs() < 1e-4);
        assert!(planes[0][1].abs() < 1e-6);
        assert!((planes[1][1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_planar_f32_is_read_per_plane() {
        let format = AudioFormat::new(48_000, SampleFormat::F32P, 2);
        let left: Vec<u8> = [0.25f32, 0.5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let right: Vec<u8> = [-0.25f32, -0.5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let frame = AudioFrame {
            format,
            samples: 2,
            planes: vec![Bytes::from(left), Bytes::from(right)],
            pts: None,
        };

        let planes = to_planar_f32(&frame).unwrap();
        assert_eq!(planes, vec![vec![0.25, 0.5], vec![-0.25, -0.5]]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let format = AudioFormat::new(8000, SampleFormat::S16, 2);
        let frame = AudioFrame {
            format,
            samples: 10,
            planes: vec![Bytes::from(vec![0u8; 8])],
            pts: None,
        };
        assert!(matches!(to_planar_f32(&frame), Err(Error::FilterGraph(_))));
    }

    #[test]
    fn test_interleave_to_packed_s16() {
        let planes = vec![vec![0.5f32, 0.0], vec![-0.5f32, 1.0]];
        let bytes = from_planar_f32(&planes, SampleFormat::S16P);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![16384, -16384, 0, 32767]);
    }

    #[test]
    fn test_f32_survives_unchanged() {
        let planes = vec![vec![0.123f32, -0.75]];
        let bytes = from_planar_f32(&planes, SampleFormat::F32);
        let frame = AudioFrame {
            format: AudioFormat::new(44_100, SampleFormat::F32, 1),
            samples: 2,
            planes: vec![Bytes::from(bytes)],
            pts: None,
        };
        assert_eq!(to_planar_f32(&frame).unwrap(), planes);
    }

    #[test]
    fn test_u8_midpoint_is_silence() {
        let format = AudioFormat::new(8000, SampleFormat::U8, 1);
        let frame = AudioFrame {
            format,
            samples: 3,
            planes: vec![Bytes::from(vec![128u8, 0, 255])],
            pts: None,
        };
        let planes = to_planar_f32(&frame).unwrap();
        assert!(planes[0][0].abs() < 1e-6);
        assert!((planes[0][1] + 1.0).abs() < 1e-6);
        assert!(planes[0][2] > 0.99);
    }
}
