//! Software YUV 4:2:0 to RGB24 conversion (BT.601, limited range).

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use super::PixelConverter;
use bytes::Bytes;
use cadence_core::{DecodeError, Error, PixelFormat, Result, RgbFrame, VideoFrame};

/// Converts planar YUV 4:2:0 (and passes RGB24 through) into packed RGB24.
#[derive(Debug, Default)]
pub struct Yuv420ToRgb {
    scratch: Vec<u8>,
}

impl Yuv420ToRgb {
    pub const fn new() -> Self {
        Self {
            scratch: Vec::new(),
        }
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Fixed-point BT.601: 16..235 luma, 16..240 chroma.
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

fn refused(reason: String) -> Error {
    Error::Decode(DecodeError::Refused(reason))
}

fn plane<'a>(frame: &'a VideoFrame, index: usize, rows: usize) -> Result<(&'a [u8], usize)> {
    let data = frame
        .planes
        .get(index)
        .ok_or_else(|| refused(format!("missing plane {index}")))?;
    let stride = frame.strides.get(index).copied().unwrap_or(0);
    if stride == 0 || data.len() < stride * rows.saturating_sub(1) {
        return Err(refused(format!("plane {index} too small for {rows} rows")));
    }
    Ok((data, stride))
}

impl PixelConverter for Yuv420ToRgb {
    fn convert(&mut self, frame: &VideoFrame, pts_ms: i64) -> Result<RgbFrame> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let stride = width * 3;

        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot convert a {width}x{height} frame"
            )));
        }

        self.scratch.clear();
        self.scratch.resize(stride * height, 0);

        match frame.format {
            PixelFormat::Yuv420p => {
                let chroma_rows = height.div_ceil(2);
                let (y_plane, y_stride) = plane(frame, 0, height)?;
                let (u_plane, u_stride) = plane(frame, 1, chroma_rows)?;
                let (v_plane, v_stride) = plane(frame, 2, chroma_rows)?;

                for row in 0..height {
                    let out = &mut self.scratch[row * stride..(row + 1) * stride];
                    for col in 0..width {
                        let y = y_plane.get(row * y_stride + col).copied().unwrap_or(16);
                        let chroma = (row / 2, col / 2);
                        let u = u_plane
                            .get(chroma.0 * u_stride + chroma.1)
                            .copied()
                            .unwrap_or(128);
                        let v = v_plane
                            .get(chroma.0 * v_stride + chroma.1)
                            .copied()
                            .unwrap_or(128);
                        out[col * 3..col * 3 + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
                    }
                }
            }
            PixelFormat::Rgb24 => {
                let (rgb, rgb_stride) = plane(frame, 0, height)?;
                for row in 0..height {
                    let src = rgb
                        .get(row * rgb_stride..row * rgb_stride + stride)
                        .ok_or_else(|| refused("short RGB row".to_string()))?;
                    self.scratch[row * stride..(row + 1) * stride].copy_from_slice(src);
                }
            }
        }

        Ok(RgbFrame {
            width: frame.width,
            height: frame.height,
            stride,
            data: Bytes::copy_from_slice(&self.scratch),
            pts_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuv_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> VideoFrame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        VideoFrame {
            width,
            height,
            format: PixelFormat::Yuv420p,
            planes: vec![
                Bytes::from(vec![y; w * h]),
                Bytes::from(vec![u; cw * ch]),
                Bytes::from(vec![v; cw * ch]),
            ],
            strides: vec![w, cw, cw],
            pts: Some(0),
        }
    }

    #[test]
    fn test_black_and_white() {
        let mut converter = Yuv420ToRgb::new();

        let black = converter.convert(&yuv_frame(4, 4, 16, 128, 128), 0).unwrap();
        assert_eq!(black.pixel(0, 0), Some([0, 0, 0]));

        let white = converter.convert(&yuv_frame(4, 4, 235, 128, 128), 40).unwrap();
        assert_eq!(white.pixel(3, 3), Some([255, 255, 255]));
        assert_eq!(white.pts_ms, 40);
    }

    #[test]
    fn test_red_dominates_with_high_v() {
        let mut converter = Yuv420ToRgb::new();
        let frame = converter.convert(&yuv_frame(2, 2, 81, 90, 240), 0).unwrap();
        let [r, g, b] = frame.pixel(1, 1).unwrap();
        assert!(r > 200 && g < 60 && b < 60, "got {r},{g},{b}");
    }

    #[test]
    fn test_odd_dimensions() {
        let mut converter = Yuv420ToRgb::new();
        let frame = converter.convert(&yuv_frame(5, 3, 128, 128, 128), 0).unwrap();
        assert_eq!(frame.stride, 15);
        assert_eq!(frame.data.len(), 45);
        assert!(frame.pixel(4, 2).is_some());
        assert!(frame.pixel(5, 0).is_none());
    }

    #[test]
    fn test_missing_plane_is_an_error() {
        let mut frame = yuv_frame(4, 4, 16, 128, 128);
        frame.planes.truncate(1);
        assert!(Yuv420ToRgb::new().convert(&frame, 0).is_err());
    }

    #[test]
    fn test_rgb_passthrough() {
        let frame = VideoFrame {
            width: 2,
            height: 1,
            format: PixelFormat::Rgb24,
            planes: vec![Bytes::from(vec![1u8, 2, 3, 4, 5, 6])],
            strides: vec![6],
            pts: None,
        };
        let rgb = Yuv420ToRgb::new().convert(&frame, 7).unwrap();
        assert_eq!(rgb.pixel(1, 0), Some([4, 5, 6]));
    }
}
