//! Borrowed views over decoded frames handed to track callbacks.
//!
//! Frames only live for the duration of a callback; consumers copy what they
//! need to keep.

use thiserror::Error;

/// Planar YUV 4:2:0 frame with an optional full-resolution alpha plane.
#[derive(Debug, Clone, Copy)]
pub struct I420aFrame<'a> {
    pub width: usize,
    pub height: usize,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub a: Option<&'a [u8]>,
    pub stride_y: usize,
    pub stride_u: usize,
    pub stride_v: usize,
    pub stride_a: usize,
}

impl<'a> I420aFrame<'a> {
    /// Tightly packed planes, no alpha.
    pub fn packed(width: usize, height: usize, y: &'a [u8], u: &'a [u8], v: &'a [u8]) -> Self {
        let chroma_width = width.div_ceil(2);
        Self {
            width,
            height,
            y,
            u,
            v,
            a: None,
            stride_y: width,
            stride_u: chroma_width,
            stride_v: chroma_width,
            stride_a: width,
        }
    }

    pub fn with_alpha(mut self, a: &'a [u8], stride_a: usize) -> Self {
        self.a = Some(a);
        self.stride_a = stride_a;
        self
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty);
        }
        let chroma_width = self.width.div_ceil(2);
        let chroma_height = self.height.div_ceil(2);
        check_plane("y", self.y, self.stride_y, self.width, self.height)?;
        check_plane("u", self.u, self.stride_u, chroma_width, chroma_height)?;
        check_plane("v", self.v, self.stride_v, chroma_width, chroma_height)?;
        if let Some(a) = self.a {
            check_plane("a", a, self.stride_a, self.width, self.height)?;
        }
        Ok(())
    }
}

/// Packed 32-bit pixels, stored B, G, R, A in memory (little-endian `0xAARRGGBB`).
#[derive(Debug, Clone, Copy)]
pub struct Argb32Frame<'a> {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub enum VideoFrame<'a> {
    I420a(&'a I420aFrame<'a>),
    Argb32(&'a Argb32Frame<'a>),
}

/// Interleaved PCM, 8- or 16-bit.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub data: &'a [u8],
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub frames: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no pixels")]
    Empty,
    #[error("{plane} plane stride {stride} is narrower than {width} pixels")]
    StrideTooSmall {
        plane: &'static str,
        stride: usize,
        width: usize,
    },
    #[error("{plane} plane too short: need {needed} bytes, have {actual}")]
    PlaneTooShort {
        plane: &'static str,
        needed: usize,
        actual: usize,
    },
}

fn check_plane(
    plane: &'static str,
    data: &[u8],
    stride: usize,
    width: usize,
    rows: usize,
) -> Result<(), FrameError> {
    if stride < width {
        return Err(FrameError::StrideTooSmall {
            plane,
            stride,
            width,
        });
    }
    let needed = stride * (rows - 1) + width;
    if data.len() < needed {
        return Err(FrameError::PlaneTooShort {
            plane,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Convert a (limited-range BT.601) I420A frame into packed ARGB.
///
/// `out` is resized to `width * height * 4`; the returned stride is `width * 4`.
/// Without an alpha plane every pixel is opaque.
pub fn i420a_to_argb32(frame: &I420aFrame<'_>, out: &mut Vec<u8>) -> Result<usize, FrameError> {
    frame.validate()?;
    let stride = frame.width * 4;
    out.resize(stride * frame.height, 0);

    for row in 0..frame.height {
        let y_row = &frame.y[row * frame.stride_y..];
        let u_row = &frame.u[(row / 2) * frame.stride_u..];
        let v_row = &frame.v[(row / 2) * frame.stride_v..];
        let a_row = frame.a.map(|a| &a[row * frame.stride_a..]);
        let dst = &mut out[row * stride..(row + 1) * stride];

        for col in 0..frame.width {
            let (r, g, b) = yuv_to_rgb(y_row[col], u_row[col / 2], v_row[col / 2]);
            let alpha = a_row.map_or(0xff, |a| a[col]);
            let px = &mut dst[col * 4..col * 4 + 4];
            px[0] = b;
            px[1] = g;
            px[2] = r;
            px[3] = alpha;
        }
    }
    Ok(stride)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (clamp(r), clamp(g), clamp(b))
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
