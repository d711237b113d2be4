//! Per-frame normalization into model input form.
//!
//! `FrameTransformer::transform` is a pure function of the frame:
//! 1. Reduce color to a single luminance plane (chrominance is dropped).
//! 2. Rescale samples from [0, 255] to [-1, 1] (`(v / 255 - 0.5) / 0.5`).
//! 3. Resize to `RESOLUTION × RESOLUTION` with bilinear sampling. Aspect ratio
//!    is not preserved.
//!
//! All arithmetic is plain `f32` in a fixed order, so the same frame always
//! produces a bit-identical tensor.

use crate::error::{ClassifyError, Result};
use crate::frame::{Frame, PixelLayout};

/// Side length of the square model input.
pub const RESOLUTION: usize = 224;

const NORMALIZE_MEAN: f32 = 0.5;
const NORMALIZE_STD: f32 = 0.5;

/// Fixed-shape model input: one `RESOLUTION × RESOLUTION` luminance channel.
///
/// Only the transformer constructs tensors, so the shape always holds:
///
/// ```compile_fail
/// use incident_classifier::Tensor;
///
/// let _tensor = Tensor { data: vec![0.0; 4] };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
}

impl Tensor {
    /// NCHW shape expected by the model.
    pub const SHAPE: [usize; 4] = [1, 1, RESOLUTION, RESOLUTION];

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mean sample value.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    #[cfg(test)]
    pub(crate) fn filled(value: f32) -> Self {
        Self {
            data: vec![value; RESOLUTION * RESOLUTION],
        }
    }
}

/// Stateless frame → tensor transform. Safe to share across threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameTransformer;

impl FrameTransformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(&self, frame: &Frame) -> Result<Tensor> {
        let luma = luminance(frame)?;
        let normalized: Vec<f32> = luma.iter().map(|&v| rescale(v)).collect();
        let data = resize_bilinear(
            &normalized,
            frame.width as usize,
            frame.height as usize,
            RESOLUTION,
        );
        Ok(Tensor { data })
    }
}

fn rescale(value: u8) -> f32 {
    (value as f32 / 255.0 - NORMALIZE_MEAN) / NORMALIZE_STD
}

fn luminance(frame: &Frame) -> Result<Vec<u8>> {
    let pixels = frame.pixels();
    let plane = (frame.width as usize) * (frame.height as usize);
    let expected = frame.layout.buffer_len(frame.width, frame.height)?;
    if pixels.len() != expected {
        return Err(ClassifyError::InvalidFrame(format!(
            "{:?} frame length mismatch: expected {}, got {}",
            frame.layout,
            expected,
            pixels.len()
        )));
    }
    let luma = match frame.layout {
        PixelLayout::Gray8 => pixels.to_vec(),
        PixelLayout::Nv12 => pixels[..plane].to_vec(),
        PixelLayout::Rgb24 => pixels
            .chunks_exact(3)
            .map(|px| bt601_luma(px[0], px[1], px[2]))
            .collect(),
        PixelLayout::Bgr24 => pixels
            .chunks_exact(3)
            .map(|px| bt601_luma(px[2], px[1], px[0]))
            .collect(),
    };
    Ok(luma)
}

fn bt601_luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299_f32 * r as f32 + 0.587_f32 * g as f32 + 0.114_f32 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Bilinear resize with half-pixel centers, edges clamped.
fn resize_bilinear(src: &[f32], width: usize, height: usize, side: usize) -> Vec<f32> {
    let xs = sample_positions(width, side);
    let ys = sample_positions(height, side);
    let mut out = Vec::with_capacity(side * side);
    for &(y0, y1, fy) in &ys {
        let row0 = &src[y0 * width..(y0 + 1) * width];
        let row1 = &src[y1 * width..(y1 + 1) * width];
        for &(x0, x1, fx) in &xs {
            let top = row0[x0] + (row0[x1] - row0[x0]) * fx;
            let bottom = row1[x0] + (row1[x1] - row1[x0]) * fx;
            out.push(top + (bottom - top) * fy);
        }
    }
    out
}

fn sample_positions(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len - 1;
    (0..dst_len)
        .map(|d| {
            let pos = ((d as f32 + 0.5) * scale - 0.5).clamp(0.0, last as f32);
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(last);
            (i0, i1, pos - i0 as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Frame {
        Frame::new(data, width, height, layout, 0).unwrap()
    }

    #[test]
    fn output_has_fixed_shape() -> Result<()> {
        let t = FrameTransformer::new();
        for (w, h) in [(1, 1), (640, 480), (100, 300), (224, 224)] {
            let f = frame(vec![0u8; (w * h) as usize], w, h, PixelLayout::Gray8);
            assert_eq!(t.transform(&f)?.len(), RESOLUTION * RESOLUTION);
        }
        Ok(())
    }

    #[test]
    fn extremes_map_to_unit_range() -> Result<()> {
        let t = FrameTransformer::new();
        let black = t.transform(&frame(vec![0u8; 16], 4, 4, PixelLayout::Gray8))?;
        let white = t.transform(&frame(vec![255u8; 16], 4, 4, PixelLayout::Gray8))?;
        assert!(black.as_slice().iter().all(|&v| v == -1.0));
        assert!(white.as_slice().iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn chrominance_is_discarded() -> Result<()> {
        let t = FrameTransformer::new();
        let mut nv12_a = vec![90u8; 16];
        nv12_a.extend_from_slice(&[10u8; 8]);
        let mut nv12_b = vec![90u8; 16];
        nv12_b.extend_from_slice(&[240u8; 8]);
        let a = t.transform(&frame(nv12_a, 4, 4, PixelLayout::Nv12))?;
        let b = t.transform(&frame(nv12_b, 4, 4, PixelLayout::Nv12))?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn bgr_and_rgb_agree_on_swapped_channels() -> Result<()> {
        let t = FrameTransformer::new();
        let rgb: Vec<u8> = (0..4).flat_map(|i| [200u8, 40 + i, 10]).collect();
        let bgr: Vec<u8> = rgb.chunks(3).flat_map(|px| [px[2], px[1], px[0]]).collect();
        let a = t.transform(&frame(rgb, 2, 2, PixelLayout::Rgb24))?;
        let b = t.transform(&frame(bgr, 2, 2, PixelLayout::Bgr24))?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn gray_pixel_luma_is_identity() {
        assert_eq!(bt601_luma(128, 128, 128), 128);
        assert_eq!(bt601_luma(255, 255, 255), 255);
        assert_eq!(bt601_luma(255, 0, 0), 76);
    }

    #[test]
    fn transform_is_bit_identical_across_calls() -> Result<()> {
        let t = FrameTransformer::new();
        let pixels: Vec<u8> = (0..(37 * 23 * 3)).map(|i| (i * 31 % 256) as u8).collect();
        let f = frame(pixels, 37, 23, PixelLayout::Rgb24);
        let a = t.transform(&f)?;
        let b = t.transform(&f)?;
        let a_bits: Vec<u32> = a.as_slice().iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
        Ok(())
    }

    #[test]
    fn resize_ignores_aspect_ratio() -> Result<()> {
        // Left half black, right half white on a wide frame: the output keeps
        // the split at the horizontal midpoint of the square.
        let t = FrameTransformer::new();
        let (w, h) = (8u32, 2u32);
        let pixels: Vec<u8> = (0..h)
            .flat_map(|_| (0..w).map(|x| if x < w / 2 { 0u8 } else { 255u8 }))
            .collect();
        let out = t.transform(&frame(pixels, w, h, PixelLayout::Gray8))?;
        let row = &out.as_slice()[..RESOLUTION];
        assert_eq!(row[0], -1.0);
        assert_eq!(row[RESOLUTION - 1], 1.0);
        assert!(row[RESOLUTION / 2 - 1] < 0.0);
        assert!(row[RESOLUTION / 2] > 0.0);
        Ok(())
    }
}
