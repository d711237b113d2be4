//! Decoded frames.
//!
//! - `Frame`: one decoded image from a file or camera. Pixel bytes are private.
//! - `PixelLayout`: how the bytes are arranged.
//!
//! Frames are produced by `ingest` sources, read by the transformer, and then
//! dropped. There is no `Clone`: a frame moves from source to consumer.

use zeroize::Zeroize;

use crate::error::{ClassifyError, Result};

/// Pixel arrangement of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R (OpenCV order).
    Bgr24,
    /// Single 8-bit luminance plane.
    Gray8,
    /// Y plane followed by an interleaved U/V plane subsampled 2×2
    /// (odd dimensions round up).
    Nv12,
}

impl PixelLayout {
    /// Expected byte length of a `width × height` buffer in this layout.
    pub fn buffer_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| ClassifyError::InvalidFrame("frame dimensions overflow".into()))?;
        let len = match self {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => pixels.checked_mul(3),
            PixelLayout::Gray8 => Some(pixels),
            PixelLayout::Nv12 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2) * 2;
                pixels.checked_add(chroma)
            }
        };
        len.ok_or_else(|| ClassifyError::InvalidFrame("frame dimensions overflow".into()))
    }
}

/// One decoded frame. Bytes are private and zeroized on drop.
///
/// Pixel bytes cannot be read from outside the crate:
///
/// ```compile_fail
/// use incident_classifier::{Frame, PixelLayout};
///
/// let frame = Frame::new(vec![0u8; 4], 2, 2, PixelLayout::Gray8, 0).unwrap();
/// let _bytes = frame.data;
/// ```
///
/// nor can a frame be serialized:
///
/// ```compile_fail
/// use incident_classifier::Frame;
///
/// #[derive(serde::Serialize)]
/// struct Wrapper {
///     frame: Frame,
/// }
/// ```
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Position of this frame in its source, starting at 0.
    pub index: u64,
}

impl Frame {
    /// Wrap a decoded buffer. The length must match `layout` for the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        index: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ClassifyError::InvalidFrame(format!(
                "empty frame dimensions {}x{}",
                width, height
            )));
        }
        let expected = layout.buffer_len(width, height)?;
        if data.len() != expected {
            return Err(ClassifyError::InvalidFrame(format!(
                "{:?} frame length mismatch: expected {}, got {}",
                layout,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            index,
        })
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Raw byte length (for logging and memory accounting).
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_mismatch() {
        let err = Frame::new(vec![0u8; 10], 2, 2, PixelLayout::Rgb24, 0).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidFrame(_)));
    }

    #[test]
    fn nv12_length_includes_chroma_plane() -> Result<()> {
        assert_eq!(PixelLayout::Nv12.buffer_len(4, 2)?, 12);
        assert_eq!(PixelLayout::Nv12.buffer_len(3, 3)?, 9 + 8);
        assert_eq!(PixelLayout::Nv12.buffer_len(5, 1)?, 5 + 6);
        let frame = Frame::new(vec![128u8; 12], 4, 2, PixelLayout::Nv12, 3)?;
        assert_eq!(frame.index, 3);
        assert_eq!(frame.byte_len(), 12);
        Ok(())
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Frame::new(Vec::new(), 0, 4, PixelLayout::Gray8, 0).is_err());
    }

    #[test]
    fn debug_does_not_print_pixels() -> Result<()> {
        let frame = Frame::new(vec![7u8; 4], 2, 2, PixelLayout::Gray8, 0)?;
        let debug = format!("{:?}", frame);
        assert!(debug.contains("Gray8"));
        assert!(!debug.contains("data"));
        Ok(())
    }
}
