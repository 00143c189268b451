//! Frame buffers and pixel layout conversion

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per packed 8-bit four channel pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Channel order and scanline orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// As delivered by the device: BGRA, first row is the bottom of the image
    Bgra8BottomUp,
    /// As expected by renderers: RGBA, first row is the top of the image
    Rgba8TopDown,
}

/// Frame errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unsupported pixel layout: {0:?}")]
    UnsupportedFormat(PixelLayout),

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Raw pixel payload tagged with its layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Wrap a pixel buffer, checking it holds exactly width * height pixels
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        pixels: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = Self::byte_len(width, height);
        if pixels.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            pixels,
        })
    }

    /// Zero-filled buffer
    pub fn zeroed(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
            pixels: vec![0; Self::byte_len(width, height)],
        }
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Take the pixel bytes, e.g. to hand them to a texture
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Get the four bytes of pixel (x, y) in buffer row order
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let p = &self.pixels[idx..idx + BYTES_PER_PIXEL];
        Some([p[0], p[1], p[2], p[3]])
    }

    fn same_geometry(&self, other: &FrameBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Convert a bottom-up BGRA frame into a fresh top-down RGBA frame.
///
/// Rows are flipped vertically, B and R are swapped, alpha is kept. With
/// `mirror_horizontally` columns are reversed as well.
pub fn convert(input: FrameBuffer, mirror_horizontally: bool) -> Result<FrameBuffer, FrameError> {
    let mut output = FrameBuffer::zeroed(input.width, input.height, PixelLayout::Rgba8TopDown);
    convert_into(&input, mirror_horizontally, &mut output)?;
    Ok(output)
}

/// Convert into `output`, reusing its allocation when the geometry matches
pub fn convert_into(
    input: &FrameBuffer,
    mirror_horizontally: bool,
    output: &mut FrameBuffer,
) -> Result<(), FrameError> {
    if input.layout != PixelLayout::Bgra8BottomUp {
        return Err(FrameError::UnsupportedFormat(input.layout));
    }

    if !output.same_geometry(input) || output.pixels.len() != input.pixels.len() {
        *output = FrameBuffer::zeroed(input.width, input.height, PixelLayout::Rgba8TopDown);
    }
    output.layout = PixelLayout::Rgba8TopDown;

    let width = input.width as usize;
    let height = input.height as usize;
    let row_bytes = width * BYTES_PER_PIXEL;
    if row_bytes == 0 {
        return Ok(());
    }

    for (y, dst_row) in output.pixels.chunks_exact_mut(row_bytes).enumerate() {
        let src_y = height - 1 - y;
        let src_row = &input.pixels[src_y * row_bytes..(src_y + 1) * row_bytes];

        for (x, dst) in dst_row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let src_x = if mirror_horizontally { width - 1 - x } else { x };
            let src = &src_row[src_x * BYTES_PER_PIXEL..(src_x + 1) * BYTES_PER_PIXEL];
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
            dst[3] = src[3];
        }
    }

    Ok(())
}

/// Post-capture image processing step over a converted frame
pub trait FrameProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform the frame in place
    fn process(&self, frame: &mut FrameBuffer) -> Result<(), FrameError>;
}

/// Luminance filter: gray = 0.3R + 0.59G + 0.11B, alpha forced opaque
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl FrameProcessor for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn process(&self, frame: &mut FrameBuffer) -> Result<(), FrameError> {
        if frame.layout != PixelLayout::Rgba8TopDown {
            return Err(FrameError::UnsupportedFormat(frame.layout));
        }

        for pixel in frame.pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            let gray = 0.3 * pixel[0] as f32 + 0.59 * pixel[1] as f32 + 0.11 * pixel[2] as f32;
            let gray = gray.round().min(255.0) as u8;
            pixel[0] = gray;
            pixel[1] = gray;
            pixel[2] = gray;
            pixel[3] = u8::MAX;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pattern(width: u32, height: u32) -> FrameBuffer {
        let pixels = (0..FrameBuffer::byte_len(width, height))
            .map(|i| (i * 7 % 251) as u8)
            .collect();
        FrameBuffer::new(width, height, PixelLayout::Bgra8BottomUp, pixels).unwrap()
    }

    #[test]
    fn test_two_by_two_flip_and_swap() {
        #[rustfmt::skip]
        let raw = vec![
            // row 0 (bottom): pixel 0, pixel 1
            10, 11, 12, 13,   20, 21, 22, 23,
            // row 1 (top): pixel 2, pixel 3
            30, 31, 32, 33,   40, 41, 42, 43,
        ];
        let input = FrameBuffer::new(2, 2, PixelLayout::Bgra8BottomUp, raw).unwrap();
        let out = convert(input, false).unwrap();

        #[rustfmt::skip]
        let expected = vec![
            32, 31, 30, 33,   42, 41, 40, 43,
            12, 11, 10, 13,   22, 21, 20, 23,
        ];
        assert_eq!(out.layout(), PixelLayout::Rgba8TopDown);
        assert_eq!(out.pixels(), expected.as_slice());
    }

    #[test]
    fn test_mirror_reverses_columns() {
        let raw = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let input = FrameBuffer::new(2, 1, PixelLayout::Bgra8BottomUp, raw).unwrap();
        let out = convert(input, true).unwrap();
        assert_eq!(out.pixels(), &[7, 6, 5, 8, 3, 2, 1, 4]);
    }

    #[test]
    fn test_rejects_converted_input() {
        let input = FrameBuffer::zeroed(2, 2, PixelLayout::Rgba8TopDown);
        assert_eq!(
            convert(input, false).unwrap_err(),
            FrameError::UnsupportedFormat(PixelLayout::Rgba8TopDown)
        );
    }

    #[test]
    fn test_new_checks_length() {
        let err = FrameBuffer::new(2, 2, PixelLayout::Bgra8BottomUp, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_empty_frame() {
        let input = FrameBuffer::zeroed(0, 3, PixelLayout::Bgra8BottomUp);
        let out = convert(input, true).unwrap();
        assert!(out.pixels().is_empty());
    }

    #[test]
    fn test_convert_into_reuses_matching_buffer() {
        let input = pattern(4, 3);
        let mut out = FrameBuffer::zeroed(4, 3, PixelLayout::Rgba8TopDown);
        let ptr = out.pixels().as_ptr();
        convert_into(&input, false, &mut out).unwrap();
        assert_eq!(out.pixels().as_ptr(), ptr);
        assert_eq!(out, convert(input.clone(), false).unwrap());

        let mut small = FrameBuffer::zeroed(1, 1, PixelLayout::Rgba8TopDown);
        convert_into(&input, false, &mut small).unwrap();
        assert_eq!((small.width(), small.height()), (4, 3));
        assert_eq!(small.pixels().len(), 48);
    }

    #[test]
    fn test_grayscale() {
        let mut frame =
            FrameBuffer::new(1, 1, PixelLayout::Rgba8TopDown, vec![100, 200, 40, 7]).unwrap();
        Grayscale.process(&mut frame).unwrap();
        // 30 + 118 + 4.4
        assert_eq!(frame.pixels(), &[152, 152, 152, 255]);

        let mut raw = FrameBuffer::zeroed(1, 1, PixelLayout::Bgra8BottomUp);
        assert!(Grayscale.process(&mut raw).is_err());
    }

    proptest! {
        #[test]
        fn prop_convert_geometry(w in 1u32..9, h in 1u32..9, mirror in any::<bool>()) {
            let input = pattern(w, h);
            let out = convert(input.clone(), mirror).unwrap();

            prop_assert_eq!(out.pixels().len(), (w * h * 4) as usize);
            for y in 0..h {
                for x in 0..w {
                    let sx = if mirror { w - 1 - x } else { x };
                    let [b, g, r, a] = input.get_pixel(sx, h - 1 - y).unwrap();
                    prop_assert_eq!(out.get_pixel(x, y).unwrap(), [r, g, b, a]);
                }
            }
        }
    }
}
