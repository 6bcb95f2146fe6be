//! Raw, strided pixel storage.
//!
//! A `PixelBuffer` is what the codec produces and what the convolution
//! engine consumes. Row `y` starts at `y * stride`; the first
//! `width * bytes_per_pixel` bytes of the row are pixels, anything after
//! that up to the next row is padding and carries no meaning.

use serde::{Deserialize, Serialize};

/// Byte order of the channels inside one pixel.
///
/// Every layout stores three 8-bit color channels first. Layouts with alpha
/// store it as the fourth byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Bgr8,
    Bgra8,
    Rgb8,
    Rgba8,
}

impl ChannelLayout {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ChannelLayout::Bgr8 | ChannelLayout::Rgb8 => 3,
            ChannelLayout::Bgra8 | ChannelLayout::Rgba8 => 4,
        }
    }

    pub const fn has_alpha(self) -> bool {
        matches!(self, ChannelLayout::Bgra8 | ChannelLayout::Rgba8)
    }

    /// True when the first channel is blue.
    pub const fn is_bgr(self) -> bool {
        matches!(self, ChannelLayout::Bgr8 | ChannelLayout::Bgra8)
    }
}

/// Number of color (non-alpha) channels in every layout.
pub const COLOR_CHANNELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    layout: ChannelLayout,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap existing bytes, validating dimensions against stride and length.
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        layout: ChannelLayout,
        data: Vec<u8>,
    ) -> Result<Self, PixelError> {
        if width == 0 || height == 0 {
            return Err(PixelError::InvalidDimensions { width, height });
        }
        let row_bytes = (width as usize)
            .checked_mul(layout.bytes_per_pixel())
            .ok_or(PixelError::InvalidDimensions { width, height })?;
        if stride < row_bytes {
            return Err(PixelError::StrideTooSmall { stride, row_bytes });
        }
        let required = (height as usize - 1)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or(PixelError::InvalidDimensions { width, height })?;
        if data.len() < required {
            return Err(PixelError::InsufficientData {
                len: data.len(),
                required,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            layout,
            data,
        })
    }

    /// Wrap tightly packed bytes (stride == width * bpp).
    pub fn packed(
        width: u32,
        height: u32,
        layout: ChannelLayout,
        data: Vec<u8>,
    ) -> Result<Self, PixelError> {
        let stride = width as usize * layout.bytes_per_pixel();
        Self::new(width, height, stride, layout, data)
    }

    /// A buffer where every pixel has the same bytes.
    pub fn filled(
        width: u32,
        height: u32,
        layout: ChannelLayout,
        pixel: &[u8],
    ) -> Result<Self, PixelError> {
        let bpp = layout.bytes_per_pixel();
        if pixel.len() != bpp {
            return Err(PixelError::InsufficientData {
                len: pixel.len(),
                required: bpp,
            });
        }
        let data = pixel.repeat(width as usize * height as usize);
        Self::packed(width, height, layout, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.bytes_per_pixel()
    }

    /// All bytes, padding included.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Pixel bytes of row `y`, without padding.
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.bytes_per_pixel()]
    }

    /// Bytes of pixel `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate is outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        assert!(x < self.width, "column {x} out of bounds (width {})", self.width);
        let bpp = self.bytes_per_pixel();
        let start = x as usize * bpp;
        &self.row(y)[start..start + bpp]
    }

    /// Mutable bytes of row `y`, without padding.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y as usize * self.stride;
        let len = self.width as usize * self.bytes_per_pixel();
        &mut self.data[start..start + len]
    }

    /// Copy of this buffer with padding removed.
    pub fn to_packed(&self) -> PixelBuffer {
        let row_bytes = self.width as usize * self.bytes_per_pixel();
        let mut data = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            data.extend_from_slice(self.row(y));
        }
        PixelBuffer {
            width: self.width,
            height: self.height,
            stride: row_bytes,
            layout: self.layout,
            data,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PixelError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("stride {stride} is smaller than the {row_bytes}-byte row")]
    StrideTooSmall { stride: usize, row_bytes: usize },

    #[error("buffer holds {len} bytes, {required} required")]
    InsufficientData { len: usize, required: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_rows_skip_padding() {
        // 2x2 RGB with 2 bytes of padding per row.
        let data = vec![
            1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
            7, 8, 9, 10, 11, 12, 0xEE, 0xEE,
        ];
        let buf = PixelBuffer::new(2, 2, 8, ChannelLayout::Rgb8, data).unwrap();
        assert_eq!(buf.row(1), &[7, 8, 9, 10, 11, 12]);
        assert_eq!(buf.pixel(1, 0), &[4, 5, 6]);

        let packed = buf.to_packed();
        assert_eq!(packed.stride(), 6);
        assert_eq!(packed.data().len(), 12);
        assert_eq!(packed.pixel(0, 1), &[7, 8, 9]);
    }

    #[test]
    fn last_row_may_omit_padding() {
        let data = vec![0u8; 8 + 6];
        assert!(PixelBuffer::new(2, 2, 8, ChannelLayout::Rgb8, data).is_ok());
    }

    #[test]
    fn rejects_short_stride_and_data() {
        let err = PixelBuffer::new(4, 1, 8, ChannelLayout::Bgra8, vec![0; 16]).unwrap_err();
        assert_eq!(err, PixelError::StrideTooSmall { stride: 8, row_bytes: 16 });

        let err = PixelBuffer::packed(2, 2, ChannelLayout::Rgb8, vec![0; 11]).unwrap_err();
        assert_eq!(err, PixelError::InsufficientData { len: 11, required: 12 });

        let err = PixelBuffer::packed(0, 2, ChannelLayout::Rgb8, vec![]).unwrap_err();
        assert!(matches!(err, PixelError::InvalidDimensions { .. }));
    }

    #[test]
    fn layout_properties() {
        assert_eq!(ChannelLayout::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(ChannelLayout::Rgb8.bytes_per_pixel(), 3);
        assert!(ChannelLayout::Rgba8.has_alpha());
        assert!(!ChannelLayout::Bgr8.has_alpha());
        assert!(ChannelLayout::Bgr8.is_bgr());
    }
}
