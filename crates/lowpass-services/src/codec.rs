//! Image codec adapter — encoded bytes to `PixelBuffer` and back.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use lowpass_core::config::OutputFormat;
use lowpass_core::{ChannelLayout, PixelBuffer, PixelError};

/// Decode any supported format. Images with alpha come back as `Rgba8`,
/// everything else as `Rgb8`.
pub fn decode_image(bytes: &[u8]) -> Result<PixelBuffer, CodecError> {
    let image = image::load_from_memory(bytes)?;
    let buffer = if image.color().has_alpha() {
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        PixelBuffer::packed(width, height, ChannelLayout::Rgba8, rgba.into_raw())?
    } else {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        PixelBuffer::packed(width, height, ChannelLayout::Rgb8, rgb.into_raw())?
    };
    Ok(buffer)
}

/// Encode a buffer of any layout. JPEG output drops alpha.
pub fn encode_image(buffer: &PixelBuffer, format: OutputFormat) -> Result<Bytes, CodecError> {
    let (width, height) = (buffer.width(), buffer.height());
    let raw = rgb_order(buffer);

    let image = if buffer.layout().has_alpha() {
        RgbaImage::from_raw(width, height, raw)
            .map(DynamicImage::ImageRgba8)
            .ok_or(CodecError::BufferMismatch)?
    } else {
        RgbImage::from_raw(width, height, raw)
            .map(DynamicImage::ImageRgb8)
            .ok_or(CodecError::BufferMismatch)?
    };

    let (image, format) = match format {
        OutputFormat::Png => (image, ImageFormat::Png),
        OutputFormat::Jpeg => (DynamicImage::ImageRgb8(image.to_rgb8()), ImageFormat::Jpeg),
    };

    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(Bytes::from(out.into_inner()))
}

/// Packed bytes in R,G,B(,A) order, whatever the source layout.
fn rgb_order(buffer: &PixelBuffer) -> Vec<u8> {
    let mut packed = buffer.to_packed().into_data();
    if buffer.layout().is_bgr() {
        for px in packed.chunks_exact_mut(buffer.bytes_per_pixel()) {
            px.swap(0, 2);
        }
    }
    packed
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("image codec failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("decoded image is not a valid pixel buffer: {0}")]
    Pixel(#[from] PixelError),

    #[error("pixel buffer does not match its declared dimensions")]
    BufferMismatch,
}
