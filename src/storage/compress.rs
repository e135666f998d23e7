//! Best-effort thumbnail recompression
//!
//! Re-encodes cached thumbnails as lossless WebP. The result is only used
//! when it is strictly smaller than the input. Animated images and images
//! with more than 8 bits per channel are left alone, since the single-frame
//! 8-bit encoder would lose frames or depth.

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

pub const WEBP_CONTENT_TYPE: &str = "image/webp";

/// Recompression failure. Never surfaced; the original blob is kept instead.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("not an image content type: {0}")]
    NotAnImage(String),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A smaller encoding of the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recompressed {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Re-encode `data` as lossless WebP.
///
/// Returns `Ok(None)` when the re-encoded image is not strictly smaller.
pub fn recompress(data: &[u8], content_type: &str) -> Result<Option<Recompressed>, CompressionError> {
    if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(CompressionError::NotAnImage(content_type.to_string()));
    }

    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    if is_animated(data, reader.format())? {
        return Ok(None);
    }

    let img = reader.decode()?;
    let color = img.color();
    if color.bytes_per_pixel() > color.channel_count() {
        return Ok(None);
    }

    // The WebP encoder only takes 8-bit RGB(A)
    let img = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };

    let mut output = Cursor::new(Vec::new());
    img.write_to(&mut output, ImageFormat::WebP)?;
    let bytes = output.into_inner();

    if bytes.len() < data.len() {
        Ok(Some(Recompressed {
            bytes,
            content_type: WEBP_CONTENT_TYPE,
        }))
    } else {
        Ok(None)
    }
}

fn is_animated(data: &[u8], format: Option<ImageFormat>) -> Result<bool, CompressionError> {
    match format {
        Some(ImageFormat::Gif) => {
            let frames = GifDecoder::new(Cursor::new(data))?.into_frames();
            Ok(frames.take(2).count() > 1)
        }
        Some(ImageFormat::Png) => Ok(PngDecoder::new(Cursor::new(data))?.is_apng()?),
        Some(ImageFormat::WebP) => Ok(WebPDecoder::new(Cursor::new(data))?.has_animation()),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, ImageBuffer, Rgb, RgbImage, Rgba, RgbaImage};

    /// Single-colour PNG
    fn flat_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn rejects_non_image_types() {
        let result = recompress(b"hello", "text/plain");
        assert!(matches!(result, Err(CompressionError::NotAnImage(_))));
    }

    #[test]
    fn garbage_image_is_a_codec_error() {
        let result = recompress(b"definitely not an image", "image/jpeg");
        assert!(result.is_err());
    }

    #[test]
    fn output_is_never_larger_than_input() {
        let png = flat_png(64, 64);
        if let Some(smaller) = recompress(&png, "image/png").unwrap() {
            assert!(smaller.bytes.len() < png.len());
            assert_eq!(smaller.content_type, WEBP_CONTENT_TYPE);
        }
    }

    /// Six-frame GIF with a distinct colour per frame
    fn animated_gif() -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            for i in 0..6u8 {
                let img = RgbaImage::from_pixel(64, 64, Rgba([i * 40, 255 - i * 40, 90, 255]));
                let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    #[test]
    fn animated_gif_is_left_alone() {
        let gif = animated_gif();
        assert_eq!(recompress(&gif, "image/gif").unwrap(), None);
    }

    #[test]
    fn sixteen_bit_png_is_left_alone() {
        let img: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(64, 64, Rgb([40_000, 1_234, 65_535]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb16(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        let png = out.into_inner();

        assert_eq!(recompress(&png, "image/png").unwrap(), None);
    }
}
