//! Image decoding, grayscale conversion and re-encoding.
//!
//! Raw bytes in, an RGBA canvas out; the detector reads a grayscale
//! copy of that canvas and the blur writes back into it.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

use crate::types::{GrayImage, OutputFormat, PipelineError, RgbaImage};

/// Rec. 709 luma weights, scaled by 10 000.
const LUMA_R: u32 = 2126;
const LUMA_G: u32 = 7152;
const LUMA_B: u32 = 722;
const LUMA_SCALE: u32 = 10_000;

/// Decode raw image bytes into an RGBA canvas.
///
/// Supports whatever formats the `image` crate was built with (PNG and
/// JPEG in this workspace).
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}

/// Luma of every pixel: `0.2126 R + 0.7152 G + 0.0722 B`, rounded.
///
/// Alpha is ignored.
#[must_use = "returns the grayscale image"]
pub fn to_grayscale(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        let weighted = u32::from(r) * LUMA_R + u32::from(g) * LUMA_G + u32::from(b) * LUMA_B;
        let luma = (weighted + LUMA_SCALE / 2) / LUMA_SCALE;
        image::Luma([u8::try_from(luma).unwrap_or(u8::MAX)])
    })
}

/// Encode the canvas as PNG, or as JPEG at `jpeg_quality` (alpha dropped).
///
/// # Errors
///
/// Returns [`PipelineError::ImageEncode`] if the encoder fails.
pub fn encode(
    image: &RgbaImage,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Png => PngEncoder::new(&mut buf).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        ),
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )
        }
    };
    result.map_err(|e| PipelineError::ImageEncode(e.to_string()))?;
    Ok(buf)
}
