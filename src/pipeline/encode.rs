//! Capture validation: engine bytes → PNG of exactly the canvas size.
//!
//! Engines are expected to return a canvas-sized PNG already. Anything else
//! (a HiDPI capture, a short clip, another format) is decoded, cropped or
//! padded with white from the top-left corner, and re-encoded, so every page
//! leaving the pipeline is exactly 1080×1440.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use tracing::debug;

use super::CanvasGeometry;

/// Decode `bytes` and return a PNG of exactly `canvas.width × canvas.height`.
///
/// Returns the input unchanged when it already is such a PNG.
pub fn normalise_capture(bytes: &[u8], canvas: &CanvasGeometry) -> Result<Vec<u8>, image::ImageError> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();

    if format == ImageFormat::Png && w == canvas.width && h == canvas.height {
        return Ok(bytes.to_vec());
    }

    debug!(
        from_w = w,
        from_h = h,
        ?format,
        "Normalising capture to {}x{}",
        canvas.width,
        canvas.height
    );
    let fitted = fit_to_canvas(img, canvas);
    encode_png(&fitted)
}

/// Crop or pad `img` to the canvas, anchored at the top-left corner.
fn fit_to_canvas(img: DynamicImage, canvas: &CanvasGeometry) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w == canvas.width && h == canvas.height {
        return img;
    }
    let mut out = RgbaImage::from_pixel(canvas.width, canvas.height, Rgba([255, 255, 255, 255]));
    image::imageops::replace(&mut out, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(out)
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Width and height of an encoded image.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    Ok(image::load_from_memory(bytes)?.dimensions())
}
