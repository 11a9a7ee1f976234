/// Image encoding for sample previews.
///
/// Sample inputs are normalized grayscale pixels in [0, 1], row-major.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageOutputFormat};

/// Encodes a `width × height` grayscale sample as PNG bytes.
pub fn grayscale_png(pixels: &[f64], width: u32, height: u32) -> Result<Vec<u8>, String> {
    let bytes: Vec<u8> = pixels
        .iter()
        .map(|&p| (p.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    let img = GrayImage::from_raw(width, height, bytes).ok_or_else(|| {
        format!("{} pixels do not fill a {}x{} image", pixels.len(), width, height)
    })?;

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(out.into_inner())
}
