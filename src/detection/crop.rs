use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::geometry::{PERCENT_EXTENT, PercentRect};

/// Context added around a crop: the larger of a fraction of the crop size
/// and a fixed pixel minimum, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddingPolicy {
    pub fraction: f64,
    pub min_px: u32,
}

impl Default for PaddingPolicy {
    fn default() -> Self {
        Self {
            fraction: 0.2,
            min_px: 20,
        }
    }
}

/// Pixel window cut out of the page raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Maps a percentage rectangle onto an image of `width`x`height`, pads it and
/// clamps it to the image. `None` when nothing of the rectangle is on the image.
pub fn crop_window(
    width: u32,
    height: u32,
    rect: PercentRect,
    padding: &PaddingPolicy,
) -> Option<CropWindow> {
    if width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (width as f64, height as f64);
    let x0 = rect.x / PERCENT_EXTENT * w;
    let y0 = rect.y / PERCENT_EXTENT * h;
    let x1 = (rect.x + rect.width) / PERCENT_EXTENT * w;
    let y1 = (rect.y + rect.height) / PERCENT_EXTENT * h;
    if ![x0, y0, x1, y1].iter().all(|value| value.is_finite()) {
        return None;
    }

    let pad_x = ((x1 - x0).abs() * padding.fraction).max(padding.min_px as f64);
    let pad_y = ((y1 - y0).abs() * padding.fraction).max(padding.min_px as f64);

    let left = (x0.min(x1) - pad_x).max(0.0).floor();
    let top = (y0.min(y1) - pad_y).max(0.0).floor();
    let right = (x0.max(x1) + pad_x).min(w).ceil();
    let bottom = (y0.max(y1) + pad_y).min(h).ceil();
    if right <= left || bottom <= top {
        return None;
    }
    Some(CropWindow {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

pub(crate) fn crop(image: &DynamicImage, window: CropWindow) -> DynamicImage {
    image.crop_imm(window.x, window.y, window.width, window.height)
}

/// PNG-encodes an image for a JSON request body.
pub(crate) fn encode_png_base64(image: &DynamicImage) -> Result<String, image::ImageError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(BASE64.encode(bytes))
}
