//! Tensor preprocessing: aspect-preserving letterbox resize, NCHW conversion
//! and the inverse mapping from tensor space back to the original image.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use ndarray::Array4;
use thiserror::Error;

/// InsightFace input normalization: `(pixel - MEAN) / STD`.
pub const PIXEL_MEAN: f32 = 127.5;
pub const PIXEL_STD: f32 = 128.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    EmptyImage,
}

/// Decode an encoded image buffer (JPEG, PNG, ...) into RGB8.
///
/// Never substitutes a blank image: undecodable input is an error.
/// Transparent pixels are composited onto black.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    let rgb = match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other if other.color().has_alpha() => over_black(&other.to_rgba8()),
        other => other.to_rgb8(),
    };
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(PreprocessError::EmptyImage);
    }
    Ok(rgb)
}

fn over_black(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Metadata for coordinate de-mapping after letterbox resize.
///
/// `orig = (tensor - pad) * scale_back`, clamped to `[0, orig_dim]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale_back: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl Letterbox {
    /// Compute the letterbox geometry for fitting `(width, height)` into `(target_w, target_h)`.
    ///
    /// Returns the geometry together with the resized content size.
    pub fn fit(width: u32, height: u32, target_w: u32, target_h: u32) -> (Self, u32, u32) {
        let r = (target_w as f32 / width as f32).min(target_h as f32 / height as f32);
        let new_w = ((width as f32 * r).round() as u32).clamp(1, target_w);
        let new_h = ((height as f32 * r).round() as u32).clamp(1, target_h);

        let letterbox = Self {
            scale_back: 1.0 / r,
            pad_x: (target_w - new_w) / 2,
            pad_y: (target_h - new_h) / 2,
            original_width: width,
            original_height: height,
        };
        (letterbox, new_w, new_h)
    }

    pub fn x_to_original(&self, x: f32) -> f32 {
        ((x - self.pad_x as f32) * self.scale_back).clamp(0.0, self.original_width as f32)
    }

    pub fn y_to_original(&self, y: f32) -> f32 {
        ((y - self.pad_y as f32) * self.scale_back).clamp(0.0, self.original_height as f32)
    }

    /// Map a tensor-space box into original-image space, clamped to the image.
    pub fn box_to_original(&self, b: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x_to_original(b.x1),
            y1: self.y_to_original(b.y1),
            x2: self.x_to_original(b.x2),
            y2: self.y_to_original(b.y2),
            confidence: b.confidence,
        }
    }
}

/// Resize `image` preserving aspect ratio and center it on a black
/// `target_w × target_h` canvas.
pub fn letterbox_image(image: &RgbImage, target_w: u32, target_h: u32) -> (RgbImage, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height(), target_w, target_h);

    let resized = if (new_w, new_h) == image.dimensions() {
        image.clone()
    } else {
        imageops::resize(image, new_w, new_h, FilterType::Triangle)
    };

    let mut canvas = RgbImage::new(target_w, target_h);
    imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    (canvas, letterbox)
}

/// Convert an RGB image into a `[1, 3, H, W]` float tensor with InsightFace normalization.
pub fn to_nchw(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let pixel = image.get_pixel(x as u32, y as u32);
        (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD
    })
}

/// Letterbox `image` into `(target_w, target_h)` and convert to a normalized NCHW tensor.
pub fn preprocess(image: &RgbImage, target_w: u32, target_h: u32) -> (Array4<f32>, Letterbox) {
    let (canvas, letterbox) = letterbox_image(image, target_w, target_h);
    (to_nchw(&canvas), letterbox)
}
