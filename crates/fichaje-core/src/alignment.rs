//! Face cropping and alignment to the canonical 112×112 embedding input.
//!
//! Alignment is aspect-fit-and-pad of the detector crop. Landmarks are
//! computed alongside but do not drive a similarity warp.

use crate::preprocess;
use crate::types::BoundingBox;
use image::{imageops, ImageFormat, RgbImage};
use std::io::Cursor;

pub const ALIGNED_SIZE: u32 = 112;

/// A face resized and padded to `ALIGNED_SIZE × ALIGNED_SIZE`.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub image: RgbImage,
}

impl AlignedFace {
    /// Encode as PNG, the format aligned faces are handed around and stored in.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Crop `face` (original-image coordinates) out of `image`.
///
/// The region is clamped to the image bounds and is never smaller than 1×1.
pub fn crop_face(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    let (iw, ih) = image.dimensions();

    let x1 = (face.x1.floor().max(0.0) as u32).min(iw.saturating_sub(1));
    let y1 = (face.y1.floor().max(0.0) as u32).min(ih.saturating_sub(1));
    let x2 = (face.x2.floor().max(0.0) as u32).min(iw);
    let y2 = (face.y2.floor().max(0.0) as u32).min(ih);

    let w = x2.saturating_sub(x1).max(1);
    let h = y2.saturating_sub(y1).max(1);

    imageops::crop_imm(image, x1, y1, w, h).to_image()
}

/// Fit a face crop into a black-padded 112×112 canvas, preserving aspect ratio.
pub fn align_face(crop: &RgbImage) -> AlignedFace {
    let (image, _) = preprocess::letterbox_image(crop, ALIGNED_SIZE, ALIGNED_SIZE);
    AlignedFace { image }
}
