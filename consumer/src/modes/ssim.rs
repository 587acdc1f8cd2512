use image::imageops::{self, FilterType};
use image::RgbImage;
use image_compare::Algorithm;

use super::{ensure_same_size, ModeError};

/// Per-pixel structural similarity between the grayscale images, scaled to
/// 0..=255 and replicated across the three channels.
pub fn ssim_map(reference: &RgbImage, frame: &RgbImage) -> Result<RgbImage, ModeError> {
    ensure_same_size(reference, frame)?;
    let result = image_compare::gray_similarity_structure(
        &Algorithm::MSSIMSimple,
        &imageops::grayscale(reference),
        &imageops::grayscale(frame),
    )
    .map_err(|e| ModeError::Similarity(format!("{e:?}")))?;

    let map = result.image.to_color_map().to_rgb8();
    if map.dimensions() == frame.dimensions() {
        Ok(map)
    } else {
        Ok(imageops::resize(&map, frame.width(), frame.height(), FilterType::Nearest))
    }
}
