use image::RgbImage;

use super::{ensure_same_size, ModeError};

/// Equal-weight blend of reference and frame, rounded half up.
pub fn overlay(reference: &RgbImage, frame: &RgbImage) -> Result<RgbImage, ModeError> {
    ensure_same_size(reference, frame)?;
    let mut out = RgbImage::new(frame.width(), frame.height());
    for ((o, a), b) in out.pixels_mut().zip(reference.pixels()).zip(frame.pixels()) {
        for c in 0..3 {
            o[c] = ((a[c] as u16 + b[c] as u16 + 1) / 2) as u8;
        }
    }
    Ok(out)
}
