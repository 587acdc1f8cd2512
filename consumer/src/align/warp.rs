use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

/// Resample `src` onto a `width`×`height` grid through `h`, which maps source
/// coordinates to output coordinates. Bilinear; positions outside the source
/// are black.
///
/// Returns `None` when `h` is not invertible.
pub fn warp_perspective(src: &RgbImage, h: &Matrix3<f64>, width: u32, height: u32) -> Option<RgbImage> {
    h.try_inverse()?;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    let h = h / scale;
    let mut rows = [0f32; 9];
    for (i, v) in rows.iter_mut().enumerate() {
        *v = h[(i / 3, i % 3)] as f32;
    }
    let projection = Projection::from_matrix(rows)?;

    let mut out = RgbImage::new(width, height);
    warp_into(src, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    Some(out)
}
