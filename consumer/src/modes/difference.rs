use board_inspect_common::config::DifferenceConfig;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, Contour};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::morphology;
use imageproc::point::Point;

use super::{ensure_same_size, ModeError};

/// Fill every changed region of `frame` in the highlight color.
pub fn highlight(
    reference: &RgbImage,
    mut frame: RgbImage,
    config: &DifferenceConfig,
) -> Result<RgbImage, ModeError> {
    let regions = changed_regions(reference, &frame, config)?;
    let color = Rgb(config.highlight);
    for polygon in &regions {
        draw_polygon_mut(&mut frame, polygon, color);
    }
    Ok(frame)
}

/// Outlines of the changed areas at least `min_area` large.
pub fn changed_regions(
    reference: &RgbImage,
    frame: &RgbImage,
    config: &DifferenceConfig,
) -> Result<Vec<Vec<Point<i32>>>, ModeError> {
    ensure_same_size(reference, frame)?;
    let mask = clean_mask(change_mask(reference, frame, config.threshold), config.morph_kernel);

    Ok(find_contours::<i32>(&mask)
        .into_iter()
        .filter(|c| c.parent.is_none())
        .filter_map(polygon)
        .filter(|p| polygon_area(p) >= config.min_area)
        .collect())
}

/// Absolute difference, reduced to intensity and thresholded.
fn change_mask(reference: &RgbImage, frame: &RgbImage, threshold: u8) -> GrayImage {
    let mut diff = RgbImage::new(frame.width(), frame.height());
    for ((d, a), b) in diff.pixels_mut().zip(reference.pixels()).zip(frame.pixels()) {
        for c in 0..3 {
            d[c] = a[c].abs_diff(b[c]);
        }
    }
    let gray = image::imageops::grayscale(&diff);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > threshold { 255 } else { 0 }])
    })
}

/// Open then close with a `side`×`side` square. imageproc takes the L∞
/// radius, so a side of 5 becomes radius 2; sides below 3 leave the mask as is.
fn clean_mask(mask: GrayImage, side: u8) -> GrayImage {
    let radius = side / 2;
    if radius == 0 {
        return mask;
    }
    let opened = morphology::open(&mask, Norm::LInf, radius);
    morphology::close(&opened, Norm::LInf, radius)
}

/// Contour points as a polygon; `None` when too short to enclose an area.
fn polygon(contour: Contour<i32>) -> Option<Vec<Point<i32>>> {
    let mut points = contour.points;
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    (points.len() >= 3).then_some(points)
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    let twice: i64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::test_scene::blocks;

    fn config() -> DifferenceConfig {
        DifferenceConfig::default()
    }

    fn paint(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: [u8; 3]) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Rgb(color));
            }
        }
    }

    #[test]
    fn identical_images_have_no_regions() {
        for seed in 0..4 {
            let img = blocks(160, 120, seed);
            assert!(changed_regions(&img, &img, &config()).unwrap().is_empty());
        }
    }

    #[test]
    fn large_change_is_filled() {
        let reference = RgbImage::from_pixel(100, 80, Rgb([40, 40, 40]));
        let mut frame = reference.clone();
        paint(&mut frame, 30, 20, 30, 30, [240, 240, 240]);

        let regions = changed_regions(&reference, &frame, &config()).unwrap();
        assert_eq!(regions.len(), 1);

        let out = highlight(&reference, frame, &config()).unwrap();
        assert_eq!(out.get_pixel(45, 35).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(5, 5).0, [40, 40, 40]);
    }

    #[test]
    fn small_change_is_ignored() {
        let reference = RgbImage::from_pixel(100, 80, Rgb([40, 40, 40]));
        let mut frame = reference.clone();
        paint(&mut frame, 10, 10, 5, 5, [240, 240, 240]);
        let out = highlight(&reference, frame.clone(), &config()).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn faint_change_stays_below_threshold() {
        let reference = RgbImage::from_pixel(60, 60, Rgb([100, 100, 100]));
        let frame = RgbImage::from_pixel(60, 60, Rgb([130, 130, 130]));
        assert!(changed_regions(&reference, &frame, &config()).unwrap().is_empty());
    }

    #[test]
    fn morphology_removes_speckle() {
        let reference = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let mut frame = reference.clone();
        paint(&mut frame, 20, 20, 40, 40, [255, 255, 255]);
        // One-pixel bridge to a distant speck.
        paint(&mut frame, 60, 39, 30, 1, [255, 255, 255]);
        let cfg = DifferenceConfig {
            morph_kernel: 3,
            ..config()
        };
        let regions = changed_regions(&reference, &frame, &cfg).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].iter().all(|p| p.x < 62));
    }

    #[test]
    fn kernel_side_sets_the_smallest_surviving_square() {
        let mut mask = GrayImage::new(60, 30);
        for (x0, side) in [(5u32, 4u32), (30, 5)] {
            for y in 10..10 + side {
                for x in x0..x0 + side {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let lit = |m: &GrayImage, x0: u32, x1: u32| (x0..x1).any(|x| (0..30).any(|y| m.get_pixel(x, y)[0] > 0));

        let three = clean_mask(mask.clone(), 3);
        assert!(lit(&three, 0, 20) && lit(&three, 25, 60));

        let five = clean_mask(mask.clone(), 5);
        assert!(!lit(&five, 0, 20), "4x4 square should not survive a 5x5 opening");
        assert!(lit(&five, 25, 60));
        assert_eq!(five.get_pixel(32, 12)[0], 255);

        assert_eq!(clean_mask(mask.clone(), 1), mask);
        assert_eq!(clean_mask(mask.clone(), 0), mask);
    }

    #[test]
    fn square_area() {
        let square = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
    }
}
