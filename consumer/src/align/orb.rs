use board_inspect_common::config::AlignmentConfig;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::OnceLock;

/// Bytes in one binary descriptor.
pub const DESCRIPTOR_BYTES: usize = 32;
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

/// Radius of the orientation disc.
const HALF_PATCH: i32 = 15;
/// Test-pair coordinates are drawn from [-PATTERN_REACH, PATTERN_REACH].
const PATTERN_REACH: i32 = 13;
/// Keypoints closer than this to a level's edge are dropped; covers a
/// rotated test pair (13·√2) and the orientation disc.
const BORDER: u32 = 20;
const PATTERN_SEED: u64 = 0x0b5e_55ed_b1ef;
const DESCRIPTOR_SIGMA: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Position in full-resolution pixel coordinates.
    pub x: f32,
    pub y: f32,
    pub level: u32,
    /// Radians, from the intensity centroid.
    pub angle: f32,
    pub score: f32,
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }
}

/// Oriented FAST corners over a scale pyramid, each with a steered BRIEF
/// descriptor.
#[derive(Debug, Clone)]
pub struct OrbDetector {
    max_features: usize,
    levels: u32,
    scale_factor: f32,
    fast_threshold: u8,
}

impl OrbDetector {
    pub fn new(config: &AlignmentConfig) -> Self {
        Self {
            max_features: config.max_features,
            levels: config.pyramid_levels.max(1),
            scale_factor: config.scale_factor,
            fast_threshold: config.fast_threshold,
        }
    }

    pub fn detect(&self, gray: &GrayImage) -> Features {
        let pyramid = self.pyramid(gray);
        let quotas = self.level_quotas(pyramid.len());
        let mut features = Features::default();

        for (level, (img, quota)) in pyramid.iter().zip(quotas).enumerate() {
            if quota == 0 {
                continue;
            }
            let scale = self.scale_factor.powi(level as i32);
            let corners = strongest_corners(img, self.fast_threshold, quota);
            if corners.is_empty() {
                continue;
            }
            let smoothed = imageproc::filter::gaussian_blur_f32(img, DESCRIPTOR_SIGMA);
            for c in corners {
                let angle = intensity_centroid_angle(img, c.x as i32, c.y as i32);
                features.descriptors.push(describe(&smoothed, c.x as i32, c.y as i32, angle));
                features.keypoints.push(Keypoint {
                    x: c.x as f32 * scale,
                    y: c.y as f32 * scale,
                    level: level as u32,
                    angle,
                    score: c.score,
                });
            }
        }
        features
    }

    fn pyramid(&self, gray: &GrayImage) -> Vec<GrayImage> {
        let min_side = 2 * BORDER + 1;
        let mut levels = vec![gray.clone()];
        for level in 1..self.levels {
            let s = self.scale_factor.powi(level as i32);
            let w = (gray.width() as f32 / s).round() as u32;
            let h = (gray.height() as f32 / s).round() as u32;
            if w < min_side || h < min_side {
                break;
            }
            levels.push(imageops::resize(gray, w, h, FilterType::Triangle));
        }
        levels
    }

    /// Split `max_features` across levels in proportion to level area.
    fn level_quotas(&self, n_levels: usize) -> Vec<usize> {
        let factor = 1.0 / self.scale_factor as f64;
        let mut per_level = self.max_features as f64 * (1.0 - factor)
            / (1.0 - factor.powi(n_levels as i32));
        let mut quotas = Vec::with_capacity(n_levels);
        let mut assigned = 0usize;
        for _ in 0..n_levels.saturating_sub(1) {
            let q = per_level.round() as usize;
            quotas.push(q);
            assigned += q;
            per_level *= factor;
        }
        quotas.push(self.max_features.saturating_sub(assigned));
        quotas
    }
}

/// FAST-9 corners away from the border, 3×3 non-max suppressed, best first.
fn strongest_corners(img: &GrayImage, threshold: u8, limit: usize) -> Vec<Corner> {
    let (w, h) = img.dimensions();
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }
    let corners: Vec<Corner> = corners_fast9(img, threshold)
        .into_iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x < w - BORDER && c.y < h - BORDER)
        .collect();

    let mut scores = vec![0f32; (w * h) as usize];
    for c in &corners {
        scores[(c.y * w + c.x) as usize] = c.score;
    }
    let mut kept: Vec<Corner> = corners
        .into_iter()
        .filter(|c| {
            let mut is_max = true;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (c.x as i32 + dx) as u32;
                    let ny = (c.y as i32 + dy) as u32;
                    if scores[(ny * w + nx) as usize] > c.score {
                        is_max = false;
                    }
                }
            }
            is_max
        })
        .collect();

    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(limit);
    kept
}

fn intensity_centroid_angle(img: &GrayImage, cx: i32, cy: i32) -> f32 {
    let mut m01 = 0f64;
    let mut m10 = 0f64;
    let r2 = HALF_PATCH * HALF_PATCH;
    for v in -HALF_PATCH..=HALF_PATCH {
        for u in -HALF_PATCH..=HALF_PATCH {
            if u * u + v * v > r2 {
                continue;
            }
            let i = img.get_pixel((cx + u) as u32, (cy + v) as u32)[0] as f64;
            m10 += u as f64 * i;
            m01 += v as f64 * i;
        }
    }
    m01.atan2(m10) as f32
}

fn describe(smoothed: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |x: i32, y: i32| -> u8 {
        let rx = (cos * x as f32 - sin * y as f32).round() as i32;
        let ry = (sin * x as f32 + cos * y as f32).round() as i32;
        smoothed.get_pixel((cx + rx) as u32, (cy + ry) as u32)[0]
    };

    let mut desc = [0u8; DESCRIPTOR_BYTES];
    for (bit, pair) in test_pattern().iter().enumerate() {
        if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
            desc[bit / 8] |= 1 << (bit % 8);
        }
    }
    desc
}

/// Fixed set of 256 intensity test pairs `[x1, y1, x2, y2]`.
fn test_pattern() -> &'static [[i32; 4]] {
    static PATTERN: OnceLock<Vec<[i32; 4]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut pairs = Vec::with_capacity(DESCRIPTOR_BYTES * 8);
        while pairs.len() < DESCRIPTOR_BYTES * 8 {
            let p = [
                rng.gen_range(-PATTERN_REACH..=PATTERN_REACH),
                rng.gen_range(-PATTERN_REACH..=PATTERN_REACH),
                rng.gen_range(-PATTERN_REACH..=PATTERN_REACH),
                rng.gen_range(-PATTERN_REACH..=PATTERN_REACH),
            ];
            if (p[0], p[1]) != (p[2], p[3]) {
                pairs.push(p);
            }
        }
        pairs
    })
}
