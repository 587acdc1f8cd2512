pub mod homography;
pub mod matcher;
pub mod orb;
pub mod warp;

#[cfg(test)]
pub(crate) mod test_scene;

use board_inspect_common::config::AlignmentConfig;
use board_inspect_common::frame::Frame;
use image::{imageops, RgbImage};
use nalgebra::Matrix3;
use tracing::debug;

use homography::{fit_ransac, HomographyError, RansacConfig, MIN_POINTS};
use matcher::{cross_checked, limit_matches};
use orb::{Features, OrbDetector};

#[derive(Debug, thiserror::Error)]
pub enum AlignmentError {
    #[error("too few keypoints: reference {reference}, frame {frame}")]
    TooFewKeypoints { reference: usize, frame: usize },
    #[error("too few matches: need {needed}, got {got}")]
    TooFewMatches { needed: usize, got: usize },
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error("estimated transform cannot be applied")]
    Degenerate,
}

/// A transform mapping frame coordinates to reference coordinates.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub homography: Matrix3<f64>,
    pub matches: usize,
    pub inliers: usize,
}

/// Reference features keyed by the frame they came from.
struct CachedReference {
    seq: u64,
    dims: (u32, u32),
    features: Features,
}

/// Detects, matches and warps. Reference features are computed once per
/// reference and reused while it stays the same.
pub struct AlignmentEngine {
    detector: OrbDetector,
    ransac: RansacConfig,
    match_limit: Option<usize>,
    cached: Option<CachedReference>,
}

impl AlignmentEngine {
    pub fn new(config: &AlignmentConfig) -> Self {
        Self {
            detector: OrbDetector::new(config),
            ransac: RansacConfig {
                max_iters: config.ransac_max_iters,
                inlier_threshold: config.ransac_reproj_threshold,
                confidence: config.ransac_confidence,
                min_inliers: config.min_inliers,
                seed: config.seed,
            },
            match_limit: config.match_limit,
            cached: None,
        }
    }

    fn reference_features(&mut self, reference: &Frame) -> &Features {
        let stale = self
            .cached
            .as_ref()
            .map_or(true, |c| c.seq != reference.seq || c.dims != reference.dimensions());
        if stale {
            self.cached = None;
        }
        let detector = &self.detector;
        &self
            .cached
            .get_or_insert_with(|| CachedReference {
                seq: reference.seq,
                dims: reference.dimensions(),
                features: detector.detect(&imageops::grayscale(&reference.image)),
            })
            .features
    }

    /// Estimate the frame→reference homography.
    pub fn estimate(&mut self, reference: &Frame, frame: &RgbImage) -> Result<Alignment, AlignmentError> {
        let frame_features = self.detector.detect(&imageops::grayscale(frame));
        let match_limit = self.match_limit;
        let ransac = self.ransac.clone();
        let ref_features = self.reference_features(reference);

        if ref_features.len() < MIN_POINTS || frame_features.len() < MIN_POINTS {
            return Err(AlignmentError::TooFewKeypoints {
                reference: ref_features.len(),
                frame: frame_features.len(),
            });
        }

        let matches = limit_matches(
            cross_checked(&frame_features.descriptors, &ref_features.descriptors),
            match_limit,
        );
        if matches.len() < MIN_POINTS {
            return Err(AlignmentError::TooFewMatches {
                needed: MIN_POINTS,
                got: matches.len(),
            });
        }

        let (src, dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = matches
            .iter()
            .map(|m| {
                let f = &frame_features.keypoints[m.query];
                let r = &ref_features.keypoints[m.train];
                ([f.x as f64, f.y as f64], [r.x as f64, r.y as f64])
            })
            .unzip();

        let fit = fit_ransac(&src, &dst, &ransac)?;
        Ok(Alignment {
            homography: fit.h,
            matches: matches.len(),
            inliers: fit.n_inliers,
        })
    }

    /// Warp `frame` into the reference's exact dimensions.
    pub fn align(&mut self, reference: &Frame, frame: &RgbImage) -> Result<RgbImage, AlignmentError> {
        let alignment = self.estimate(reference, frame)?;
        debug!(
            matches = alignment.matches,
            inliers = alignment.inliers,
            "homography estimated"
        );
        let (w, h) = reference.dimensions();
        warp::warp_perspective(frame, &alignment.homography, w, h).ok_or(AlignmentError::Degenerate)
    }
}
