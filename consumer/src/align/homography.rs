use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HomographyError {
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
    #[error("insufficient inliers: need {needed}, found {found}")]
    InsufficientInliers { needed: usize, found: usize },
}

/// Minimal sample size for a homography.
pub const MIN_POINTS: usize = 4;

/// Project a 2D point through a 3×3 homography: H * [x, y, 1]^T → [u, v].
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

/// Reprojection error: ||project(H, src) - dst||. NaN projections count as infinite.
pub fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    let p = project(h, src[0], src[1]);
    let err = ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt();
    if err.is_nan() {
        f64::INFINITY
    } else {
        err
    }
}

/// Translate centroid to origin and scale mean distance to √2.
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

/// Direct Linear Transform from ≥4 correspondences, so that dst ≈ project(H, src).
pub fn estimate_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, HomographyError> {
    let n = src.len().min(dst.len());
    if n < MIN_POINTS {
        return Err(HomographyError::TooFewPoints {
            needed: MIN_POINTS,
            got: n,
        });
    }
    if src.len() != dst.len() {
        return Err(HomographyError::NumericalFailure(
            "src and dst must have the same length".into(),
        ));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return Err(HomographyError::NumericalFailure("h33 vanished".into()));
    }
    let h = h / scale;
    if !h.iter().all(|v| v.is_finite()) || h.determinant().abs() < 1e-12 {
        return Err(HomographyError::NumericalFailure("degenerate homography".into()));
    }
    Ok(h)
}

#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub max_iters: usize,
    /// Inlier threshold (reprojection error in pixels).
    pub inlier_threshold: f64,
    /// Stop once this probability of having drawn an all-inlier sample is reached.
    pub confidence: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 3.0,
            confidence: 0.995,
            min_inliers: 8,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult {
    pub h: Matrix3<f64>,
    pub n_inliers: usize,
}

fn inliers(h: &Matrix3<f64>, src: &[[f64; 2]], dst: &[[f64; 2]], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error(h, s, d) < threshold)
        .collect()
}

/// True when any three of the points are (nearly) collinear.
fn has_collinear_triple(pts: &[[f64; 2]]) -> bool {
    let n = pts.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (a, b, c) = (pts[i], pts[j], pts[k]);
                let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                if cross.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

/// Iterations needed to draw one clean minimal sample with `confidence`.
fn required_iterations(inlier_ratio: f64, confidence: f64, cap: usize) -> usize {
    let p_good = inlier_ratio.powi(MIN_POINTS as i32);
    if p_good <= f64::EPSILON {
        return cap;
    }
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    (k.ceil() as usize).clamp(1, cap)
}

/// Fit a homography robust to outlier correspondences.
pub fn fit_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacResult, HomographyError> {
    let n = src.len().min(dst.len());
    if n < MIN_POINTS {
        return Err(HomographyError::TooFewPoints {
            needed: MIN_POINTS,
            got: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut budget = config.max_iters.max(1);
    let mut iter = 0;

    while iter < budget {
        iter += 1;
        let picks = sample(&mut rng, n, MIN_POINTS);
        let s4: Vec<[f64; 2]> = picks.iter().map(|i| src[i]).collect();
        let d4: Vec<[f64; 2]> = picks.iter().map(|i| dst[i]).collect();
        if has_collinear_triple(&s4) || has_collinear_triple(&d4) {
            continue;
        }

        let Ok(h) = estimate_dlt(&s4, &d4) else {
            continue;
        };

        let mask = inliers(&h, &src[..n], &dst[..n], config.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().map_or(true, |b| count > b.2) {
            budget = budget.min(required_iterations(
                count as f64 / n as f64,
                config.confidence,
                config.max_iters.max(1),
            ));
            best = Some((h, mask, count));
        }
    }

    let needed = config.min_inliers.max(MIN_POINTS);
    let (best_h, best_mask, best_count) = match best {
        Some(b) if b.2 >= needed => b,
        other => {
            return Err(HomographyError::InsufficientInliers {
                needed,
                found: other.map_or(0, |b| b.2),
            })
        }
    };

    // Refit using all inliers
    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let refit = estimate_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

    let refit_count = inliers(&refit, &src[..n], &dst[..n], config.inlier_threshold)
        .iter()
        .filter(|&&m| m)
        .count();

    let (h, n_inliers) = if refit_count >= best_count {
        (refit, refit_count)
    } else {
        (best_h, best_count)
    };

    Ok(RansacResult { h, n_inliers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    fn known_h() -> Matrix3<f64> {
        Matrix3::new(
            0.98, -0.08, 14.0, //
            0.07, 1.02, -9.0, //
            1.0e-5, -2.0e-5, 1.0,
        )
    }

    fn grid_points() -> Vec<[f64; 2]> {
        let mut pts = Vec::new();
        for y in 0..6 {
            for x in 0..8 {
                pts.push([20.0 + x as f64 * 35.0, 15.0 + y as f64 * 30.0]);
            }
        }
        pts
    }

    #[test]
    fn dlt_recovers_exact_transform() {
        let h = known_h();
        let src = grid_points();
        let dst: Vec<[f64; 2]> = src.iter().map(|p| project(&h, p[0], p[1])).collect();
        let est = estimate_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = project(&est, s[0], s[1]);
            assert_relative_eq!(p[0], d[0], epsilon = 1e-6);
            assert_relative_eq!(p[1], d[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn dlt_needs_four_points() {
        let pts = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        assert_eq!(
            estimate_dlt(&pts, &pts).unwrap_err(),
            HomographyError::TooFewPoints { needed: 4, got: 3 }
        );
    }

    #[test]
    fn collinear_samples_are_flagged() {
        assert!(has_collinear_triple(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [5.0, 0.0]]));
        assert!(!has_collinear_triple(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]));
    }

    #[test]
    fn ransac_ignores_outliers() {
        let h = known_h();
        let mut src = grid_points();
        let mut dst: Vec<[f64; 2]> = src.iter().map(|p| project(&h, p[0], p[1])).collect();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..15 {
            src.push([rng.gen_range(0.0..300.0), rng.gen_range(0.0..200.0)]);
            dst.push([rng.gen_range(0.0..300.0), rng.gen_range(0.0..200.0)]);
        }

        let result = fit_ransac(&src, &dst, &RansacConfig::default()).unwrap();
        assert!(result.n_inliers >= 48);
        let mask = inliers(&result.h, &src, &dst, RansacConfig::default().inlier_threshold);
        assert!(mask[..48].iter().all(|&m| m));
        let p = project(&result.h, 100.0, 80.0);
        let q = project(&h, 100.0, 80.0);
        assert_relative_eq!(p[0], q[0], epsilon = 0.5);
        assert_relative_eq!(p[1], q[1], epsilon = 0.5);
    }

    #[test]
    fn ransac_fails_on_pure_noise() {
        let mut rng = StdRng::seed_from_u64(11);
        let src: Vec<[f64; 2]> = (0..30)
            .map(|_| [rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0)])
            .collect();
        let dst: Vec<[f64; 2]> = (0..30)
            .map(|_| [rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0)])
            .collect();
        let config = RansacConfig {
            min_inliers: 12,
            ..RansacConfig::default()
        };
        assert!(matches!(
            fit_ransac(&src, &dst, &config),
            Err(HomographyError::InsufficientInliers { .. })
        ));
    }

    #[test]
    fn iteration_budget_shrinks_with_inlier_ratio() {
        assert_eq!(required_iterations(0.0, 0.995, 2000), 2000);
        assert!(required_iterations(0.5, 0.995, 2000) < 100);
        assert_eq!(required_iterations(1.0, 0.995, 2000), 1);
    }
}
