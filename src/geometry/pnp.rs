//! Robust Perspective-n-Point solver.
//!
//! RANSAC over minimal 6-point samples. Hypotheses come from a linear DLT
//! solve, or from refining the caller's extrinsic guess on the sample when
//! one is given. The best hypothesis is refined on its inliers with a
//! pose-only Levenberg-Marquardt loop.
//!
//! The returned pose maps object points into the camera that observed the
//! image points: `u ≈ π(K · (pose · X))`.

use std::fmt;

use nalgebra::{DMatrix, Matrix2x6, Matrix3, Matrix6, Point2, Vector2, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use crate::geometry::SE3;
use crate::tracking::frame::CameraModel;

/// Correspondences drawn per RANSAC hypothesis.
pub const MIN_SAMPLE_SIZE: usize = 6;

/// Iteration cap for the SVDs in the linear solve. Non-finite input never
/// converges.
const MAX_SVD_ITERATIONS: usize = 100;

/// Configuration for the RANSAC PnP solver.
#[derive(Debug, Clone)]
pub struct PnpRansacConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Inlier threshold on reprojection error (pixels).
    pub reprojection_threshold_px: f64,
    /// Stop sampling as soon as a hypothesis reaches this many inliers.
    pub max_inliers: usize,
    /// Levenberg-Marquardt iterations for the final refinement.
    pub refine_iterations: usize,
    /// RNG seed, fixed so identical inputs give identical inlier sets.
    pub seed: u64,
}

impl Default for PnpRansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reprojection_threshold_px: 1.3,
            max_inliers: 100,
            refine_iterations: 10,
            seed: 0x5EED_u64,
        }
    }
}

/// Result of PnP solving.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Transform from the object frame into the camera frame.
    pub pose: SE3,
    /// Inlier mask per correspondence.
    pub inlier_mask: Vec<bool>,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
    /// Reprojection error per correspondence (in pixels).
    pub reproj_errors: Vec<f64>,
    /// RANSAC iterations actually run.
    pub iterations: usize,
}

impl PnPResult {
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PnpError {
    NotEnoughPoints { required: usize, actual: usize },
    LengthMismatch { points3d: usize, points2d: usize },
    /// No hypothesis explained any correspondence.
    Degenerate,
}

impl fmt::Display for PnpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PnpError::NotEnoughPoints { required, actual } => {
                write!(f, "PnP needs at least {required} correspondences, got {actual}")
            }
            PnpError::LengthMismatch { points3d, points2d } => write!(
                f,
                "PnP got {points3d} object points but {points2d} image points"
            ),
            PnpError::Degenerate => write!(f, "PnP found no consistent pose"),
        }
    }
}

impl std::error::Error for PnpError {}

/// Solve PnP with RANSAC given 3D-2D correspondences.
///
/// # Arguments
/// * `points3d` - Object points
/// * `points2d` - Corresponding pixel observations
/// * `camera` - Camera intrinsics
/// * `guess` - Optional initial pose (extrinsic guess)
/// * `config` - RANSAC parameters
pub fn solve_pnp_ransac(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    guess: Option<&SE3>,
    config: &PnpRansacConfig,
) -> Result<PnPResult, PnpError> {
    let n = points3d.len();
    if n != points2d.len() {
        return Err(PnpError::LengthMismatch {
            points3d: n,
            points2d: points2d.len(),
        });
    }
    if n < MIN_SAMPLE_SIZE {
        return Err(PnpError::NotEnoughPoints {
            required: MIN_SAMPLE_SIZE,
            actual: n,
        });
    }

    let threshold = config.reprojection_threshold_px;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(SE3, Vec<usize>)> = None;
    let mut iterations = 0;

    if let Some(guess) = guess {
        let inliers = find_inliers(points3d, points2d, camera, guess, threshold);
        if !inliers.is_empty() {
            best = Some((*guess, inliers));
        }
    }

    while iterations < config.max_iterations {
        if best
            .as_ref()
            .is_some_and(|(_, inliers)| inliers.len() >= config.max_inliers)
        {
            break;
        }
        iterations += 1;

        let sample = index::sample(&mut rng, n, MIN_SAMPLE_SIZE).into_vec();
        let sample_3d: Vec<Vector3<f64>> = sample.iter().map(|&i| points3d[i]).collect();
        let sample_2d: Vec<Point2<f64>> = sample.iter().map(|&i| points2d[i]).collect();

        let hypothesis = match guess {
            Some(guess) => Some(refine_pose(&sample_3d, &sample_2d, camera, guess, 5)),
            None => solve_pnp_dlt(&sample_3d, &sample_2d, camera),
        };
        let Some(pose) = hypothesis else {
            continue;
        };

        let inliers = find_inliers(points3d, points2d, camera, &pose, threshold);
        if inliers.len() > best.as_ref().map_or(0, |(_, b)| b.len()) {
            best = Some((pose, inliers));
        }
    }

    let (mut pose, mut inliers) = best.ok_or(PnpError::Degenerate)?;

    if inliers.len() >= MIN_SAMPLE_SIZE {
        let inlier_3d: Vec<Vector3<f64>> = inliers.iter().map(|&i| points3d[i]).collect();
        let inlier_2d: Vec<Point2<f64>> = inliers.iter().map(|&i| points2d[i]).collect();
        let refined = refine_pose(&inlier_3d, &inlier_2d, camera, &pose, config.refine_iterations);
        let refined_inliers = find_inliers(points3d, points2d, camera, &refined, threshold);
        if refined_inliers.len() >= inliers.len() {
            pose = refined;
            inliers = refined_inliers;
        }
    }

    let reproj_errors: Vec<f64> = points3d
        .iter()
        .zip(points2d.iter())
        .map(|(p3, p2)| reprojection_error(camera, &pose, p3, p2))
        .collect();
    let mut inlier_mask = vec![false; n];
    for &i in &inliers {
        inlier_mask[i] = true;
    }

    Ok(PnPResult {
        pose,
        inlier_mask,
        inliers,
        reproj_errors,
        iterations,
    })
}

/// Pixel distance between an observation and the projected object point.
/// Infinite for points behind the camera.
pub fn reprojection_error(
    camera: &CameraModel,
    pose: &SE3,
    point3d: &Vector3<f64>,
    point2d: &Point2<f64>,
) -> f64 {
    match camera.project(&pose.transform_point(point3d)) {
        Some(uv) => (uv - point2d.coords).norm(),
        None => f64::INFINITY,
    }
}

fn find_inliers(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    pose: &SE3,
    threshold: f64,
) -> Vec<usize> {
    points3d
        .iter()
        .zip(points2d.iter())
        .enumerate()
        .filter(|(_, (p3, p2))| reprojection_error(camera, pose, p3, p2) < threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Linear PnP (DLT) on normalized image coordinates.
///
/// Returns `None` for degenerate configurations (e.g. coplanar samples) and
/// when either SVD fails to converge.
pub fn solve_pnp_dlt(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
) -> Option<SE3> {
    let n = points3d.len();
    if n < MIN_SAMPLE_SIZE || n != points2d.len() {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (obj, pix)) in points3d.iter().zip(points2d.iter()).enumerate() {
        let xn = (pix.x - camera.cx) / camera.fx;
        let yn = (pix.y - camera.cy) / camera.fy;
        let (xw, yw, zw) = (obj.x, obj.y, obj.z);

        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = xw;
        a[(r0, 1)] = yw;
        a[(r0, 2)] = zw;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -xn * xw;
        a[(r0, 9)] = -xn * yw;
        a[(r0, 10)] = -xn * zw;
        a[(r0, 11)] = -xn;

        a[(r1, 4)] = xw;
        a[(r1, 5)] = yw;
        a[(r1, 6)] = zw;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -yn * xw;
        a[(r1, 9)] = -yn * yw;
        a[(r1, 10)] = -yn * zw;
        a[(r1, 11)] = -yn;
    }

    let svd = a.try_svd(false, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
    let vt = svd.v_t?;
    // Null-space direction: right singular vector of the smallest singular value.
    let null_idx = svd.singular_values.argmin().0;
    let p: Vec<f64> = vt.row(null_idx).iter().copied().collect();

    #[rustfmt::skip]
    let m = Matrix3::new(
        p[0], p[1], p[2],
        p[4], p[5], p[6],
        p[8], p[9], p[10],
    );
    let mut t = Vector3::new(p[3], p[7], p[11]);

    let svd_m = m.try_svd(true, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
    let u = svd_m.u?;
    let vt_m = svd_m.v_t?;
    let scale = svd_m.singular_values.sum() / 3.0;
    if scale.abs() < 1e-12 {
        return None;
    }

    let mut r = u * vt_m;
    t /= scale;
    if r.determinant() < 0.0 {
        r = -r;
        t = -t;
    }
    if !(r.iter().all(|v| v.is_finite()) && t.iter().all(|v| v.is_finite())) {
        return None;
    }

    let pose = SE3::from_rt(r, t);
    let in_front = points3d
        .iter()
        .filter(|p| pose.transform_point(p).z > 0.0)
        .count();
    if in_front * 2 < n {
        return None;
    }
    Some(pose)
}

/// Pose-only Levenberg-Marquardt on reprojection error, starting at `initial`.
pub fn refine_pose(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    initial: &SE3,
    max_iterations: usize,
) -> SE3 {
    let mut pose = *initial;
    let mut lambda = 1e-3;
    let mut cost = total_cost(points3d, points2d, camera, &pose);

    for _ in 0..max_iterations {
        let mut h = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();

        for (p3, p2) in points3d.iter().zip(points2d.iter()) {
            let p_cam = pose.transform_point(p3);
            let Some(uv) = camera.project(&p_cam) else {
                continue;
            };
            // Error = observed - projected
            let err: Vector2<f64> = p2.coords - uv;
            let j = jacobian_pose(camera, &p_cam);
            h += j.transpose() * j;
            b -= j.transpose() * err;
        }

        let damped = h + Matrix6::identity() * lambda;
        let Some(delta) = damped.cholesky().map(|c| c.solve(&b)) else {
            lambda *= 10.0;
            continue;
        };

        let candidate = pose.retract(&[delta[0], delta[1], delta[2], delta[3], delta[4], delta[5]]);
        let candidate_cost = total_cost(points3d, points2d, camera, &candidate);
        if candidate_cost < cost {
            let improvement = cost - candidate_cost;
            pose = candidate;
            cost = candidate_cost;
            lambda = (lambda * 0.1).max(1e-10);
            if improvement < 1e-10 || delta.norm() < 1e-12 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
    }

    pose
}

fn total_cost(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    pose: &SE3,
) -> f64 {
    points3d
        .iter()
        .zip(points2d.iter())
        .filter_map(|(p3, p2)| {
            camera
                .project(&pose.transform_point(p3))
                .map(|uv| (p2.coords - uv).norm_squared())
        })
        .sum()
}

/// Jacobian of the reprojection error w.r.t. a left perturbation of the pose,
/// columns `[rot_x, rot_y, rot_z, trans_x, trans_y, trans_z]`.
#[rustfmt::skip]
fn jacobian_pose(camera: &CameraModel, p_cam: &Vector3<f64>) -> Matrix2x6<f64> {
    let x = p_cam.x;
    let y = p_cam.y;
    let z = p_cam.z;

    let invz = 1.0 / z;
    let invz2 = invz * invz;
    let fx = camera.fx;
    let fy = camera.fy;

    Matrix2x6::new(
        x * y * invz2 * fx,
        -(1.0 + x * x * invz2) * fx,
        y * invz * fx,
        -invz * fx,
        0.0,
        x * invz2 * fx,

        (1.0 + y * y * invz2) * fy,
        -x * y * invz2 * fy,
        -x * invz * fy,
        0.0,
        -invz * fy,
        y * invz2 * fy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraModel {
        CameraModel {
            fx: 450.0,
            fy: 450.0,
            cx: 320.0,
            cy: 240.0,
            baseline: 0.12,
        }
    }

    /// Points spread in a box 2-6m in front of the camera.
    fn scene(n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                Vector3::new(
                    ((f * 0.37).sin()) * 1.5,
                    ((f * 0.61).cos()) * 1.0,
                    4.0 + ((f * 0.23).sin()) * 2.0,
                )
            })
            .collect()
    }

    fn true_pose() -> SE3 {
        SE3::from_axis_angle(&Vector3::new(0.02, -0.05, 0.01), Vector3::new(0.1, -0.05, 0.2))
    }

    fn project_all(points: &[Vector3<f64>], pose: &SE3) -> Vec<Point2<f64>> {
        let cam = camera();
        points
            .iter()
            .map(|p| {
                let uv = cam.project(&pose.transform_point(p)).unwrap();
                Point2::new(uv.x, uv.y)
            })
            .collect()
    }

    #[test]
    fn test_dlt_recovers_exact_pose() {
        let pts = scene(12);
        let obs = project_all(&pts, &true_pose());

        let pose = solve_pnp_dlt(&pts, &obs, &camera()).unwrap();
        assert_relative_eq!(pose.translation, true_pose().translation, epsilon = 1e-6);
    }

    #[test]
    fn test_ransac_rejects_outliers() {
        let pts = scene(40);
        let mut obs = project_all(&pts, &true_pose());
        for i in (0..40).step_by(5) {
            obs[i].x += 40.0;
            obs[i].y -= 25.0;
        }

        let result =
            solve_pnp_ransac(&pts, &obs, &camera(), None, &PnpRansacConfig::default()).unwrap();

        assert_eq!(result.num_inliers(), 32);
        for i in (0..40).step_by(5) {
            assert!(!result.inlier_mask[i]);
        }
        assert_relative_eq!(result.pose.translation, true_pose().translation, epsilon = 1e-4);
    }

    #[test]
    fn test_guess_seeds_solution() {
        let pts = scene(20);
        let obs = project_all(&pts, &true_pose());
        let guess = SE3::identity();

        let result =
            solve_pnp_ransac(&pts, &obs, &camera(), Some(&guess), &PnpRansacConfig::default())
                .unwrap();
        assert_eq!(result.num_inliers(), 20);
    }

    #[test]
    fn test_max_inliers_stops_early() {
        let pts = scene(30);
        let obs = project_all(&pts, &true_pose());
        let config = PnpRansacConfig {
            max_inliers: 10,
            ..Default::default()
        };

        let result = solve_pnp_ransac(&pts, &obs, &camera(), None, &config).unwrap();
        assert!(result.iterations < config.max_iterations);
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let pts = scene(30);
        let mut obs = project_all(&pts, &true_pose());
        for i in (0..30).step_by(3) {
            obs[i].x += 10.0;
        }
        let config = PnpRansacConfig::default();

        let a = solve_pnp_ransac(&pts, &obs, &camera(), None, &config).unwrap();
        let b = solve_pnp_ransac(&pts, &obs, &camera(), None, &config).unwrap();
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn test_dlt_returns_none_on_nan_point() {
        let mut pts = scene(8);
        let obs = project_all(&pts, &true_pose());
        pts[3] = Vector3::new(f64::NAN, 0.0, 5.0);

        assert!(solve_pnp_dlt(&pts, &obs, &camera()).is_none());
    }

    #[test]
    fn test_ransac_terminates_with_nan_point() {
        let mut pts = scene(20);
        let obs = project_all(&pts, &true_pose());
        pts[3] = Vector3::new(f64::NAN, 0.0, 5.0);

        let result =
            solve_pnp_ransac(&pts, &obs, &camera(), None, &PnpRansacConfig::default()).unwrap();
        assert!(!result.inlier_mask[3]);
        assert_eq!(result.num_inliers(), 19);
    }

    #[test]
    fn test_not_enough_points() {
        let pts = scene(4);
        let obs = project_all(&pts, &true_pose());
        let err = solve_pnp_ransac(&pts, &obs, &camera(), None, &PnpRansacConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            PnpError::NotEnoughPoints {
                required: MIN_SAMPLE_SIZE,
                actual: 4
            }
        );
    }

    #[test]
    fn test_length_mismatch() {
        let pts = scene(8);
        let obs = project_all(&pts[..7], &true_pose());
        let err = solve_pnp_ransac(&pts, &obs, &camera(), None, &PnpRansacConfig::default())
            .unwrap_err();
        assert!(matches!(err, PnpError::LengthMismatch { .. }));
    }
}
