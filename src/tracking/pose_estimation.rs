//! Frame-to-frame motion estimation against the reference frame.
//!
//! Descriptors of the current frame are matched against the reference
//! frame, then the current frame's 3D points are registered onto the
//! reference frame's keypoints with RANSAC PnP. The solved transform takes
//! current-camera coordinates into reference-camera coordinates.

use nalgebra::{Point2, Vector3};
use tracing::debug;

use crate::geometry::{PnpRansacConfig, SE3, solve_pnp_ransac};
use crate::tracking::frame::CameraModel;
use crate::tracking::matching::{FeatureMatch, TemporalMatcher};
use crate::tracking::tracking_frame::Frame;

/// How the next pose solve may be seeded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverHint {
    pub use_extrinsic_guess: bool,
    /// Last solved transform, if any.
    pub prior_pose: Option<SE3>,
}

impl SolverHint {
    pub fn new(use_extrinsic_guess: bool, prior_pose: Option<SE3>) -> Self {
        Self {
            use_extrinsic_guess,
            prior_pose,
        }
    }

    /// The seed pose to hand to the solver, if seeding is allowed.
    pub fn guess(&self) -> Option<&SE3> {
        if self.use_extrinsic_guess {
            self.prior_pose.as_ref()
        } else {
            None
        }
    }
}

/// Outcome of one tracking attempt.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Ratio-test survivors.
    pub matches: Vec<FeatureMatch>,
    /// Indices into `matches` of the geometric inliers.
    pub inliers: Vec<usize>,
    /// Solved transform T_ref_cur, `None` when no solve happened or it failed.
    pub pose: Option<SE3>,
    /// Whether the solve was seeded with the hint's prior pose.
    pub used_guess: bool,
}

impl MatchResult {
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }

    fn unsolved(matches: Vec<FeatureMatch>) -> Self {
        Self {
            matches,
            ..Default::default()
        }
    }
}

/// Matches a current frame against the reference frame and solves for motion.
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    camera: CameraModel,
    matcher: TemporalMatcher,
    min_inliers: usize,
    ransac: PnpRansacConfig,
}

impl MotionEstimator {
    pub fn new(
        camera: CameraModel,
        matcher: TemporalMatcher,
        min_inliers: usize,
        ransac: PnpRansacConfig,
    ) -> Self {
        Self {
            camera,
            matcher,
            min_inliers,
            ransac,
        }
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Estimate the motion of `current` relative to `reference`.
    ///
    /// Never fails: too few matches or a degenerate solve yield an empty
    /// inlier set.
    pub fn estimate(&self, reference: &Frame, current: &Frame, hint: &SolverHint) -> MatchResult {
        let matches = self
            .matcher
            .match_features(current.descriptors(), reference.descriptors());

        if matches.len() < self.min_inliers {
            debug!(
                matches = matches.len(),
                min_inliers = self.min_inliers,
                "Not enough matches to solve motion"
            );
            return MatchResult::unsolved(matches);
        }

        // Reference keypoints (train) against current 3D points (query).
        let mut points2d: Vec<Point2<f64>> = Vec::with_capacity(matches.len());
        let mut points3d: Vec<Vector3<f64>> = Vec::with_capacity(matches.len());
        let mut match_indices: Vec<usize> = Vec::with_capacity(matches.len());
        for (match_idx, m) in matches.iter().enumerate() {
            let (Some(kp), Some(Some(p_cam))) = (
                reference.keypoints().get(m.train_idx),
                current.points_cam.get(m.query_idx),
            ) else {
                continue;
            };
            points2d.push(kp.pt);
            points3d.push(*p_cam);
            match_indices.push(match_idx);
        }

        let guess = hint.guess();
        match solve_pnp_ransac(&points3d, &points2d, &self.camera, guess, &self.ransac) {
            Ok(result) => {
                debug!(
                    matches = matches.len(),
                    correspondences = points3d.len(),
                    inliers = result.num_inliers(),
                    iterations = result.iterations,
                    used_guess = guess.is_some(),
                    "Solved frame motion"
                );
                let inliers = result.inliers.iter().map(|&i| match_indices[i]).collect();
                MatchResult {
                    matches,
                    inliers,
                    pose: Some(result.pose),
                    used_guess: guess.is_some(),
                }
            }
            Err(e) => {
                debug!("Motion solve failed: {}", e);
                MatchResult {
                    used_guess: guess.is_some(),
                    ..MatchResult::unsolved(matches)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{Descriptor, FeatureSet, KeyPoint, StereoFeatures};
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

    fn descriptor(i: usize) -> Descriptor {
        // Pseudo-random bytes: distinct descriptors sit far apart in Hamming space.
        let mut bytes = [0u8; 32];
        let mut state = (i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        for b in bytes.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *b = (state & 0xFF) as u8;
        }
        Descriptor(bytes)
    }

    fn landmarks(n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                Vector3::new((f * 0.37).sin() * 1.5, (f * 0.61).cos(), 4.0 + (f * 0.23).sin() * 2.0)
            })
            .collect()
    }

    /// Frame observing `points` (expressed in the frame's camera coordinates).
    fn frame_from_points(points: &[Vector3<f64>]) -> Frame {
        let cam = camera();
        let keypoints = points
            .iter()
            .map(|p| {
                let uv = cam.project(p).unwrap();
                KeyPoint::new(uv.x, uv.y)
            })
            .collect();
        Frame::from_features(
            0,
            StereoFeatures {
                left_features: FeatureSet {
                    keypoints,
                    descriptors: (0..points.len()).map(descriptor).collect(),
                },
                points_cam: points.iter().map(|p| Some(*p)).collect(),
            },
        )
        .unwrap()
    }

    fn estimator() -> MotionEstimator {
        MotionEstimator::new(camera(), TemporalMatcher::default(), 12, PnpRansacConfig::default())
    }

    #[test]
    fn test_recovers_relative_motion() {
        let ref_points = landmarks(40);
        // Current camera moved; T_ref_cur maps current coords into reference coords.
        let t_ref_cur =
            SE3::from_axis_angle(&Vector3::new(0.0, 0.03, 0.0), Vector3::new(0.05, 0.0, 0.1));
        let t_cur_ref = t_ref_cur.inverse();
        let cur_points: Vec<_> = ref_points.iter().map(|p| t_cur_ref.transform_point(p)).collect();

        let reference = frame_from_points(&ref_points);
        let current = frame_from_points(&cur_points);

        let result = estimator().estimate(&reference, &current, &SolverHint::default());
        assert_eq!(result.matches.len(), 40);
        assert_eq!(result.num_inliers(), 40);
        assert!(!result.used_guess);
        let pose = result.pose.unwrap();
        assert_relative_eq!(pose.translation, t_ref_cur.translation, epsilon = 1e-6);
    }

    #[test]
    fn test_too_few_matches_skips_solve() {
        let reference = frame_from_points(&landmarks(8));
        let current = frame_from_points(&landmarks(8));

        let result = estimator().estimate(&reference, &current, &SolverHint::default());
        assert_eq!(result.matches.len(), 8);
        assert_eq!(result.num_inliers(), 0);
        assert!(result.pose.is_none());
    }

    #[test]
    fn test_guess_only_used_when_allowed() {
        let points = landmarks(30);
        let reference = frame_from_points(&points);
        let current = frame_from_points(&points);
        let prior = Some(SE3::identity());

        let seeded = estimator().estimate(&reference, &current, &SolverHint::new(true, prior));
        assert!(seeded.used_guess);
        assert_eq!(seeded.num_inliers(), 30);

        let scratch = estimator().estimate(&reference, &current, &SolverHint::new(false, prior));
        assert!(!scratch.used_guess);
        assert_eq!(scratch.num_inliers(), 30);
    }

    #[test]
    fn test_identical_inputs_identical_inliers() {
        let points = landmarks(30);
        let reference = frame_from_points(&points);
        let mut shifted = points.clone();
        for p in shifted.iter_mut().step_by(4) {
            p.x += 0.3;
        }
        let current = frame_from_points(&shifted);

        let a = estimator().estimate(&reference, &current, &SolverHint::default());
        let b = estimator().estimate(&reference, &current, &SolverHint::default());
        assert_eq!(a.inliers, b.inliers);
    }
}
