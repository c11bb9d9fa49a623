//! Tracking `Frame` representation.
//!
//! A `Frame` is one stereo observation as the tracker sees it: left image
//! features, their triangulated camera-space points, the odometry-derived
//! camera pose and, once the frame is promoted to the map, its world points.

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::system::messages::StereoImage;
use crate::tracking::error::TrackingError;
use crate::tracking::frame::{CameraModel, Descriptor, FeatureExtractor, FeatureSet, KeyPoint, StereoFeatures};

/// A landmark candidate expressed in the odometry (world) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldPoint {
    pub position: Vector3<f64>,
    pub descriptor: Descriptor,
    /// Index of the keypoint this point was triangulated from.
    pub keypoint_index: usize,
    /// Number of raw points merged into this one by clustering.
    pub support: usize,
}

/// A frame being tracked.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Left image features.
    pub features: FeatureSet,
    /// 3D points in camera frame (from stereo triangulation).
    /// None if the point couldn't be triangulated.
    pub points_cam: Vec<Option<Vector3<f64>>>,
    /// Camera pose in the odometry frame (T_odom_cam).
    odometry_pose: SE3,
    /// Geometric inliers of the last tracking attempt against this frame.
    inlier_count: usize,
    /// Populated by `compute_world_points`.
    world_points: Option<Vec<WorldPoint>>,
}

impl Frame {
    /// Run feature extraction on a stereo pair and build the frame.
    ///
    /// Fails with `MalformedInput` when the images disagree in size or the
    /// extractor returns misaligned feature arrays.
    pub fn from_stereo(
        left: &StereoImage,
        right: &StereoImage,
        camera: &CameraModel,
        extractor: &mut dyn FeatureExtractor,
    ) -> Result<Self, TrackingError> {
        validate_image(left)?;
        validate_image(right)?;
        if left.dimensions() != right.dimensions() {
            return Err(TrackingError::MalformedInput(format!(
                "stereo images differ in size: left {}x{}, right {}x{}",
                left.width, left.height, right.width, right.height
            )));
        }

        let features = extractor.extract(left, right, camera)?;
        Self::from_features(left.timestamp_ns, features)
    }

    /// Build a frame from already extracted features.
    ///
    /// Keypoints and valid camera points must be finite.
    pub fn from_features(timestamp_ns: u64, stereo: StereoFeatures) -> Result<Self, TrackingError> {
        let n_kps = stereo.left_features.keypoints.len();
        let n_desc = stereo.left_features.descriptors.len();
        let n_pts = stereo.points_cam.len();
        if n_kps != n_desc || n_kps != n_pts {
            return Err(TrackingError::MalformedInput(format!(
                "feature arrays are not index-aligned: {n_kps} keypoints, {n_desc} descriptors, {n_pts} points"
            )));
        }
        if let Some(idx) = stereo
            .left_features
            .keypoints
            .iter()
            .position(|kp| !(kp.pt.x.is_finite() && kp.pt.y.is_finite()))
        {
            return Err(TrackingError::MalformedInput(format!(
                "keypoint {idx} has a non-finite pixel location"
            )));
        }
        if let Some(idx) = stereo
            .points_cam
            .iter()
            .position(|p| p.is_some_and(|p| !p.iter().all(|c| c.is_finite())))
        {
            return Err(TrackingError::MalformedInput(format!(
                "camera point {idx} has a non-finite coordinate"
            )));
        }

        Ok(Self {
            timestamp_ns,
            features: stereo.left_features,
            points_cam: stereo.points_cam,
            odometry_pose: SE3::identity(),
            inlier_count: 0,
            world_points: None,
        })
    }

    /// Attach the odometry-derived camera pose.
    pub fn with_odometry_pose(mut self, pose: SE3) -> Self {
        self.odometry_pose = pose;
        self
    }

    pub fn odometry_pose(&self) -> &SE3 {
        &self.odometry_pose
    }

    /// Number of features in this frame.
    pub fn num_features(&self) -> usize {
        self.features.keypoints.len()
    }

    /// Convenience accessor for keypoints.
    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.features.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.features.descriptors
    }

    pub fn inlier_count(&self) -> usize {
        self.inlier_count
    }

    pub fn set_inlier_count(&mut self, inliers: usize) {
        self.inlier_count = inliers;
    }

    /// Transform every valid camera point through the odometry pose.
    ///
    /// Returns the number of world points produced.
    pub fn compute_world_points(&mut self) -> usize {
        let pose = self.odometry_pose;
        let points: Vec<WorldPoint> = self
            .points_cam
            .iter()
            .zip(self.features.descriptors.iter())
            .enumerate()
            .filter_map(|(idx, (p_cam, desc))| {
                p_cam.map(|p| WorldPoint {
                    position: pose.transform_point(&p),
                    descriptor: *desc,
                    keypoint_index: idx,
                    support: 1,
                })
            })
            .collect();
        let n = points.len();
        self.world_points = Some(points);
        n
    }

    /// Merge world points closer than `radius` meters.
    ///
    /// Greedy in input order: the first unassigned point seeds a cluster,
    /// every later unassigned point within `radius` of the seed joins it,
    /// and the cluster is replaced by its centroid carrying the seed's
    /// descriptor. A non-positive radius leaves the points untouched.
    pub fn cluster_world_points(&mut self, radius: f64) -> usize {
        let Some(points) = self.world_points.take() else {
            return 0;
        };
        if radius <= 0.0 {
            let n = points.len();
            self.world_points = Some(points);
            return n;
        }

        let radius_sq = radius * radius;
        let mut assigned = vec![false; points.len()];
        let mut clustered = Vec::with_capacity(points.len());

        for seed_idx in 0..points.len() {
            if assigned[seed_idx] {
                continue;
            }
            assigned[seed_idx] = true;
            let seed = &points[seed_idx];

            let mut sum = seed.position * seed.support as f64;
            let mut support = seed.support;
            for other_idx in (seed_idx + 1)..points.len() {
                if assigned[other_idx] {
                    continue;
                }
                let other = &points[other_idx];
                if (other.position - seed.position).norm_squared() <= radius_sq {
                    assigned[other_idx] = true;
                    sum += other.position * other.support as f64;
                    support += other.support;
                }
            }

            clustered.push(WorldPoint {
                position: sum / support as f64,
                descriptor: seed.descriptor,
                keypoint_index: seed.keypoint_index,
                support,
            });
        }

        let n = clustered.len();
        self.world_points = Some(clustered);
        n
    }

    /// World points, empty until `compute_world_points` ran.
    pub fn world_points(&self) -> &[WorldPoint] {
        self.world_points.as_deref().unwrap_or(&[])
    }

    pub fn has_world_points(&self) -> bool {
        self.world_points.is_some()
    }
}

fn validate_image(image: &StereoImage) -> Result<(), TrackingError> {
    if image.width == 0 || image.height == 0 {
        return Err(TrackingError::MalformedInput(format!(
            "image '{}' has zero size",
            image.frame_id
        )));
    }
    let expected = image.width as usize * image.height as usize;
    if image.data.len() != expected {
        return Err(TrackingError::MalformedInput(format!(
            "image '{}' holds {} bytes, expected {}x{} = {}",
            image.frame_id,
            image.data.len(),
            image.width,
            image.height,
            expected
        )));
    }
    Ok(())
}
