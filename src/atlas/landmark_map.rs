//! LandmarkMap - Persistent store of promoted landmarks.
//!
//! Every frame submitted by the tracker becomes an anchor keyframe, and each
//! of its world points becomes a landmark with a fresh sequential id.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use parking_lot::RwLock;
use tracing::debug;

use crate::geometry::SE3;
use crate::system::interfaces::MapSink;
use crate::tracking::frame::Descriptor;
use crate::tracking::tracking_frame::Frame;

use super::types::{KeyFrameId, LandmarkId};

/// A 3D landmark in the odometry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub id: LandmarkId,
    pub position: Vector3<f64>,
    pub descriptor: Descriptor,
    /// Keyframe that introduced this landmark.
    pub source: KeyFrameId,
    /// Number of raw points merged into this landmark.
    pub support: usize,
}

/// A frame that was submitted to the map.
#[derive(Debug, Clone)]
pub struct AnchorKeyFrame {
    pub id: KeyFrameId,
    pub timestamp_ns: u64,
    /// Camera pose in the odometry frame (T_odom_cam).
    pub pose: SE3,
    pub landmarks: Vec<LandmarkId>,
}

/// In-memory landmark map.
#[derive(Debug, Default)]
pub struct LandmarkMap {
    keyframes: HashMap<KeyFrameId, AnchorKeyFrame>,
    landmarks: HashMap<LandmarkId, Landmark>,
    next_kf_id: u64,
    next_lm_id: u64,
    /// T_cam_base, set once by the tracker.
    camera_to_odom: Option<SE3>,
    camera_matrix: Option<Matrix3<f64>>,
}

impl LandmarkMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a frame's world points. Returns the new keyframe id.
    ///
    /// A frame without world points still creates an (empty) keyframe.
    pub fn insert_frame(&mut self, frame: &Frame) -> KeyFrameId {
        let kf_id = KeyFrameId::new(self.next_kf_id);
        self.next_kf_id += 1;

        let mut ids = Vec::with_capacity(frame.world_points().len());
        for wp in frame.world_points() {
            let id = LandmarkId::new(self.next_lm_id);
            self.next_lm_id += 1;
            self.landmarks.insert(
                id,
                Landmark {
                    id,
                    position: wp.position,
                    descriptor: wp.descriptor,
                    source: kf_id,
                    support: wp.support,
                },
            );
            ids.push(id);
        }

        debug!(
            keyframe = %kf_id,
            timestamp_ns = frame.timestamp_ns,
            landmarks = ids.len(),
            "Inserted frame into landmark map"
        );

        self.keyframes.insert(
            kf_id,
            AnchorKeyFrame {
                id: kf_id,
                timestamp_ns: frame.timestamp_ns,
                pose: *frame.odometry_pose(),
                landmarks: ids,
            },
        );
        kf_id
    }

    /// Record the camera setup landmarks were observed with.
    pub fn set_camera(&mut self, camera_to_odom: SE3, k: Matrix3<f64>) {
        debug!(fx = k[(0, 0)], fy = k[(1, 1)], "Landmark map camera set");
        self.camera_to_odom = Some(camera_to_odom);
        self.camera_matrix = Some(k);
    }

    pub fn camera_to_odom(&self) -> Option<&SE3> {
        self.camera_to_odom.as_ref()
    }

    pub fn camera_matrix(&self) -> Option<&Matrix3<f64>> {
        self.camera_matrix.as_ref()
    }

    pub fn get_landmark(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.get(&id)
    }

    pub fn get_keyframe(&self, id: KeyFrameId) -> Option<&AnchorKeyFrame> {
        self.keyframes.get(&id)
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    /// Landmarks sorted by id.
    pub fn landmarks(&self) -> Vec<&Landmark> {
        let mut all: Vec<&Landmark> = self.landmarks.values().collect();
        all.sort_by_key(|lm| lm.id);
        all
    }

    /// Anchor keyframes in insertion order.
    pub fn keyframes(&self) -> Vec<&AnchorKeyFrame> {
        let mut all: Vec<&AnchorKeyFrame> = self.keyframes.values().collect();
        all.sort_by_key(|kf| kf.id);
        all
    }
}

impl MapSink for LandmarkMap {
    fn set_camera(&mut self, camera_to_odom: SE3, k: Matrix3<f64>) {
        LandmarkMap::set_camera(self, camera_to_odom, k);
    }

    fn add_points(&mut self, frame: &Frame) {
        self.insert_frame(frame);
    }
}

/// Landmark map shared with other readers.
///
/// The tracker owns one clone as its sink; other consumers read through
/// their own clone.
#[derive(Debug, Clone, Default)]
pub struct SharedLandmarkMap {
    inner: Arc<RwLock<LandmarkMap>>,
}

impl SharedLandmarkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, LandmarkMap> {
        self.inner.read()
    }
}

impl MapSink for SharedLandmarkMap {
    fn set_camera(&mut self, camera_to_odom: SE3, k: Matrix3<f64>) {
        self.inner.write().set_camera(camera_to_odom, k);
    }

    fn add_points(&mut self, frame: &Frame) {
        self.inner.write().insert_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::{FeatureSet, KeyPoint, StereoFeatures};

    fn frame_with_points(ts: u64, points: Vec<Option<Vector3<f64>>>) -> Frame {
        let n = points.len();
        let mut frame = Frame::from_features(
            ts,
            StereoFeatures {
                left_features: FeatureSet {
                    keypoints: (0..n).map(|i| KeyPoint::new(i as f64, 0.0)).collect(),
                    descriptors: (0..n).map(|i| Descriptor([i as u8; 32])).collect(),
                },
                points_cam: points,
            },
        )
        .unwrap();
        frame.compute_world_points();
        frame
    }

    #[test]
    fn test_sequential_ids() {
        let mut map = LandmarkMap::new();
        let f1 = frame_with_points(1, vec![Some(Vector3::new(0.0, 0.0, 1.0)), None]);
        let f2 = frame_with_points(
            2,
            vec![Some(Vector3::new(1.0, 0.0, 1.0)), Some(Vector3::new(2.0, 0.0, 1.0))],
        );

        let kf1 = map.insert_frame(&f1);
        let kf2 = map.insert_frame(&f2);

        assert_eq!(kf1, KeyFrameId::new(0));
        assert_eq!(kf2, KeyFrameId::new(1));
        assert_eq!(map.num_landmarks(), 3);
        let ids: Vec<_> = map.landmarks().iter().map(|lm| lm.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(map.get_keyframe(kf2).unwrap().landmarks.len(), 2);
        assert_eq!(map.get_landmark(LandmarkId::new(0)).unwrap().source, kf1);
    }

    #[test]
    fn test_shared_map_visible_to_readers() {
        let mut sink = SharedLandmarkMap::new();
        let reader = sink.clone();

        sink.add_points(&frame_with_points(5, vec![Some(Vector3::new(0.0, 0.0, 3.0))]));

        let map = reader.read();
        assert_eq!(map.num_keyframes(), 1);
        assert_eq!(map.keyframes()[0].timestamp_ns, 5);
    }

    #[test]
    fn test_camera_setup_stored() {
        let mut sink = SharedLandmarkMap::new();
        let reader = sink.clone();
        assert!(reader.read().camera_matrix().is_none());

        let t_cam_base = SE3::from_rt(Matrix3::identity(), Vector3::new(-0.1, 0.0, -0.2));
        #[rustfmt::skip]
        let k = Matrix3::new(
            450.0, 0.0, 320.0,
            0.0, 450.0, 240.0,
            0.0, 0.0, 1.0,
        );
        sink.set_camera(t_cam_base, k);

        let map = reader.read();
        assert_eq!(map.camera_to_odom(), Some(&t_cam_base));
        assert_eq!(map.camera_matrix(), Some(&k));
    }
}
