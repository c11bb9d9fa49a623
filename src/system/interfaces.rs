//! Collaborators of the tracker.
//!
//! The tracker only talks to the outside world through these traits:
//! transform lookup, map store and result publisher. The feature extractor
//! and camera model builder live next to the frame model in
//! `tracking::frame`.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::Matrix3;
use parking_lot::Mutex;

use crate::geometry::SE3;
use crate::tracking::TrackingState;
use crate::tracking::error::TrackingError;
use crate::tracking::result::TrackingSnapshot;
use crate::tracking::tracking_frame::Frame;

/// Point in time a transform is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTime {
    /// Most recent available transform.
    Latest,
    /// Transform valid at this timestamp (nanoseconds).
    At(u64),
}

/// Resolves rigid transforms between named coordinate frames.
pub trait TransformLookup {
    /// Pose of `source_frame` expressed in `target_frame`
    /// (maps `source_frame` coordinates into `target_frame`).
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: LookupTime,
    ) -> Result<SE3, TrackingError>;
}

/// Fixed table of transforms, time independent.
#[derive(Debug, Clone, Default)]
pub struct StaticTransforms {
    /// (target, source) → T_target_source
    transforms: HashMap<(String, String), SE3>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T_target_source`.
    pub fn insert(&mut self, target_frame: &str, source_frame: &str, transform: SE3) {
        self.transforms
            .insert((target_frame.to_string(), source_frame.to_string()), transform);
    }

    pub fn with(mut self, target_frame: &str, source_frame: &str, transform: SE3) -> Self {
        self.insert(target_frame, source_frame, transform);
        self
    }
}

impl TransformLookup for StaticTransforms {
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        _time: LookupTime,
    ) -> Result<SE3, TrackingError> {
        if target_frame == source_frame {
            return Ok(SE3::identity());
        }
        let key = (target_frame.to_string(), source_frame.to_string());
        if let Some(t) = self.transforms.get(&key) {
            return Ok(*t);
        }
        let inverse_key = (source_frame.to_string(), target_frame.to_string());
        if let Some(t) = self.transforms.get(&inverse_key) {
            return Ok(t.inverse());
        }
        Err(TrackingError::TransformUnavailable {
            child: target_frame.to_string(),
            target: source_frame.to_string(),
            reason: "no static transform registered".to_string(),
        })
    }
}

/// Persistent map store receiving promoted frames.
pub trait MapSink {
    /// Camera setup, sent once when tracking initializes: the inverse of the
    /// odometry → camera offset (T_cam_base) and the left intrinsic matrix.
    fn set_camera(&mut self, camera_to_odom: SE3, k: Matrix3<f64>);

    /// Called with frames whose world points have been computed.
    fn add_points(&mut self, frame: &Frame);
}

/// Receives the result of every tracked cycle.
pub trait PosePublisher {
    fn update(&mut self, snapshot: &TrackingSnapshot<'_>);
}

/// Publisher that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl PosePublisher for NullPublisher {
    fn update(&mut self, _snapshot: &TrackingSnapshot<'_>) {}
}

/// One published cycle, owned.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPose {
    pub timestamp_ns: u64,
    pub reference_timestamp_ns: u64,
    pub state: TrackingState,
    pub matches: usize,
    pub inliers: usize,
    /// Whether the solve was seeded with the previous pose.
    pub used_guess: bool,
    pub estimated_pose: SE3,
}

/// Publisher keeping every cycle in memory.
///
/// Clones share the same record list, so a clone kept by the caller sees
/// what the tracker published.
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    records: Arc<Mutex<Vec<PublishedPose>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PublishedPose> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl PosePublisher for RecordingPublisher {
    fn update(&mut self, snapshot: &TrackingSnapshot<'_>) {
        self.records.lock().push(PublishedPose {
            timestamp_ns: snapshot.current.timestamp_ns,
            reference_timestamp_ns: snapshot.reference.timestamp_ns,
            state: snapshot.state,
            matches: snapshot.match_result.matches.len(),
            inliers: snapshot.match_result.num_inliers(),
            used_guess: snapshot.match_result.used_guess,
            estimated_pose: snapshot.estimated_pose,
        });
    }
}
