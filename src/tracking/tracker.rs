//! Main tracker: orchestrates frame processing and pose estimation.
//!
//! One call to `on_observation` per synchronized input tuple:
//! - before initialization, resolve the odometry → camera offset, build the
//!   camera model and take the first frame as reference
//! - afterwards, match each new frame against the reference frame, publish
//!   the result and let the keyframe policy refresh the reference and feed
//!   the map

use std::time::Instant;

use nalgebra::Matrix3;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::geometry::{PnpRansacConfig, SE3};
use crate::system::interfaces::{LookupTime, MapSink, PosePublisher, TransformLookup};
use crate::system::messages::Observation;
use crate::tracking::TrackingState;
use crate::tracking::error::TrackingError;
use crate::tracking::frame::{CameraModel, CameraModelBuilder, FeatureExtractor};
use crate::tracking::keyframe_decision::{KeyframeDecision, KeyframePolicy, ReferenceUpdate};
use crate::tracking::matching::TemporalMatcher;
use crate::tracking::pose_estimation::{MatchResult, MotionEstimator, SolverHint};
use crate::tracking::result::{ObservationOutcome, TrackingMetrics, TrackingSnapshot};
use crate::tracking::tracking_frame::Frame;

/// External services the tracker is wired to.
pub struct Collaborators {
    pub transforms: Box<dyn TransformLookup>,
    pub extractor: Box<dyn FeatureExtractor>,
    pub camera_builder: Box<dyn CameraModelBuilder>,
    pub map: Box<dyn MapSink>,
    pub publisher: Box<dyn PosePublisher>,
}

/// Tunables taken from `TrackingConfig`.
#[derive(Debug, Clone)]
struct TrackerParams {
    min_inliers: usize,
    ratio: f64,
    ransac: PnpRansacConfig,
    cluster_radius: f64,
}

/// Main tracking structure.
pub struct Tracker {
    params: TrackerParams,
    policy: KeyframePolicy,
    collaborators: Collaborators,

    /// Tracking state machine (NotInitialized, Initializing, Working).
    state: TrackingState,

    /// Static transform from camera into the vehicle frame (T_base_cam).
    /// Resolved once, never recomputed.
    odom_to_camera: Option<SE3>,

    /// Built together with the camera model at initialization.
    estimator: Option<MotionEstimator>,
    /// Left intrinsic matrix returned by the camera model builder.
    camera_matrix: Option<Matrix3<f64>>,

    /// Reference ("fixed") frame new frames are matched against.
    reference: Option<Frame>,

    /// Set when a weak working cycle replaced the reference frame; the next
    /// solve then starts from scratch.
    reset_fixed_frame: bool,

    /// Last solved T_ref_cur, reused as extrinsic guess.
    last_solved: Option<SE3>,

    /// Drift-corrected camera pose in the odometry frame (T_odom_cam).
    estimated_pose: SE3,
    trajectory: Vec<SE3>,

    /// Tracked cycles so far.
    frame_count: usize,
}

impl Tracker {
    pub fn new(config: &TrackingConfig, collaborators: Collaborators) -> Self {
        Self {
            params: TrackerParams {
                min_inliers: config.min_inliers,
                ratio: config.matching.ratio,
                ransac: config.pnp_config(),
                cluster_radius: config.cluster_radius_m,
            },
            policy: KeyframePolicy::new(config.min_inliers),
            collaborators,
            state: TrackingState::NotInitialized,
            odom_to_camera: None,
            estimator: None,
            camera_matrix: None,
            reference: None,
            reset_fixed_frame: false,
            last_solved: None,
            estimated_pose: SE3::identity(),
            trajectory: Vec::new(),
            frame_count: 0,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn reference_frame(&self) -> Option<&Frame> {
        self.reference.as_ref()
    }

    pub fn camera(&self) -> Option<&CameraModel> {
        self.estimator.as_ref().map(|e| e.camera())
    }

    /// T_base_cam, once resolved.
    pub fn odom_to_camera(&self) -> Option<&SE3> {
        self.odom_to_camera.as_ref()
    }

    /// Inverse of the static offset (T_cam_base), handed to the map sink.
    pub fn camera_to_odom(&self) -> Option<SE3> {
        self.odom_to_camera.map(|t| t.inverse())
    }

    pub fn camera_matrix(&self) -> Option<&Matrix3<f64>> {
        self.camera_matrix.as_ref()
    }

    pub fn estimated_pose(&self) -> &SE3 {
        &self.estimated_pose
    }

    /// Estimated pose after every successful cycle, initialization included.
    pub fn trajectory(&self) -> &[SE3] {
        &self.trajectory
    }

    /// Whether the last cycle replaced the reference frame after weak tracking.
    pub fn is_reference_reset(&self) -> bool {
        self.reset_fixed_frame
    }

    /// Hint the next solve will use.
    pub fn solver_hint(&self) -> SolverHint {
        SolverHint::new(!self.reset_fixed_frame, self.last_solved)
    }

    /// Process one synchronized input tuple.
    ///
    /// Never fails: problems with the tuple are logged and reported as
    /// `ObservationOutcome::Dropped`, leaving the tracker state unchanged.
    pub fn on_observation(&mut self, obs: &Observation) -> ObservationOutcome {
        let outcome = match self.state {
            TrackingState::NotInitialized => self.initialize(obs),
            TrackingState::Initializing | TrackingState::Working => self.track(obs),
        };

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    timestamp_ns = obs.timestamp_ns(),
                    state = %self.state,
                    "Dropping observation: {}",
                    e
                );
                ObservationOutcome::Dropped(e)
            }
        }
    }

    fn initialize(&mut self, obs: &Observation) -> Result<ObservationOutcome, TrackingError> {
        let offset = match self.odom_to_camera {
            Some(offset) => offset,
            None => {
                let offset = self.collaborators.transforms.lookup(
                    &obs.odometry.child_frame_id,
                    &obs.left_image.frame_id,
                    LookupTime::Latest,
                )?;
                info!(
                    child = %obs.odometry.child_frame_id,
                    camera = %obs.left_image.frame_id,
                    "Resolved odometry to camera transform"
                );
                self.odom_to_camera = Some(offset);
                offset
            }
        };

        let camera = match self.camera().copied() {
            Some(camera) => camera,
            None => {
                let (camera, k) = self
                    .collaborators
                    .camera_builder
                    .build(&obs.left_info, &obs.right_info)?;
                debug!(
                    fx = camera.fx,
                    fy = camera.fy,
                    baseline = camera.baseline,
                    "Built stereo camera model"
                );
                self.estimator = Some(MotionEstimator::new(
                    camera,
                    TemporalMatcher::new(self.params.ratio),
                    self.params.min_inliers,
                    self.params.ransac.clone(),
                ));
                self.camera_matrix = Some(k);
                camera
            }
        };

        let frame = self.build_frame(obs, &camera, &offset)?;

        if let (Some(camera_to_odom), Some(k)) = (self.camera_to_odom(), self.camera_matrix) {
            self.collaborators.map.set_camera(camera_to_odom, k);
        }

        info!(
            timestamp_ns = frame.timestamp_ns,
            features = frame.num_features(),
            "Initial reference frame created"
        );

        self.estimated_pose = *frame.odometry_pose();
        self.trajectory.push(self.estimated_pose);
        self.reference = Some(frame);
        self.state = TrackingState::Initializing;

        Ok(ObservationOutcome::Initialized)
    }

    fn track(&mut self, obs: &Observation) -> Result<ObservationOutcome, TrackingError> {
        let (Some(offset), Some(camera)) = (self.odom_to_camera, self.camera().copied()) else {
            return Err(TrackingError::MalformedInput(
                "tracker is tracking without camera setup".to_string(),
            ));
        };

        let mut current = self.build_frame(obs, &camera, &offset)?;

        let (Some(reference), Some(estimator)) = (self.reference.as_ref(), self.estimator.as_ref())
        else {
            return Err(TrackingError::MalformedInput(
                "tracker is tracking without a reference frame".to_string(),
            ));
        };
        self.frame_count += 1;

        let hint = self.solver_hint();
        let t_match = Instant::now();
        let result = estimator.estimate(reference, &current, &hint);
        let match_ms = t_match.elapsed().as_secs_f64() * 1000.0;

        let n_inliers = result.num_inliers();
        current.set_inlier_count(n_inliers);
        if let Some(pose) = result.pose {
            self.last_solved = Some(pose);
        }

        self.estimated_pose = estimate_pose(reference, &current, &result);
        self.trajectory.push(self.estimated_pose);

        let snapshot = TrackingSnapshot {
            state: self.state,
            reference,
            current: &current,
            match_result: &result,
            estimated_pose: self.estimated_pose,
            metrics: TrackingMetrics::new(current.num_features(), &result, match_ms),
        };
        self.collaborators.publisher.update(&snapshot);

        debug!(
            frame = self.frame_count,
            timestamp_ns = current.timestamp_ns,
            matches = result.matches.len(),
            inliers = n_inliers,
            used_guess = result.used_guess,
            "Tracked frame"
        );

        let decision = self.policy.decide(self.state, n_inliers);
        self.apply_decision(&decision, current);

        Ok(ObservationOutcome::Tracked {
            state: self.state,
            inliers: n_inliers,
            decision,
        })
    }

    fn build_frame(
        &mut self,
        obs: &Observation,
        camera: &CameraModel,
        offset: &SE3,
    ) -> Result<Frame, TrackingError> {
        let frame = Frame::from_stereo(
            &obs.left_image,
            &obs.right_image,
            camera,
            self.collaborators.extractor.as_mut(),
        )?;
        let pose = obs.odometry.pose.compose(offset);
        Ok(frame.with_odometry_pose(pose))
    }

    fn apply_decision(&mut self, decision: &KeyframeDecision, current: Frame) {
        match decision.update {
            ReferenceUpdate::Replace => {
                debug!(
                    timestamp_ns = current.timestamp_ns,
                    "Initialization weak, replacing reference frame"
                );
                self.reference = Some(current);
            }
            ReferenceUpdate::Promote => {
                if let Some(reference) = self.reference.as_mut() {
                    let n = promote(reference, self.params.cluster_radius);
                    self.collaborators.map.add_points(reference);
                    info!(
                        timestamp_ns = reference.timestamp_ns,
                        landmarks = n,
                        "Tracking initialized, reference frame added to map"
                    );
                }
            }
            ReferenceUpdate::Reset => {
                let mut reference = current;
                let n = promote(&mut reference, self.params.cluster_radius);
                self.collaborators.map.add_points(&reference);
                info!(
                    timestamp_ns = reference.timestamp_ns,
                    landmarks = n,
                    "Tracking weak, reference frame reset"
                );
                self.reference = Some(reference);
            }
            ReferenceUpdate::Keep => {}
        }

        if let Some(reset) = decision.reset_flag() {
            self.reset_fixed_frame = reset;
        }
        self.state = decision.next_state;
    }
}

/// Compute and cluster the world points of a frame entering the map.
fn promote(frame: &mut Frame, cluster_radius: f64) -> usize {
    let raw = frame.compute_world_points();
    let clustered = frame.cluster_world_points(cluster_radius);
    debug!(raw, clustered, "Computed world points");
    clustered
}

/// Reference odometry pose composed with the solved relative motion, or the
/// current odometry pose when no usable solve exists.
fn estimate_pose(reference: &Frame, current: &Frame, result: &MatchResult) -> SE3 {
    match result.pose {
        Some(t_ref_cur) if result.num_inliers() > 0 => reference.odometry_pose().compose(&t_ref_cur),
        _ => *current.odometry_pose(),
    }
}
