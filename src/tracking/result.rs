//! Tracking results and diagnostics structures.
//!
//! These types describe what happened during processing of a single
//! observation:
//! - the outcome reported back to the transport loop
//! - the snapshot handed to the pose publisher every tracked cycle

use crate::geometry::SE3;
use crate::tracking::TrackingState;
use crate::tracking::error::TrackingError;
use crate::tracking::keyframe_decision::KeyframeDecision;
use crate::tracking::pose_estimation::MatchResult;
use crate::tracking::tracking_frame::Frame;

/// What `Tracker::on_observation` did with one input tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationOutcome {
    /// The tuple was dropped; the tracker state is unchanged.
    Dropped(TrackingError),
    /// The first reference frame was created.
    Initialized,
    /// The current frame was tracked against the reference frame.
    Tracked {
        state: TrackingState,
        inliers: usize,
        decision: KeyframeDecision,
    },
}

impl ObservationOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, ObservationOutcome::Dropped(_))
    }

    /// Inlier count of a tracked cycle.
    pub fn inliers(&self) -> Option<usize> {
        match self {
            ObservationOutcome::Tracked { inliers, .. } => Some(*inliers),
            _ => None,
        }
    }
}

/// Scalar metrics of one tracked cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingMetrics {
    pub n_features: usize,
    pub n_matches: usize,
    pub n_inliers: usize,
    pub inlier_ratio: f64,
    pub match_ms: f64,
}

impl TrackingMetrics {
    pub fn new(n_features: usize, result: &MatchResult, match_ms: f64) -> Self {
        let n_matches = result.matches.len();
        let n_inliers = result.num_inliers();
        Self {
            n_features,
            n_matches,
            n_inliers,
            inlier_ratio: if n_matches > 0 {
                n_inliers as f64 / n_matches as f64
            } else {
                0.0
            },
            match_ms,
        }
    }
}

/// Everything the publisher sees for one tracked cycle.
///
/// Emitted after motion estimation and before the keyframe policy runs, so
/// `reference` is the frame the current one was matched against.
#[derive(Debug, Clone, Copy)]
pub struct TrackingSnapshot<'a> {
    pub state: TrackingState,
    pub reference: &'a Frame,
    pub current: &'a Frame,
    pub match_result: &'a MatchResult,
    /// Drift-corrected camera pose in the odometry frame.
    pub estimated_pose: SE3,
    pub metrics: TrackingMetrics,
}
