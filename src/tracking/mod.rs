//! Tracking front-end: turns stereo observations into drift-corrected poses
//! and decides when new landmarks enter the map.
//!
//! - Frame model (stereo features, camera points, world points)
//! - Temporal matching and RANSAC PnP motion estimation
//! - Keyframe policy (reference frame replacement, map injection)
//! - Tracker state machine driving the above

pub mod error;
pub mod frame;
pub mod keyframe_decision;
pub mod matching;
pub mod pose_estimation;
pub mod result;
pub mod state;
pub mod tracker;
pub mod tracking_frame;

pub use error::TrackingError;
pub use keyframe_decision::{KeyframeDecision, KeyframePolicy, ReferenceUpdate};
pub use pose_estimation::{MatchResult, MotionEstimator, SolverHint};
pub use result::{ObservationOutcome, TrackingSnapshot};
pub use state::TrackingState;
pub use tracker::{Collaborators, Tracker};
pub use tracking_frame::{Frame, WorldPoint};
