//! Error taxonomy of the tracking front-end.
//!
//! Weak tracking (too few matches, degenerate pose solve) is not an error:
//! it surfaces as a zero or low inlier count.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingError {
    /// The odometry → camera transform could not be resolved.
    TransformUnavailable {
        child: String,
        target: String,
        reason: String,
    },
    /// The input tuple cannot produce a valid frame.
    MalformedInput(String),
    /// The calibration messages do not describe a usable stereo rig.
    Calibration(String),
    /// The feature extractor failed on a well-formed input.
    Extraction(String),
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::TransformUnavailable {
                child,
                target,
                reason,
            } => write!(f, "no transform from '{child}' to '{target}': {reason}"),
            TrackingError::MalformedInput(msg) => write!(f, "malformed input: {msg}"),
            TrackingError::Calibration(msg) => write!(f, "invalid calibration: {msg}"),
            TrackingError::Extraction(msg) => write!(f, "feature extraction failed: {msg}"),
        }
    }
}

impl std::error::Error for TrackingError {}
