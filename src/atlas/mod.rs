//! Landmark map store fed by the tracker.

pub mod landmark_map;
pub mod types;

pub use landmark_map::{AnchorKeyFrame, Landmark, LandmarkMap, SharedLandmarkMap};
pub use types::{KeyFrameId, LandmarkId};
