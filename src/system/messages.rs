//! Inbound message types.
//!
//! One `Observation` is the synchronized tuple handed over by the
//! transport layer for every tracking cycle.

use crate::geometry::SE3;

/// Vehicle odometry estimate.
#[derive(Debug, Clone)]
pub struct Odometry {
    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Frame the pose is expressed in (e.g. `odom`).
    pub frame_id: String,
    /// Frame of the vehicle the pose describes (e.g. `base_link`).
    pub child_frame_id: String,
    /// Pose of `child_frame_id` in `frame_id` (T_odom_base).
    pub pose: SE3,
}

/// A rectified grayscale image.
#[derive(Debug, Clone)]
pub struct StereoImage {
    pub frame_id: String,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    /// Row-major 8-bit pixels, `width * height` bytes.
    pub data: Vec<u8>,
}

impl StereoImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Camera calibration in the ROS `CameraInfo` layout.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    /// Row-major 3x3 intrinsic matrix of the raw camera.
    pub k: [f64; 9],
    /// Row-major 3x4 projection matrix of the rectified camera.
    /// For the right camera `p[3] = -fx * baseline`.
    pub p: [f64; 12],
}

/// One synchronized input tuple.
#[derive(Debug, Clone)]
pub struct Observation {
    pub odometry: Odometry,
    pub left_image: StereoImage,
    pub right_image: StereoImage,
    pub left_info: CameraInfo,
    pub right_info: CameraInfo,
}

impl Observation {
    pub fn timestamp_ns(&self) -> u64 {
        self.left_image.timestamp_ns
    }
}
