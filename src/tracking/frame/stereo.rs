use nalgebra::{Point2, Vector3};

use crate::system::messages::StereoImage;
use crate::tracking::error::TrackingError;
use crate::tracking::frame::camera::CameraModel;

/// 256-bit binary descriptor (ORB layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; 32]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0; 32])
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(2 * i..2 * i + 2)?, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

/// Hamming distance between two binary descriptors.
/// Returns the number of differing bits.
pub fn descriptor_distance(desc1: &Descriptor, desc2: &Descriptor) -> u32 {
    desc1
        .0
        .iter()
        .zip(desc2.0.iter())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum()
}

/// A detected image feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// Pixel location in the rectified image.
    pub pt: Point2<f64>,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            pt: Point2::new(x, y),
        }
    }
}

/// A set of features extracted from one image.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Output of the feature extraction stage for one stereo pair.
#[derive(Debug, Clone, Default)]
pub struct StereoFeatures {
    pub left_features: FeatureSet,
    /// 3D points per left keypoint index (None if no valid depth).
    pub points_cam: Vec<Option<Vector3<f64>>>,
}

/// Turns a rectified stereo pair into features with triangulated depth.
///
/// Implementations must be deterministic for identical inputs and return
/// index-aligned keypoints, descriptors and points.
pub trait FeatureExtractor {
    fn extract(
        &mut self,
        left: &StereoImage,
        right: &StereoImage,
        camera: &CameraModel,
    ) -> Result<StereoFeatures, TrackingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_distance() {
        let a = Descriptor([0xFF; 32]);
        let b = Descriptor::zeros();
        assert_eq!(descriptor_distance(&a, &b), 256);
        assert_eq!(descriptor_distance(&a, &a), 0);
    }

    #[test]
    fn test_descriptor_from_hex() {
        let hex = "ff".repeat(32);
        assert_eq!(Descriptor::from_hex(&hex), Some(Descriptor([0xFF; 32])));
        assert_eq!(Descriptor::from_hex("abc"), None);
        assert_eq!(Descriptor::from_hex(&"zz".repeat(32)), None);
    }
}
