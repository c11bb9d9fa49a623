//! Frame-level types: camera model and binary stereo features.

pub mod camera;
pub mod stereo;

pub use camera::{CameraModel, CameraModelBuilder, RectifiedStereoBuilder};
pub use stereo::{
    Descriptor, FeatureExtractor, FeatureSet, KeyPoint, StereoFeatures, descriptor_distance,
};
