//! Runtime around the tracker: inbound messages, collaborator interfaces
//! and the channel-driven tracking node.

pub mod interfaces;
pub mod messages;
pub mod node;

pub use interfaces::{
    LookupTime, MapSink, NullPublisher, PosePublisher, PublishedPose, RecordingPublisher,
    StaticTransforms, TransformLookup,
};
pub use messages::{CameraInfo, Observation, Odometry, StereoImage};
pub use node::{NodeStats, ObservationSender, ShutdownHandle, TrackingNode};
