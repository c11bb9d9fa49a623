//! Dataset input.

pub mod replay;

pub use replay::{PrecomputedFeatures, ReplaySession};
