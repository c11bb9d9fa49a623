//! Tracking configuration, loaded from YAML.
//!
//! Every field has a default so a partial file (or none at all) is valid.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::geometry::PnpRansacConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Base name of the stereo camera topics.
    pub camera_topic: String,
    /// Odometry topic.
    pub odom_topic: String,
    pub queues: QueueConfig,
    pub matching: MatchingConfig,
    /// Minimum ratio-test survivors / geometric inliers for tracking to count as good.
    pub min_inliers: usize,
    /// RANSAC stops once a hypothesis reaches this many inliers.
    pub max_inliers: usize,
    pub ransac: RansacConfig,
    /// World points closer than this (meters) are merged before map insertion.
    pub cluster_radius_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub odometry: usize,
    pub image: usize,
    /// Approximate-time synchronizer window.
    pub sync_window: usize,
    /// Capacity of the channel in front of the tracker.
    pub node_channel: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Ratio test threshold (best / second best).
    pub ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    pub iterations: usize,
    pub reprojection_threshold_px: f64,
    pub refine_iterations: usize,
    pub seed: u64,
}

/// Fully qualified input topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    pub odometry: String,
    pub left_image: String,
    pub right_image: String,
    pub left_info: String,
    pub right_info: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            camera_topic: "/stereo_camera".to_string(),
            odom_topic: "/odometry".to_string(),
            queues: QueueConfig::default(),
            matching: MatchingConfig::default(),
            min_inliers: 12,
            max_inliers: 100,
            ransac: RansacConfig::default(),
            cluster_radius_m: 0.05,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            odometry: 20,
            image: 3,
            sync_window: 5,
            node_channel: 5,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { ratio: 0.9 }
    }
}

impl Default for RansacConfig {
    fn default() -> Self {
        let pnp = PnpRansacConfig::default();
        Self {
            iterations: pnp.max_iterations,
            reprojection_threshold_px: pnp.reprojection_threshold_px,
            refine_iterations: pnp.refine_iterations,
            seed: pnp.seed,
        }
    }
}

impl TrackingConfig {
    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: TrackingConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: TrackingConfig =
            serde_yaml::from_str(yaml).context("Failed to parse tracking config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.matching.ratio > 0.0 && self.matching.ratio <= 1.0) {
            bail!("matching.ratio must be in (0, 1], got {}", self.matching.ratio);
        }
        if self.min_inliers == 0 {
            bail!("min_inliers must be positive");
        }
        if self.max_inliers < self.min_inliers {
            bail!(
                "max_inliers ({}) must not be below min_inliers ({})",
                self.max_inliers,
                self.min_inliers
            );
        }
        if self.ransac.iterations == 0 {
            bail!("ransac.iterations must be positive");
        }
        if self.ransac.reprojection_threshold_px <= 0.0 {
            bail!(
                "ransac.reprojection_threshold_px must be positive, got {}",
                self.ransac.reprojection_threshold_px
            );
        }
        let queues = &self.queues;
        for (name, depth) in [
            ("odometry", queues.odometry),
            ("image", queues.image),
            ("sync_window", queues.sync_window),
            ("node_channel", queues.node_channel),
        ] {
            if depth == 0 {
                bail!("queues.{name} must be positive");
            }
        }
        Ok(())
    }

    /// Input topics derived from the configured base names.
    pub fn topics(&self) -> TopicNames {
        let camera = self.camera_topic.trim_end_matches('/');
        TopicNames {
            odometry: self.odom_topic.clone(),
            left_image: format!("{camera}/left/image_rect"),
            right_image: format!("{camera}/right/image_rect"),
            left_info: format!("{camera}/left/camera_info"),
            right_info: format!("{camera}/right/camera_info"),
        }
    }

    pub fn pnp_config(&self) -> PnpRansacConfig {
        PnpRansacConfig {
            max_iterations: self.ransac.iterations,
            reprojection_threshold_px: self.ransac.reprojection_threshold_px,
            max_inliers: self.max_inliers,
            refine_iterations: self.ransac.refine_iterations,
            seed: self.ransac.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.matching.ratio, 0.9);
        assert_eq!(config.ransac.iterations, 100);
        assert_eq!(config.ransac.reprojection_threshold_px, 1.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = TrackingConfig::from_yaml_str(
            "camera_topic: /bumblebee\nmin_inliers: 20\nransac:\n  iterations: 50\n",
        )
        .unwrap();

        assert_eq!(config.min_inliers, 20);
        assert_eq!(config.ransac.iterations, 50);
        assert_eq!(config.ransac.reprojection_threshold_px, 1.3);
        assert_eq!(config.topics().left_image, "/bumblebee/left/image_rect");
        assert_eq!(config.topics().right_info, "/bumblebee/right/camera_info");
    }

    #[test]
    fn test_rejects_bad_ratio() {
        assert!(TrackingConfig::from_yaml_str("matching:\n  ratio: 1.5\n").is_err());
        assert!(TrackingConfig::from_yaml_str("matching:\n  ratio: 0.0\n").is_err());
    }

    #[test]
    fn test_rejects_max_below_min() {
        assert!(TrackingConfig::from_yaml_str("min_inliers: 30\nmax_inliers: 10\n").is_err());
    }

    #[test]
    fn test_rejects_zero_queue_depth() {
        assert!(TrackingConfig::from_yaml_str("queues:\n  image: 0\n").is_err());
        assert!(TrackingConfig::from_yaml_str("queues:\n  sync_window: 0\n").is_err());

        let config = TrackingConfig::from_yaml_str("queues:\n  odometry: 50\n").unwrap();
        assert_eq!(config.queues.odometry, 50);
        assert_eq!(config.queues.image, 3);
        assert_eq!(config.queues.sync_window, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "odom_topic: /vehicle/odom\ncluster_radius_m: 0.1").unwrap();

        let config = TrackingConfig::load(file.path()).unwrap();
        assert_eq!(config.topics().odometry, "/vehicle/odom");
        assert_eq!(config.cluster_radius_m, 0.1);
        assert_eq!(config.pnp_config().max_inliers, config.max_inliers);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(TrackingConfig::load("/nonexistent/tracking.yaml").is_err());
    }
}
