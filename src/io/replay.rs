//! Recorded session replay.
//!
//! A session directory holds:
//! - `calibration.yaml`: image size, left/right `K` and `P`, frame names and
//!   the static base → camera transform
//! - `odometry.csv`: `timestamp_ns,x,y,z,qx,qy,qz,qw`, one row per stereo pair
//! - `features/<timestamp_ns>.csv`: `u,v,x,y,z,valid,descriptor` with the
//!   left keypoints, their stereo points and 64 hex digit descriptors
//!
//! Images are not stored; observations carry blank buffers of the calibrated
//! size and `PrecomputedFeatures` serves the recorded features instead.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use nalgebra::{Quaternion, Vector3};
use serde::Deserialize;

use crate::geometry::SE3;
use crate::system::interfaces::StaticTransforms;
use crate::system::messages::{CameraInfo, Observation, Odometry, StereoImage};
use crate::tracking::error::TrackingError;
use crate::tracking::frame::{
    CameraModel, Descriptor, FeatureExtractor, FeatureSet, KeyPoint, StereoFeatures,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CameraCalibration {
    pub k: [f64; 9],
    pub p: [f64; 12],
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameNames {
    pub odom: String,
    pub base: String,
    pub left_camera: String,
    pub right_camera: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RigidTransform {
    pub translation: [f64; 3],
    /// `[qx, qy, qz, qw]`
    pub rotation: [f64; 4],
}

impl RigidTransform {
    pub fn to_se3(&self) -> SE3 {
        let [x, y, z] = self.translation;
        let [qx, qy, qz, qw] = self.rotation;
        SE3::from_quaternion(qw, qx, qy, qz, Vector3::new(x, y, z))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCalibration {
    pub width: u32,
    pub height: u32,
    pub left: CameraCalibration,
    pub right: CameraCalibration,
    pub frames: FrameNames,
    /// Camera pose in the vehicle frame (T_base_cam).
    pub t_base_camera: RigidTransform,
}

#[derive(Debug, Clone, Deserialize)]
struct OdometryRow {
    timestamp_ns: u64,
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureRow {
    u: f64,
    v: f64,
    x: f64,
    y: f64,
    z: f64,
    valid: u8,
    descriptor: String,
}

#[derive(Debug, Clone)]
pub struct OdometryEntry {
    pub timestamp_ns: u64,
    pub pose: SE3,
}

/// A recorded session on disk.
#[derive(Debug)]
pub struct ReplaySession {
    root: PathBuf,
    pub calibration: SessionCalibration,
    pub odometry: Vec<OdometryEntry>,
}

impl ReplaySession {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let calibration = load_calibration(&root.join("calibration.yaml"))?;
        let odometry = load_odometry(&root.join("odometry.csv"))?;

        if calibration.width == 0 || calibration.height == 0 {
            bail!(
                "calibration image size must be positive, got {}x{}",
                calibration.width,
                calibration.height
            );
        }

        Ok(Self {
            root,
            calibration,
            odometry,
        })
    }

    pub fn len(&self) -> usize {
        self.odometry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.odometry.is_empty()
    }

    pub fn features_dir(&self) -> PathBuf {
        self.root.join("features")
    }

    /// Static transform table with the recorded base → camera offset.
    pub fn transforms(&self) -> StaticTransforms {
        let frames = &self.calibration.frames;
        StaticTransforms::new().with(
            &frames.base,
            &frames.left_camera,
            self.calibration.t_base_camera.to_se3(),
        )
    }

    /// Extractor serving this session's recorded features.
    pub fn extractor(&self) -> PrecomputedFeatures {
        PrecomputedFeatures::new(self.features_dir())
    }

    /// Observation tuple for the `idx`-th odometry entry.
    pub fn observation(&self, idx: usize) -> Option<Observation> {
        let entry = self.odometry.get(idx)?;
        let calib = &self.calibration;
        let frames = &calib.frames;

        let image = |frame_id: &str| StereoImage {
            frame_id: frame_id.to_string(),
            timestamp_ns: entry.timestamp_ns,
            width: calib.width,
            height: calib.height,
            data: vec![0; calib.width as usize * calib.height as usize],
        };
        let info = |frame_id: &str, cam: &CameraCalibration| CameraInfo {
            frame_id: frame_id.to_string(),
            width: calib.width,
            height: calib.height,
            k: cam.k,
            p: cam.p,
        };

        Some(Observation {
            odometry: Odometry {
                timestamp_ns: entry.timestamp_ns,
                frame_id: frames.odom.clone(),
                child_frame_id: frames.base.clone(),
                pose: entry.pose,
            },
            left_image: image(&frames.left_camera),
            right_image: image(&frames.right_camera),
            left_info: info(&frames.left_camera, &calib.left),
            right_info: info(&frames.right_camera, &calib.right),
        })
    }

    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        (0..self.len()).filter_map(move |idx| self.observation(idx))
    }
}

fn load_calibration(path: &Path) -> Result<SessionCalibration> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
}

fn load_odometry(path: &Path) -> Result<Vec<OdometryEntry>> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut entries = Vec::new();
    for (line, row) in rdr.deserialize::<OdometryRow>().enumerate() {
        let row = row.with_context(|| format!("Bad odometry row {} in {}", line + 1, path.display()))?;
        let q = Quaternion::new(row.qw, row.qx, row.qy, row.qz);
        if q.norm() < 1e-9 {
            bail!("Zero quaternion at odometry row {} in {}", line + 1, path.display());
        }
        entries.push(OdometryEntry {
            timestamp_ns: row.timestamp_ns,
            pose: SE3::from_quaternion(row.qw, row.qx, row.qy, row.qz, Vector3::new(row.x, row.y, row.z)),
        });
    }

    if entries.windows(2).any(|w| w[1].timestamp_ns <= w[0].timestamp_ns) {
        bail!("Odometry timestamps in {} are not strictly increasing", path.display());
    }
    Ok(entries)
}

/// Read one recorded feature file.
pub fn load_features(path: &Path) -> Result<StereoFeatures> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    let mut points_cam = Vec::new();
    for (line, row) in rdr.deserialize::<FeatureRow>().enumerate() {
        let row = row.with_context(|| format!("Bad feature row {} in {}", line + 1, path.display()))?;
        let descriptor = Descriptor::from_hex(&row.descriptor).with_context(|| {
            format!("Bad descriptor at row {} in {}", line + 1, path.display())
        })?;
        let point = (row.valid != 0).then(|| Vector3::new(row.x, row.y, row.z));
        if !(row.u.is_finite() && row.v.is_finite())
            || point.is_some_and(|p| !p.iter().all(|c| c.is_finite()))
        {
            bail!("Non-finite value at row {} in {}", line + 1, path.display());
        }
        keypoints.push(KeyPoint::new(row.u, row.v));
        descriptors.push(descriptor);
        points_cam.push(point);
    }

    Ok(StereoFeatures {
        left_features: FeatureSet {
            keypoints,
            descriptors,
        },
        points_cam,
    })
}

/// Feature extractor backed by recorded feature files, keyed by the left
/// image timestamp.
#[derive(Debug, Clone)]
pub struct PrecomputedFeatures {
    dir: PathBuf,
}

impl PrecomputedFeatures {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, timestamp_ns: u64) -> PathBuf {
        self.dir.join(format!("{timestamp_ns}.csv"))
    }
}

impl FeatureExtractor for PrecomputedFeatures {
    fn extract(
        &mut self,
        left: &StereoImage,
        _right: &StereoImage,
        _camera: &CameraModel,
    ) -> Result<StereoFeatures, TrackingError> {
        let path = self.path_for(left.timestamp_ns);
        load_features(&path).map_err(|e| TrackingError::Extraction(format!("{e:#}")))
    }
}
