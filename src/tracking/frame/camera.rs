//! Rectified pinhole stereo camera model.

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::system::messages::CameraInfo;
use crate::tracking::error::TrackingError;

/// Intrinsics of the rectified left camera plus stereo baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Stereo baseline in meters.
    pub baseline: f64,
}

impl CameraModel {
    pub fn from_k_and_baseline(k: Matrix3<f64>, baseline: f64) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            baseline,
        }
    }

    /// Build the stereo model from the two calibration messages.
    ///
    /// Uses the rectified projection matrices: intrinsics from the left
    /// `P`, baseline from the right `P` translation term.
    pub fn from_calibration(left: &CameraInfo, right: &CameraInfo) -> Result<Self, TrackingError> {
        if left.width != right.width || left.height != right.height {
            return Err(TrackingError::Calibration(format!(
                "left calibration is {}x{} but right is {}x{}",
                left.width, left.height, right.width, right.height
            )));
        }

        let fx = left.p[0];
        let fy = left.p[5];
        if fx <= 0.0 || fy <= 0.0 {
            return Err(TrackingError::Calibration(format!(
                "rectified intrinsics require fx, fy > 0 (fx={fx}, fy={fy})"
            )));
        }

        let right_fx = right.p[0];
        if right_fx <= 0.0 {
            return Err(TrackingError::Calibration(format!(
                "right projection has non-positive fx ({right_fx})"
            )));
        }
        let baseline = -right.p[3] / right_fx;
        if baseline <= 0.0 {
            return Err(TrackingError::Calibration(format!(
                "stereo baseline must be positive, got {baseline}"
            )));
        }

        Ok(Self {
            fx,
            fy,
            cx: left.p[2],
            cy: left.p[6],
            baseline,
        })
    }

    /// 3x3 intrinsic matrix K.
    #[rustfmt::skip]
    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a camera-space point; `None` behind the camera.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }
}

/// Builds the camera model once at initialization.
pub trait CameraModelBuilder {
    fn build(
        &self,
        left: &CameraInfo,
        right: &CameraInfo,
    ) -> Result<(CameraModel, Matrix3<f64>), TrackingError>;
}

/// Builder reading the rectified projection matrices.
#[derive(Debug, Default, Clone, Copy)]
pub struct RectifiedStereoBuilder;

impl CameraModelBuilder for RectifiedStereoBuilder {
    fn build(
        &self,
        left: &CameraInfo,
        right: &CameraInfo,
    ) -> Result<(CameraModel, Matrix3<f64>), TrackingError> {
        let model = CameraModel::from_calibration(left, right)?;
        Ok((model, model.intrinsic_matrix()))
    }
}
