//! Rigid-body transforms (SE(3)).
//!
//! Poses follow the `T_target_source` naming convention: `T_odom_cam`
//! transforms a point from the camera frame into the odometry frame.

use nalgebra::{Matrix3, Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector3};

use super::so3::exp_so3;

/// Rigid transform: rotation + translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation.
    ///
    /// The matrix is re-orthonormalized through the quaternion conversion.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix(&rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    /// Build from quaternion components (w first) and a position.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let rotation = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self::from_rt(rotation, translation)
    }

    /// Build from an axis-angle vector and translation.
    pub fn from_axis_angle(axis_angle: &Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
                exp_so3(axis_angle),
            )),
            translation,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Left-multiplicative update `exp(delta) ∘ self`, with `delta` laid out
    /// as `[rot_x, rot_y, rot_z, trans_x, trans_y, trans_z]`.
    pub fn retract(&self, delta: &[f64; 6]) -> Self {
        let update = SE3::from_axis_angle(
            &Vector3::new(delta[0], delta[1], delta[2]),
            Vector3::new(delta[3], delta[4], delta[5]),
        );
        update.compose(self)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::from_axis_angle(&Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 2.0, -0.5))
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let pose = sample_pose();
        let id = pose.compose(&pose.inverse());

        assert_relative_eq!(id.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_order() {
        let a = SE3::from_rt(Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0));
        let b = SE3::from_axis_angle(
            &Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            Vector3::zeros(),
        );
        // b rotates x onto y, then a shifts along x.
        let p = a.compose(&b).transform_point(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let pose = sample_pose();
        let back = SE3::from_matrix(pose.to_matrix());

        assert_relative_eq!(back.translation, pose.translation, epsilon = 1e-12);
        assert_relative_eq!(back.rotation_matrix(), pose.rotation_matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_retract_zero_is_noop() {
        let pose = sample_pose();
        let same = pose.retract(&[0.0; 6]);
        assert_relative_eq!(same.translation, pose.translation, epsilon = 1e-12);
    }
}
