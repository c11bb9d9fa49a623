//! SO(3) helpers used by the pose solver.

use nalgebra::{Matrix3, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map so(3) → SO(3) (Rodrigues' formula).
///
/// ```text
/// exp([φ]×) = I + sin θ / θ [φ]× + (1 - cos θ)/θ² [φ]×²
/// ```
pub fn exp_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + skew_phi + 0.5 * skew_phi * skew_phi;
    }

    let theta_sq = theta * theta;
    Matrix3::identity()
        + (theta.sin() / theta) * skew_phi
        + ((1.0 - theta.cos()) / theta_sq) * skew_phi * skew_phi
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        assert_relative_eq!(v.cross(&u), skew(&v) * u, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_is_rotation() {
        let r = exp_so3(&Vector3::new(0.3, -0.1, 0.7));

        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_exp_quarter_turn() {
        let r = exp_so3(&Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        let x = r * Vector3::new(1.0, 0.0, 0.0);

        assert_relative_eq!(x, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }
}
