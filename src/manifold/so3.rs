//! SO3 - Special Orthogonal Group in 3D
//!
//! Rotations are stored as nalgebra unit quaternions. Tangent vectors are axis-angle vectors in
//! R³, where the direction gives the rotation axis and the magnitude the angle.

use crate::manifold::{
    LieGroup, ManifoldResult, Tangent, check_tangent, impl_manifold_for_lie_group, skew,
};
use nalgebra::{DVector, Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Below this squared angle the closed-form Jacobians switch to their Taylor expansions.
const SMALL_ANGLE_SQUARED: f64 = 1e-10;

/// SO(3) group element representing rotations in 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl Display for SO3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

impl SO3 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 3;

    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create from quaternion coefficients; the input is normalized.
    pub fn from_quaternion_coeffs(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self::new(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    /// Create from a rotation matrix whose columns are an orthonormal right-handed frame.
    pub fn from_rotation_matrix(matrix: &Matrix3<f64>) -> Self {
        let rotation = Rotation3::from_matrix_unchecked(*matrix);
        Self::new(UnitQuaternion::from_rotation_matrix(&rotation))
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Rotate a vector.
    pub fn act(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion * vector
    }

    /// Angle of the rotation in radians.
    pub fn angle(&self) -> f64 {
        self.quaternion.angle()
    }
}

impl LieGroup for SO3 {
    type TangentVector = SO3Tangent;
    type JacobianMatrix = Matrix3<f64>;

    fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    fn inverse(&self) -> Self {
        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    fn log(&self) -> SO3Tangent {
        SO3Tangent {
            data: self.quaternion.scaled_axis(),
        }
    }

    fn adjoint(&self) -> Matrix3<f64> {
        self.rotation_matrix()
    }

    fn random() -> Self {
        Self::from_scaled_axis(SO3Tangent::random().data)
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).is_zero(tolerance)
    }
}

impl_manifold_for_lie_group!(SO3);

/// SO(3) tangent space element: an axis-angle vector `[θx, θy, θz]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl SO3Tangent {
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    pub fn from_components(x: f64, y: f64, z: f64) -> Self {
        Self::new(Vector3::new(x, y, z))
    }

    pub fn axis_angle(&self) -> Vector3<f64> {
        self.data
    }

    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Hat map `[θ]×`.
    pub fn hat(&self) -> Matrix3<f64> {
        skew(&self.data)
    }
}

impl Tangent<SO3> for SO3Tangent {
    const DIM: usize = 3;

    /// Exponential map, `q = cos(θ/2) + u·sin(θ/2)`.
    fn exp(&self) -> SO3 {
        let theta_squared = self.data.norm_squared();
        let quaternion = if theta_squared > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(self.data)
        } else {
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                self.data.x / 2.0,
                self.data.y / 2.0,
                self.data.z / 2.0,
            ))
        };
        SO3 { quaternion }
    }

    /// `J_r(θ) = J_l(θ)ᵀ`
    fn right_jacobian(&self) -> Matrix3<f64> {
        self.left_jacobian().transpose()
    }

    /// `J_l(θ) = I + (1 − cos θ)/θ² [θ]× + (θ − sin θ)/θ³ [θ]ײ`
    fn left_jacobian(&self) -> Matrix3<f64> {
        let theta_squared = self.data.norm_squared();
        let w = self.hat();

        let (a, b) = if theta_squared < SMALL_ANGLE_SQUARED {
            (
                0.5 - theta_squared / 24.0,
                1.0 / 6.0 - theta_squared / 120.0,
            )
        } else {
            let theta = theta_squared.sqrt();
            (
                (1.0 - theta.cos()) / theta_squared,
                (theta - theta.sin()) / (theta_squared * theta),
            )
        };
        Matrix3::identity() + a * w + b * w * w
    }

    /// `J_r⁻¹(θ) = J_l⁻¹(θ)ᵀ`
    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        self.left_jacobian_inv().transpose()
    }

    /// `J_l⁻¹(θ) = I − ½[θ]× + (1/θ² − (1 + cos θ)/(2θ sin θ)) [θ]ײ`
    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let theta_squared = self.data.norm_squared();
        let w = self.hat();

        let c = if theta_squared < SMALL_ANGLE_SQUARED {
            1.0 / 12.0 + theta_squared / 720.0
        } else {
            let theta = theta_squared.sqrt();
            1.0 / theta_squared - (1.0 + theta.cos()) / (2.0 * theta * theta.sin())
        };
        Matrix3::identity() - 0.5 * w + c * w * w
    }

    fn zero() -> Self {
        Self::new(Vector3::zeros())
    }

    fn random() -> Self {
        Self::new(Vector3::new(
            rand::random::<f64>() * 2.0 - 1.0,
            rand::random::<f64>() * 2.0 - 1.0,
            rand::random::<f64>() * 2.0 - 1.0,
        ))
    }

    fn from_dvector(vector: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(vector, Self::DIM)?;
        Ok(Self::new(Vector3::new(vector[0], vector[1], vector[2])))
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::Manifold;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_so3_identity() {
        let so3 = SO3::identity();
        assert!(so3.rotation_matrix().is_identity(TOLERANCE));
        assert!(so3.log().is_zero(TOLERANCE));
    }

    #[test]
    fn test_so3_from_quaternion_coeffs_normalizes() {
        let so3 = SO3::from_quaternion_coeffs(0.1, 0.2, 0.3, 0.4);
        assert!((so3.quaternion().norm() - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_so3_act() {
        let so3 = SO3::from_scaled_axis(Vector3::new(0.0, 0.0, PI / 2.0));
        let rotated = so3.act(&Vector3::x());
        assert!((rotated - Vector3::y()).norm() < TOLERANCE);
    }

    #[test]
    fn test_so3_inverse_compose() {
        let so3 = SO3::random();
        let should_be_identity = so3.compose(&so3.inverse());
        assert!(should_be_identity.is_approx(&SO3::identity(), 1e-10));
    }

    #[test]
    fn test_so3_exp_log() {
        for _ in 0..20 {
            let tangent = SO3Tangent::random();
            let recovered = tangent.exp().log();
            assert!((recovered.axis_angle() - tangent.axis_angle()).norm() < 1e-10);
        }
    }

    #[test]
    fn test_so3_from_rotation_matrix() {
        let so3 = SO3::from_euler_angles(0.1, -0.4, 0.8);
        let rebuilt = SO3::from_rotation_matrix(&so3.rotation_matrix());
        assert!(so3.is_approx(&rebuilt, 1e-10));
    }

    #[test]
    fn test_so3_jacobian_inverses() {
        let tangent = SO3Tangent::from_components(0.3, -0.5, 0.9);
        let jr = tangent.right_jacobian() * tangent.right_jacobian_inv();
        let jl = tangent.left_jacobian() * tangent.left_jacobian_inv();
        assert!(jr.is_identity(1e-10));
        assert!(jl.is_identity(1e-10));

        let small = SO3Tangent::from_components(1e-7, 2e-7, -1e-7);
        assert!((small.left_jacobian() * small.left_jacobian_inv()).is_identity(1e-12));
    }

    #[test]
    fn test_so3_right_jacobian_numerical() {
        // Exp(θ + δ) ≈ Exp(θ) ∘ Exp(J_r δ)
        let tangent = SO3Tangent::from_components(0.4, 0.1, -0.7);
        let jr = tangent.right_jacobian();
        let h = 1e-6;
        for i in 0..3 {
            let mut d = Vector3::zeros();
            d[i] = h;
            let perturbed = SO3Tangent::new(tangent.axis_angle() + d).exp();
            let diff = perturbed.right_minus(&tangent.exp()).axis_angle() / h;
            assert!((diff - jr.column(i)).norm() < 1e-5);
        }
    }

    #[test]
    fn test_so3_left_jacobian_numerical() {
        // Exp(θ + δ) ≈ Exp(J_l δ) ∘ Exp(θ)
        let tangent = SO3Tangent::from_components(-0.9, 0.6, 0.2);
        let jl = tangent.left_jacobian();
        let h = 1e-6;
        for i in 0..3 {
            let mut d = Vector3::zeros();
            d[i] = h;
            let perturbed = SO3Tangent::new(tangent.axis_angle() + d).exp();
            let diff = perturbed.compose(&tangent.exp().inverse()).log().axis_angle() / h;
            assert!((diff - jl.column(i)).norm() < 1e-5);
        }
    }

    #[test]
    fn test_so3_manifold_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let x = SO3::random();
        let y = SO3::random();
        let d = x.local_coordinates(&y)?;
        assert!(x.retract(&d)?.is_approx(&y, 1e-10));
        assert!(x.local_coordinates(&x)?.norm() < TOLERANCE);
        Ok(())
    }
}
