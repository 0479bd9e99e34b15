//! SE(3) - Special Euclidean Group in 3D
//!
//! Rigid body transformations, stored as an SO(3) rotation plus a translation. Tangent vectors
//! are ordered `[ρ (translation), θ (rotation)]`, six components in total.
//!
//! A pose maps points from its local frame into the parent frame: `p_parent = R·p_local + t`.
//! For a camera this is the camera-to-world transform.

use crate::manifold::{
    LieGroup, ManifoldResult, Tangent, check_tangent, impl_manifold_for_lie_group, skew,
    so3::{SO3, SO3Tangent},
};
use nalgebra::{DVector, Isometry3, Matrix3, Matrix6, Translation3, UnitQuaternion, Vector3, Vector6};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// SE(3) group element representing rigid body transformations in 3D.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    rotation: SO3,
    translation: Vector3<f64>,
}

impl Display for SE3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

impl SE3 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 6;

    /// Create a new SE3 element from translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        SE3 {
            rotation: SO3::new(rotation),
            translation,
        }
    }

    pub fn from_translation_so3(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    pub fn from_translation_euler(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::from_translation_so3(
            Vector3::new(x, y, z),
            SO3::from_euler_angles(roll, pitch, yaw),
        )
    }

    pub fn from_isometry(isometry: &Isometry3<f64>) -> Self {
        Self::new(isometry.translation.vector, isometry.rotation)
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn rotation_so3(&self) -> &SO3 {
        &self.rotation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            self.rotation.quaternion(),
        )
    }

    /// Transform a point from the local frame into the parent frame, `R·p + t`.
    pub fn transform_from(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.act(point) + self.translation
    }

    /// Transform a point from the parent frame into the local frame, `Rᵀ(p − t)`.
    pub fn transform_to(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse().act(&(point - self.translation))
    }
}

impl LieGroup for SE3 {
    type TangentVector = SE3Tangent;
    type JacobianMatrix = Matrix6<f64>;

    fn identity() -> Self {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    fn inverse(&self) -> Self {
        let rotation_inv = self.rotation.inverse();
        SE3 {
            translation: -rotation_inv.act(&self.translation),
            rotation: rotation_inv,
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SE3 {
            rotation: self.rotation.compose(&other.rotation),
            translation: self.rotation.act(&other.translation) + self.translation,
        }
    }

    /// `θ = Log(R)`, `ρ = J_l⁻¹(θ)·t`
    fn log(&self) -> SE3Tangent {
        let theta = self.rotation.log();
        let rho = theta.left_jacobian_inv() * self.translation;
        SE3Tangent::new(rho, theta.axis_angle())
    }

    /// `Ad = [R, [t]×R; 0, R]`
    fn adjoint(&self) -> Matrix6<f64> {
        let rotation = self.rotation_matrix();
        let mut adjoint = Matrix6::zeros();
        adjoint.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        adjoint.fixed_view_mut::<3, 3>(3, 3).copy_from(&rotation);
        adjoint
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(skew(&self.translation) * rotation));
        adjoint
    }

    fn random() -> Self {
        SE3Tangent::random().exp()
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).is_zero(tolerance)
    }
}

impl_manifold_for_lie_group!(SE3);

/// SE(3) tangent space element `[ρ, θ]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rho = self.rho();
        let theta = self.theta();
        write!(
            f,
            "se3(rho: [{:.4}, {:.4}, {:.4}], theta: [{:.4}, {:.4}, {:.4}])",
            rho.x, rho.y, rho.z, theta.x, theta.y, theta.z
        )
    }
}

impl SE3Tangent {
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        SE3Tangent {
            data: Vector6::new(rho.x, rho.y, rho.z, theta.x, theta.y, theta.z),
        }
    }

    pub fn from_vector(data: Vector6<f64>) -> Self {
        SE3Tangent { data }
    }

    pub fn coeffs(&self) -> Vector6<f64> {
        self.data
    }

    /// Translational part
    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    /// Rotational part
    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// `Q(ρ, θ)` coupling block of the SE(3) left Jacobian.
    ///
    /// ```text
    /// Q = ½[ρ]× + b·(θρ + ρθ + θρθ) + c·(θθρ + ρθθ − 3θρθ) + d·(θρθθ + θθρθ)
    /// b = (θ − sin θ)/θ³
    /// c = (θ² + 2cos θ − 2)/(2θ⁴)
    /// d = (2θ − 3sin θ + θcos θ)/(2θ⁵)
    /// ```
    /// where juxtaposed symbols denote products of the skew matrices `[θ]×` and `[ρ]×`.
    pub fn q_block(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
        let rho_x = skew(rho);
        let theta_x = skew(theta);
        let angle_squared = theta.norm_squared();

        let (b, c, d) = if angle_squared < 1e-4 {
            (
                1.0 / 6.0 - angle_squared / 120.0,
                1.0 / 24.0 - angle_squared / 720.0,
                1.0 / 120.0 - angle_squared / 2520.0,
            )
        } else {
            let angle = angle_squared.sqrt();
            let (sin, cos) = angle.sin_cos();
            let angle_4 = angle_squared * angle_squared;
            (
                (angle - sin) / (angle_squared * angle),
                (angle_squared + 2.0 * cos - 2.0) / (2.0 * angle_4),
                (2.0 * angle - 3.0 * sin + angle * cos) / (2.0 * angle_4 * angle),
            )
        };

        let tr = theta_x * rho_x;
        let rt = rho_x * theta_x;
        let trt = tr * theta_x;
        let ttr = theta_x * tr;
        let rtt = rt * theta_x;

        0.5 * rho_x
            + b * (tr + rt + trt)
            + c * (ttr + rtt - 3.0 * trt)
            + d * (trt * theta_x + theta_x * trt)
    }

    fn so3(&self) -> SO3Tangent {
        SO3Tangent::new(self.theta())
    }

    fn assemble(j: &Matrix3<f64>, q: &Matrix3<f64>) -> Matrix6<f64> {
        let mut out = Matrix6::zeros();
        out.fixed_view_mut::<3, 3>(0, 0).copy_from(j);
        out.fixed_view_mut::<3, 3>(3, 3).copy_from(j);
        out.fixed_view_mut::<3, 3>(0, 3).copy_from(q);
        out
    }

    fn assemble_inverse(j_inv: &Matrix3<f64>, q: &Matrix3<f64>) -> Matrix6<f64> {
        let mut out = Matrix6::zeros();
        out.fixed_view_mut::<3, 3>(0, 0).copy_from(j_inv);
        out.fixed_view_mut::<3, 3>(3, 3).copy_from(j_inv);
        out.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-j_inv * q * j_inv));
        out
    }
}

impl Tangent<SE3> for SE3Tangent {
    const DIM: usize = 6;

    /// `R = Exp(θ)`, `t = J_l(θ)·ρ`
    fn exp(&self) -> SE3 {
        let so3 = self.so3();
        SE3 {
            translation: so3.left_jacobian() * self.rho(),
            rotation: so3.exp(),
        }
    }

    /// `J_r(ξ) = J_l(−ξ)`
    fn right_jacobian(&self) -> Matrix6<f64> {
        SE3Tangent::from_vector(-self.data).left_jacobian()
    }

    /// `J_l = [J, Q; 0, J]` with `J` the SO(3) left Jacobian.
    fn left_jacobian(&self) -> Matrix6<f64> {
        let j = self.so3().left_jacobian();
        let q = Self::q_block(&self.rho(), &self.theta());
        Self::assemble(&j, &q)
    }

    fn right_jacobian_inv(&self) -> Matrix6<f64> {
        SE3Tangent::from_vector(-self.data).left_jacobian_inv()
    }

    /// `J_l⁻¹ = [J⁻¹, −J⁻¹QJ⁻¹; 0, J⁻¹]`
    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let j_inv = self.so3().left_jacobian_inv();
        let q = Self::q_block(&self.rho(), &self.theta());
        Self::assemble_inverse(&j_inv, &q)
    }

    fn zero() -> Self {
        SE3Tangent {
            data: Vector6::zeros(),
        }
    }

    fn random() -> Self {
        SE3Tangent {
            data: Vector6::from_fn(|_, _| rand::random::<f64>() * 2.0 - 1.0),
        }
    }

    fn from_dvector(vector: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(vector, Self::DIM)?;
        Ok(SE3Tangent {
            data: Vector6::from_column_slice(vector.as_slice()),
        })
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.data.as_slice())
    }
}
