//! SE(2) - Special Euclidean Group in 2D
//!
//! Planar rigid transformations, used by pose-graph SLAM. Elements are a `UnitComplex`
//! rotation plus a translation; tangent vectors are ordered `[x, y, θ]`.

use crate::manifold::{
    LieGroup, ManifoldResult, Tangent, check_tangent, impl_manifold_for_lie_group,
};
use nalgebra::{DVector, Isometry2, Matrix2, Matrix3, Translation2, UnitComplex, Vector2, Vector3};
use std::{
    f64::consts::PI,
    fmt,
    fmt::{Display, Formatter},
};

const SMALL_ANGLE: f64 = 1e-4;

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Debug, Clone, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl Display for SE2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.translation.x,
            self.translation.y,
            self.angle()
        )
    }
}

impl SE2 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 3;

    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        Self::new(Vector2::new(x, y), UnitComplex::new(theta))
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::from_parts(Translation2::from(self.translation), self.rotation)
    }

    /// Transform a point from the local frame into the parent frame.
    pub fn transform_from(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation * point + self.translation
    }
}

/// `V(θ) = [a, −b; b, a]` with `a = sin θ/θ`, `b = (1 − cos θ)/θ`.
fn v_coefficients(theta: f64) -> (f64, f64) {
    if theta.abs() < SMALL_ANGLE {
        (
            1.0 - theta * theta / 6.0,
            0.5 * theta - theta * theta * theta / 24.0,
        )
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta)
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;
    type JacobianMatrix = Matrix3<f64>;

    fn identity() -> Self {
        Self::new(Vector2::zeros(), UnitComplex::identity())
    }

    fn inverse(&self) -> Self {
        let rotation_inv = self.rotation.inverse();
        Self::new(-(rotation_inv * self.translation), rotation_inv)
    }

    fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.rotation * other.translation + self.translation,
            self.rotation * other.rotation,
        )
    }

    fn log(&self) -> SE2Tangent {
        let theta = self.angle();
        let (a, b) = v_coefficients(theta);
        let det = a * a + b * b;
        // V⁻¹ = [a, b; −b, a] / (a² + b²)
        let t = self.translation;
        SE2Tangent::new(
            (a * t.x + b * t.y) / det,
            (-b * t.x + a * t.y) / det,
            theta,
        )
    }

    /// `Ad = [R, [y, −x]ᵀ; 0, 1]`
    fn adjoint(&self) -> Matrix3<f64> {
        let (s, c) = self.angle().sin_cos();
        Matrix3::new(
            c,
            -s,
            self.translation.y,
            s,
            c,
            -self.translation.x,
            0.0,
            0.0,
            1.0,
        )
    }

    fn random() -> Self {
        SE2Tangent::random().exp()
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).is_zero(tolerance)
    }
}

impl_manifold_for_lie_group!(SE2);

/// SE(2) tangent space element `[x, y, θ]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SE2Tangent {
    data: Vector3<f64>,
}

impl SE2Tangent {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent {
            data: Vector3::new(x, y, theta),
        }
    }

    pub fn coeffs(&self) -> Vector3<f64> {
        self.data
    }

    pub fn x(&self) -> f64 {
        self.data.x
    }

    pub fn y(&self) -> f64 {
        self.data.y
    }

    pub fn angle(&self) -> f64 {
        self.data.z
    }

    /// Third column of the right Jacobian, `J_r[0..2, 2]`.
    fn right_jacobian_column(&self) -> Vector2<f64> {
        let (x, y, theta) = (self.x(), self.y(), self.angle());
        if theta.abs() < SMALL_ANGLE {
            Vector2::new(-y / 2.0 + x * theta / 6.0, x / 2.0 + y * theta / 6.0)
        } else {
            let (s, c) = theta.sin_cos();
            let theta_sq = theta * theta;
            Vector2::new(
                (theta * x - y + y * c - x * s) / theta_sq,
                (x + theta * y - x * c - y * s) / theta_sq,
            )
        }
    }

    /// Third column of the left Jacobian, `J_l[0..2, 2]`.
    fn left_jacobian_column(&self) -> Vector2<f64> {
        let (x, y, theta) = (self.x(), self.y(), self.angle());
        if theta.abs() < SMALL_ANGLE {
            Vector2::new(y / 2.0 + x * theta / 6.0, -x / 2.0 + y * theta / 6.0)
        } else {
            let (s, c) = theta.sin_cos();
            let theta_sq = theta * theta;
            Vector2::new(
                (theta * x + y - y * c - x * s) / theta_sq,
                (-x + theta * y + x * c - y * s) / theta_sq,
            )
        }
    }
}

/// Assemble `[A, v; 0, 1]`.
fn block(a: &Matrix2<f64>, v: &Vector2<f64>) -> Matrix3<f64> {
    Matrix3::new(
        a[(0, 0)],
        a[(0, 1)],
        v.x,
        a[(1, 0)],
        a[(1, 1)],
        v.y,
        0.0,
        0.0,
        1.0,
    )
}

/// Inverse of `[A, v; 0, 1]` is `[A⁻¹, −A⁻¹v; 0, 1]`; `A` is a scaled rotation.
fn block_inverse(a: &Matrix2<f64>, v: &Vector2<f64>) -> Matrix3<f64> {
    let det = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)];
    let a_inv = Matrix2::new(a[(1, 1)], -a[(0, 1)], -a[(1, 0)], a[(0, 0)]) / det;
    block(&a_inv, &(-(a_inv * v)))
}

impl Tangent<SE2> for SE2Tangent {
    const DIM: usize = 3;

    fn exp(&self) -> SE2 {
        let theta = self.angle();
        let (a, b) = v_coefficients(theta);
        SE2::new(
            Vector2::new(a * self.x() - b * self.y(), b * self.x() + a * self.y()),
            UnitComplex::new(theta),
        )
    }

    /// `J_r = [a, b, ·; −b, a, ·; 0, 0, 1]`
    fn right_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = v_coefficients(self.angle());
        block(&Matrix2::new(a, b, -b, a), &self.right_jacobian_column())
    }

    /// `J_l = [a, −b, ·; b, a, ·; 0, 0, 1]`
    fn left_jacobian(&self) -> Matrix3<f64> {
        let (a, b) = v_coefficients(self.angle());
        block(&Matrix2::new(a, -b, b, a), &self.left_jacobian_column())
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let (a, b) = v_coefficients(self.angle());
        block_inverse(&Matrix2::new(a, b, -b, a), &self.right_jacobian_column())
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let (a, b) = v_coefficients(self.angle());
        block_inverse(&Matrix2::new(a, -b, b, a), &self.left_jacobian_column())
    }

    fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    fn random() -> Self {
        Self::new(
            rand::random::<f64>() * 2.0 - 1.0,
            rand::random::<f64>() * 2.0 - 1.0,
            (rand::random::<f64>() * 2.0 - 1.0) * PI * 0.9,
        )
    }

    fn from_dvector(vector: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(vector, Self::DIM)?;
        Ok(Self::new(vector[0], vector[1], vector[2]))
    }

    fn to_dvector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.data.as_slice())
    }
}
