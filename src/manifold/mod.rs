//! Manifold representations of the estimated variables.
//!
//! Every variable the optimizer touches lives on a smooth manifold with a fixed-size tangent
//! space. Updates computed by the linear solver are tangent vectors, mapped back onto the
//! manifold with a retraction:
//!
//! ```text
//! retract(x, d)          = x ∘ Exp(d)
//! local_coordinates(x, y) = Log(x⁻¹ ∘ y)
//! ```
//!
//! Lie group M,° | size | dim | X ∈ M             | T_X M        | Comp. | Action
//! ------------- | ---- | --- | ----------------- | ------------ | ----- | ------
//! n-D vector    | n    | n   | v ∈ Rⁿ            | v ∈ Rⁿ       | v₁+v₂ | v + x
//! Rotation      | 9    | 3   | R, RᵀR = I        | [θ] ∈ R³     | R₁R₂  | Rx
//! Rigid motion  | 9    | 3   | M = [R t; 0 1]    | [x y θ] ∈ R³ | M₁M₂  | Rx+t
//! Rigid motion  | 16   | 6   | M = [R t; 0 1]    | [ρ θ] ∈ R⁶   | M₁M₂  | Rx+t
//!
//! The tangent dimension never depends on the base point, so the column layout of the sparse
//! system is stable across iterations.

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, Vector3};
use std::fmt::Debug;
use std::ops::{Mul, Neg};
use std::{
    error, fmt,
    fmt::{Display, Formatter},
};

pub mod rn;
pub mod se2;
pub mod se3;
pub mod so3;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Tangent vector has the wrong number of components for this manifold
    InvalidTangentDimension { expected: usize, actual: usize },
    /// Two elements of a dynamically sized manifold do not share a dimension
    DimensionMismatch { expected: usize, actual: usize },
    /// NaN or Inf detected in a manifold element or tangent vector
    InvalidNumber,
    /// Construction input does not describe a valid element
    InvalidElement(String),
}

impl Display for ManifoldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::InvalidTangentDimension { expected, actual } => {
                write!(
                    f,
                    "Invalid tangent dimension: expected {expected}, got {actual}"
                )
            }
            ManifoldError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
            ManifoldError::InvalidNumber => {
                write!(f, "Invalid number: NaN or Inf detected")
            }
            ManifoldError::InvalidElement(msg) => {
                write!(f, "Invalid manifold element: {msg}")
            }
        }
    }
}

impl error::Error for ManifoldError {}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Check that a tangent vector has the expected size and only finite entries.
pub(crate) fn check_tangent(delta: &DVector<f64>, expected: usize) -> ManifoldResult<()> {
    if delta.len() != expected {
        return Err(ManifoldError::InvalidTangentDimension {
            expected,
            actual: delta.len(),
        });
    }
    if delta.iter().any(|v| !v.is_finite()) {
        return Err(ManifoldError::InvalidNumber);
    }
    Ok(())
}

/// Skew-symmetric matrix `[v]×` such that `[v]× w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// A smooth manifold with a retraction and its local inverse.
///
/// This is the contract every variable stored in [`Values`](crate::core::values::Values)
/// satisfies. Implementations must obey the round-trip laws
/// `retract(x, local_coordinates(x, y)) == y` and `local_coordinates(x, x) == 0`.
pub trait Manifold: Clone + Debug {
    /// Dimension of the tangent space (independent of the base point).
    fn tangent_dim(&self) -> usize;

    /// Move `self` along the tangent vector `delta`.
    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self>;

    /// Tangent vector `d` such that `self.retract(d) == other`.
    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>>;

    /// Derivative of `self.local_coordinates(other)` with respect to a right perturbation of
    /// `other`.
    fn local_coordinates_jacobian(&self, other: &Self) -> ManifoldResult<DMatrix<f64>>;
}

/// Conversion of fixed-size Jacobians into the dynamic blocks used by factors.
pub trait DynamicJacobian {
    fn to_dmatrix(&self) -> DMatrix<f64>;
}

impl<const R: usize, const C: usize> DynamicJacobian for SMatrix<f64, R, C> {
    fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(R, C, self.as_slice())
    }
}

/// Core trait for Lie group operations.
///
/// Only the operations needed for manifold optimization are part of the trait: group
/// composition, inverse, logarithm and the adjoint. Jacobians of the exponential map live on
/// the associated [`Tangent`] type.
pub trait LieGroup: Clone + PartialEq + Debug {
    type TangentVector: Tangent<Self>;

    /// Square Jacobian matrix type, DOF × DOF.
    type JacobianMatrix: Clone
        + Debug
        + PartialEq
        + DynamicJacobian
        + Neg<Output = Self::JacobianMatrix>
        + Mul<Output = Self::JacobianMatrix>
        + std::ops::Index<(usize, usize), Output = f64>;

    fn identity() -> Self;

    fn inverse(&self) -> Self;

    fn compose(&self, other: &Self) -> Self;

    /// Logarithmic map to the tangent space at the identity.
    fn log(&self) -> Self::TangentVector;

    /// Adjoint matrix, `Ad(X)·τ = Log(X·Exp(τ)·X⁻¹)`.
    fn adjoint(&self) -> Self::JacobianMatrix;

    fn random() -> Self;

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool;

    /// `self⁻¹ ∘ other`
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Right plus: `self ∘ Exp(tangent)`.
    fn right_plus(&self, tangent: &Self::TangentVector) -> Self {
        self.compose(&tangent.exp())
    }

    /// Right minus: `Log(other⁻¹ ∘ self)`.
    fn right_minus(&self, other: &Self) -> Self::TangentVector {
        other.inverse().compose(self).log()
    }

    fn tangent_dim(&self) -> usize {
        Self::TangentVector::DIM
    }
}

/// Tangent space (Lie algebra in vector form) of a [`LieGroup`].
pub trait Tangent<Group: LieGroup>: Clone + PartialEq + Debug {
    const DIM: usize;

    /// Exponential map to the group.
    fn exp(&self) -> Group;

    fn right_jacobian(&self) -> Group::JacobianMatrix;

    fn left_jacobian(&self) -> Group::JacobianMatrix;

    fn right_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn left_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn zero() -> Self;

    fn random() -> Self;

    fn from_dvector(vector: &DVector<f64>) -> ManifoldResult<Self>;

    fn to_dvector(&self) -> DVector<f64>;

    fn is_zero(&self, tolerance: f64) -> bool {
        self.to_dvector().norm() < tolerance
    }
}

/// Lie groups are manifolds under the right retraction.
macro_rules! impl_manifold_for_lie_group {
    ($group:ty) => {
        impl $crate::manifold::Manifold for $group {
            fn tangent_dim(&self) -> usize {
                <<$group as $crate::manifold::LieGroup>::TangentVector as $crate::manifold::Tangent<$group>>::DIM
            }

            fn retract(
                &self,
                delta: &nalgebra::DVector<f64>,
            ) -> $crate::manifold::ManifoldResult<Self> {
                use $crate::manifold::{LieGroup, Tangent};
                let tangent = <$group as LieGroup>::TangentVector::from_dvector(delta)?;
                Ok(self.right_plus(&tangent))
            }

            fn local_coordinates(
                &self,
                other: &Self,
            ) -> $crate::manifold::ManifoldResult<nalgebra::DVector<f64>> {
                use $crate::manifold::{LieGroup, Tangent};
                Ok(other.right_minus(self).to_dvector())
            }

            fn local_coordinates_jacobian(
                &self,
                other: &Self,
            ) -> $crate::manifold::ManifoldResult<nalgebra::DMatrix<f64>> {
                use $crate::manifold::{DynamicJacobian, LieGroup, Tangent};
                Ok(other.right_minus(self).right_jacobian_inv().to_dmatrix())
            }
        }
    };
}

pub(crate) use impl_manifold_for_lie_group;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_matches_cross_product() {
        let v = Vector3::new(0.3, -1.2, 2.0);
        let w = Vector3::new(-0.7, 0.4, 0.9);
        assert!((skew(&v) * w - v.cross(&w)).norm() < 1e-14);
    }

    #[test]
    fn test_check_tangent_rejects_bad_input() {
        let short = DVector::from_vec(vec![0.0, 1.0]);
        assert_eq!(
            check_tangent(&short, 3),
            Err(ManifoldError::InvalidTangentDimension {
                expected: 3,
                actual: 2
            })
        );
        let nan = DVector::from_vec(vec![0.0, f64::NAN, 1.0]);
        assert_eq!(check_tangent(&nan, 3), Err(ManifoldError::InvalidNumber));
    }

    #[test]
    fn test_dynamic_jacobian_preserves_layout() {
        let m = nalgebra::Matrix2x3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let d = m.to_dmatrix();
        assert_eq!(d.nrows(), 2);
        assert_eq!(d.ncols(), 3);
        assert_eq!(d[(1, 2)], 6.0);
        assert_eq!(d[(0, 1)], 2.0);
    }
}
