//! Rn - n-dimensional Euclidean space
//!
//! Points and plain parameter vectors retract by addition, so the local coordinates are a
//! difference and the local-coordinates Jacobian is the identity.

use crate::manifold::{Manifold, ManifoldError, ManifoldResult, check_tangent};
use nalgebra::{DMatrix, DVector, Vector3};

impl Manifold for Vector3<f64> {
    fn tangent_dim(&self) -> usize {
        3
    }

    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(delta, 3)?;
        Ok(self + Vector3::new(delta[0], delta[1], delta[2]))
    }

    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>> {
        let d = other - self;
        Ok(DVector::from_column_slice(d.as_slice()))
    }

    fn local_coordinates_jacobian(&self, _other: &Self) -> ManifoldResult<DMatrix<f64>> {
        Ok(DMatrix::identity(3, 3))
    }
}

impl Manifold for DVector<f64> {
    fn tangent_dim(&self) -> usize {
        self.len()
    }

    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(delta, self.len())?;
        Ok(self + delta)
    }

    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>> {
        if other.len() != self.len() {
            return Err(ManifoldError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(other - self)
    }

    fn local_coordinates_jacobian(&self, other: &Self) -> ManifoldResult<DMatrix<f64>> {
        if other.len() != self.len() {
            return Err(ManifoldError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(DMatrix::identity(self.len(), self.len()))
    }
}
