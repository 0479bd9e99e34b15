//! Sparse linear solvers for the damped normal equations.
//!
//! The optimizer hands over the whitened sparse Jacobian `J` and residual `r` and gets back the
//! step `dx` solving `(JᵀJ + λI)·dx = −Jᵀr`. Two `faer` backends are provided: sparse Cholesky
//! (LLᵀ, the default) and sparse QR.

pub mod cholesky;
pub mod qr;

use crate::core::{Key, Ordering};
use faer::{
    Mat,
    sparse::{SparseColMat, SymbolicSparseColMatRef, Triplet},
};
use std::{
    collections::BTreeMap,
    fmt,
    fmt::{Display, Formatter},
    ops::Mul,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    #[default]
    SparseCholesky,
    SparseQR,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::SparseCholesky => write!(f, "Sparse Cholesky"),
            LinearSolverType::SparseQR => write!(f, "Sparse QR"),
        }
    }
}

/// Linear algebra specific error types for apex-sfm
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, QR, etc.)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix, or a non-finite solution
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    /// Matrix format conversion failed
    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Example
    /// ```ignore
    /// SymbolicLlt::try_new(matrix.symbolic(), Side::Lower)
    ///     .map_err(|e| {
    ///         LinAlgError::FactorizationFailed(
    ///             "Symbolic Cholesky decomposition failed".to_string()
    ///         )
    ///         .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Trait for sparse linear solvers that can solve both normal and augmented equations
pub trait SparseLinearSolver {
    /// Solve the normal equation: (J^T * J) * dx = -J^T * r
    ///
    /// # Errors
    /// `SingularMatrix` when the factorization fails numerically or the step is not finite,
    /// `FactorizationFailed` when the symbolic analysis fails.
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>>;

    /// Solve the augmented equation: (J^T * J + λI) * dx = -J^T * r
    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>>;

    /// Get the cached Hessian matrix (J^T * J) from the last solve
    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>>;

    /// Get the cached gradient vector (J^T * r) from the last solve
    fn get_gradient(&self) -> Option<&Mat<f64>>;

    /// Compute the covariance matrix `H⁻¹` from the last factorization.
    ///
    /// Only meaningful after [`solve_normal_equation`](Self::solve_normal_equation): after an
    /// augmented solve the factorization includes the damping.
    fn compute_covariance_matrix(&mut self) -> Option<&Mat<f64>>;

    /// Get the cached covariance matrix, `None` if it has not been computed yet.
    fn get_covariance_matrix(&self) -> Option<&Mat<f64>>;
}

pub use cholesky::SparseCholeskySolver;
pub use qr::SparseQRSolver;

pub fn create_linear_solver(solver_type: LinearSolverType) -> Box<dyn SparseLinearSolver> {
    match solver_type {
        LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
        LinearSolverType::SparseQR => Box::new(SparseQRSolver::new()),
    }
}

/// `H = JᵀJ` and `g = Jᵀr`.
pub(crate) fn normal_equations(
    residuals: &Mat<f64>,
    jacobians: &SparseColMat<usize, f64>,
) -> LinAlgResult<(SparseColMat<usize, f64>, Mat<f64>)> {
    if residuals.nrows() != jacobians.nrows() || residuals.ncols() != 1 {
        return Err(LinAlgError::MatrixConversion(format!(
            "residual is {}x{} for a Jacobian with {} rows",
            residuals.nrows(),
            residuals.ncols(),
            jacobians.nrows()
        ))
        .log());
    }
    let hessian = jacobians
        .as_ref()
        .transpose()
        .to_col_major()
        .map_err(|e| {
            LinAlgError::MatrixConversion(
                "Failed to convert transposed Jacobian to column-major format".to_string(),
            )
            .log_with_source(e)
        })?
        .mul(jacobians.as_ref());
    let gradient = jacobians.as_ref().transpose().mul(residuals);
    Ok((hessian, gradient))
}

/// `H + λI`. The diagonal is always present in the result, so the sparsity pattern does not
/// depend on `λ`.
pub(crate) fn add_damping(
    hessian: &SparseColMat<usize, f64>,
    lambda: f64,
) -> LinAlgResult<SparseColMat<usize, f64>> {
    let n = hessian.ncols();
    let diagonal: Vec<Triplet<usize, usize, f64>> =
        (0..n).map(|i| Triplet::new(i, i, lambda)).collect();
    let lambda_i = SparseColMat::try_new_from_triplets(n, n, &diagonal).map_err(|e| {
        LinAlgError::SparseMatrixCreation("Failed to create lambda*I matrix".to_string())
            .log_with_source(e)
    })?;
    Ok(hessian.as_ref() + lambda_i)
}

/// A NaN or Inf in the solution means the system was numerically singular.
pub(crate) fn check_step(step: Mat<f64>) -> LinAlgResult<Mat<f64>> {
    let finite = (0..step.nrows()).all(|i| (0..step.ncols()).all(|j| step[(i, j)].is_finite()));
    if finite {
        Ok(step)
    } else {
        Err(LinAlgError::SingularMatrix.log())
    }
}

/// Sparsity pattern a cached symbolic factorization was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SparsityPattern {
    nrows: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
}

impl SparsityPattern {
    pub(crate) fn of(symbolic: SymbolicSparseColMatRef<'_, usize>) -> Self {
        SparsityPattern {
            nrows: symbolic.nrows(),
            col_ptr: symbolic.col_ptr().to_vec(),
            row_idx: symbolic.row_idx().to_vec(),
        }
    }

    pub(crate) fn matches(&self, symbolic: SymbolicSparseColMatRef<'_, usize>) -> bool {
        self.nrows == symbolic.nrows()
            && self.col_ptr == symbolic.col_ptr()
            && self.row_idx == symbolic.row_idx()
    }
}

/// Cut the per-key diagonal blocks out of a full tangent-space covariance.
pub fn marginal_covariances(
    full_covariance: &Mat<f64>,
    ordering: &Ordering,
) -> BTreeMap<Key, Mat<f64>> {
    ordering
        .keys()
        .filter_map(|key| {
            let offset = ordering.offset(key)?;
            let dim = ordering.dim(key)?;
            if offset + dim > full_covariance.nrows() || offset + dim > full_covariance.ncols() {
                return None;
            }
            let block = Mat::from_fn(dim, dim, |i, j| full_covariance[(offset + i, offset + j)]);
            Some((key, block))
        })
        .collect()
}

/// Dense copy of a sparse matrix, for assertions.
#[cfg(test)]
pub(crate) fn to_dense(matrix: &SparseColMat<usize, f64>) -> nalgebra::DMatrix<f64> {
    let symbolic = matrix.symbolic();
    let (col_ptr, row_idx, val) = (symbolic.col_ptr(), symbolic.row_idx(), matrix.val());
    let mut dense = nalgebra::DMatrix::zeros(matrix.nrows(), matrix.ncols());
    for col in 0..matrix.ncols() {
        for k in col_ptr[col]..col_ptr[col + 1] {
            dense[(row_idx[k], col)] += val[k];
        }
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Values;
    use crate::manifold::LieGroup;
    use crate::manifold::se2::SE2;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_damping_keeps_pattern() -> TestResult {
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(1, 0, 2.0)];
        let jacobian = SparseColMat::try_new_from_triplets(2, 2, &triplets)?;
        let residuals = Mat::from_fn(2, 1, |i, _| i as f64);
        let (hessian, gradient) = normal_equations(&residuals, &jacobian)?;
        assert_eq!(gradient[(0, 0)], 2.0);

        let small = add_damping(&hessian, 1e-9)?;
        let large = add_damping(&hessian, 1e3)?;
        assert!(SparsityPattern::of(small.symbolic()).matches(large.symbolic()));
        assert!(!SparsityPattern::of(small.symbolic()).matches(hessian.symbolic()));
        Ok(())
    }

    #[test]
    fn test_non_finite_step_is_singular() {
        let step = Mat::from_fn(3, 1, |i, _| if i == 1 { f64::NAN } else { 0.0 });
        assert!(matches!(check_step(step), Err(LinAlgError::SingularMatrix)));
    }

    #[test]
    fn test_marginal_covariances() -> TestResult {
        let mut values = Values::new();
        values.insert(Key::new('l', 0), Vector3::zeros())?;
        values.insert(Key::new('x', 0), SE2::identity())?;
        let ordering = Ordering::from_values(&values);
        let full = Mat::from_fn(6, 6, |i, j| (i * 6 + j) as f64);

        let marginals = marginal_covariances(&full, &ordering);
        let pose = marginals.get(&Key::new('x', 0)).ok_or("missing pose block")?;
        assert_eq!(pose.nrows(), 3);
        assert_eq!(pose[(0, 0)], 21.0);
        assert_eq!(pose[(2, 2)], 35.0);
        Ok(())
    }
}
