use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, SparsityPattern, add_damping, check_step,
    normal_equations,
};

/// Sparse LLᵀ solver for the (damped) normal equations.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    factorizer: Option<Llt<usize, f64>>,

    /// Symbolic factorization and the pattern it was computed for.
    ///
    /// Recomputed whenever the pattern of the matrix to factor changes, e.g. when switching
    /// between the plain and the damped system.
    symbolic_factorization: Option<(SparsityPattern, SymbolicLlt<usize>)>,

    /// `JᵀJ` from the last solve, without damping.
    hessian: Option<SparseColMat<usize, f64>>,

    /// `Jᵀr` from the last solve.
    gradient: Option<Mat<f64>>,

    covariance_matrix: Option<Mat<f64>>,
    standard_errors: Option<Mat<f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Square roots of the covariance diagonal, `None` if a variance came out negative.
    pub fn compute_standard_errors(&mut self) -> Option<&Mat<f64>> {
        if self.covariance_matrix.is_none() {
            self.compute_covariance_matrix();
        }
        let cov = self.covariance_matrix.as_ref()?;
        let n = cov.nrows();
        if (0..n).any(|i| cov[(i, i)] < 0.0) {
            return None;
        }
        self.standard_errors = Some(Mat::from_fn(n, 1, |i, _| cov[(i, i)].sqrt()));
        self.standard_errors.as_ref()
    }

    fn symbolic_for(&mut self, matrix: &SparseColMat<usize, f64>) -> LinAlgResult<SymbolicLlt<usize>> {
        if let Some((pattern, symbolic)) = &self.symbolic_factorization
            && pattern.matches(matrix.symbolic())
        {
            // reference counted: the clone is O(1)
            return Ok(symbolic.clone());
        }
        let symbolic = SymbolicLlt::try_new(matrix.symbolic(), Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed("Symbolic Cholesky decomposition failed".to_string())
                .log_with_source(e)
        })?;
        self.symbolic_factorization = Some((SparsityPattern::of(matrix.symbolic()), symbolic.clone()));
        Ok(symbolic)
    }

    fn factor_and_solve(
        &mut self,
        matrix: &SparseColMat<usize, f64>,
        hessian: SparseColMat<usize, f64>,
        gradient: Mat<f64>,
    ) -> LinAlgResult<Mat<f64>> {
        let symbolic = self.symbolic_for(matrix)?;
        let cholesky = Llt::try_new_with_symbolic(symbolic, matrix.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        let dx = check_step(cholesky.solve(-&gradient))?;
        self.hessian = Some(hessian);
        self.gradient = Some(gradient);
        self.factorizer = Some(cholesky);
        self.covariance_matrix = None;
        self.standard_errors = None;
        Ok(dx)
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>> {
        let (hessian, gradient) = normal_equations(residuals, jacobians)?;
        let matrix = hessian.clone();
        self.factor_and_solve(&matrix, hessian, gradient)
    }

    fn solve_augmented_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
        lambda: f64,
    ) -> LinAlgResult<Mat<f64>> {
        let (hessian, gradient) = normal_equations(residuals, jacobians)?;
        let augmented = add_damping(&hessian, lambda)?;
        self.factor_and_solve(&augmented, hessian, gradient)
    }

    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>> {
        self.hessian.as_ref()
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }

    fn compute_covariance_matrix(&mut self) -> Option<&Mat<f64>> {
        if self.covariance_matrix.is_none()
            && let (Some(factorizer), Some(hessian)) = (&self.factorizer, &self.hessian)
        {
            let n = hessian.ncols();
            // H X = I
            let identity = Mat::<f64>::identity(n, n);
            self.covariance_matrix = Some(factorizer.solve(&identity));
        }
        self.covariance_matrix.as_ref()
    }

    fn get_covariance_matrix(&self) -> Option<&Mat<f64>> {
        self.covariance_matrix.as_ref()
    }
}
