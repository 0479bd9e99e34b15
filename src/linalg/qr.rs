use faer::{
    Mat,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Qr, SymbolicQr},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, SparsityPattern, add_damping, check_step,
    normal_equations,
};

/// Sparse QR solver for the (damped) normal equations.
///
/// Slower than [`SparseCholeskySolver`](crate::linalg::SparseCholeskySolver) but does not need
/// the matrix to be numerically positive definite to factor it.
#[derive(Debug, Clone, Default)]
pub struct SparseQRSolver {
    factorizer: Option<Qr<usize, f64>>,
    symbolic_factorization: Option<(SparsityPattern, SymbolicQr<usize>)>,
    hessian: Option<SparseColMat<usize, f64>>,
    gradient: Option<Mat<f64>>,
    covariance_matrix: Option<Mat<f64>>,
}

impl SparseQRSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn symbolic_for(&mut self, matrix: &SparseColMat<usize, f64>) -> LinAlgResult<SymbolicQr<usize>> {
        if let Some((pattern, symbolic)) = &self.symbolic_factorization
            && pattern.matches(matrix.symbolic())
        {
            return Ok(symbolic.clone());
        }
        let symbolic = SymbolicQr::try_new(matrix.symbolic()).map_err(|e| {
            LinAlgError::FactorizationFailed("Symbolic QR decomposition failed".to_string())
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
        let qr = Qr::try_new_with_symbolic(symbolic, matrix.as_ref())
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        // a rank-deficient R yields Inf/NaN here rather than a factorization error
        let dx = check_step(qr.solve(-&gradient))?;
        self.hessian = Some(hessian);
        self.gradient = Some(gradient);
        self.factorizer = Some(qr);
        self.covariance_matrix = None;
        Ok(dx)
    }
}

impl SparseLinearSolver for SparseQRSolver {
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
            let identity = Mat::<f64>::identity(n, n);
            self.covariance_matrix = Some(factorizer.solve(&identity));
        }
        self.covariance_matrix.as_ref()
    }

    fn get_covariance_matrix(&self) -> Option<&Mat<f64>> {
        self.covariance_matrix.as_ref()
    }
}
