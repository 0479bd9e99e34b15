//! Gaussian noise models.
//!
//! Whitening scales residuals and Jacobians by `Σ^{-1/2}`, so the squared whitened norm is the
//! Mahalanobis distance of the residual.

use crate::core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    /// Identity covariance
    Unit { dim: usize },
    /// `σ²·I`
    Isotropic { dim: usize, sigma: f64 },
    /// `diag(σ₀², …, σₙ²)`
    Diagonal { sigmas: DVector<f64> },
}

fn check_sigma(sigma: f64) -> CoreResult<()> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(
            CoreError::InvalidNoiseModel(format!("sigma must be positive, got {sigma}")).log(),
        );
    }
    Ok(())
}

impl NoiseModel {
    pub fn unit(dim: usize) -> Self {
        NoiseModel::Unit { dim }
    }

    pub fn isotropic(dim: usize, sigma: f64) -> CoreResult<Self> {
        check_sigma(sigma)?;
        Ok(NoiseModel::Isotropic { dim, sigma })
    }

    pub fn diagonal(sigmas: DVector<f64>) -> CoreResult<Self> {
        for &sigma in sigmas.iter() {
            check_sigma(sigma)?;
        }
        Ok(NoiseModel::Diagonal { sigmas })
    }

    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Unit { dim } | NoiseModel::Isotropic { dim, .. } => *dim,
            NoiseModel::Diagonal { sigmas } => sigmas.len(),
        }
    }

    /// Standard deviation of row `i`, `None` past the last row.
    pub fn sigma(&self, i: usize) -> Option<f64> {
        if i >= self.dim() {
            return None;
        }
        match self {
            NoiseModel::Unit { .. } => Some(1.0),
            NoiseModel::Isotropic { sigma, .. } => Some(*sigma),
            NoiseModel::Diagonal { sigmas } => sigmas.get(i).copied(),
        }
    }

    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        match self {
            NoiseModel::Unit { .. } => residual.clone(),
            NoiseModel::Isotropic { sigma, .. } => residual / *sigma,
            NoiseModel::Diagonal { sigmas } => residual.component_div(sigmas),
        }
    }

    pub fn whiten_jacobian(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            NoiseModel::Unit { .. } => jacobian.clone(),
            NoiseModel::Isotropic { sigma, .. } => jacobian / *sigma,
            NoiseModel::Diagonal { sigmas } => {
                let mut whitened = jacobian.clone();
                for (mut row, sigma) in whitened.row_iter_mut().zip(sigmas.iter()) {
                    row /= *sigma;
                }
                whitened
            }
        }
    }

    /// Squared Mahalanobis norm `‖Σ^{-1/2} r‖²`.
    pub fn squared_mahalanobis(&self, residual: &DVector<f64>) -> f64 {
        self.whiten(residual).norm_squared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_isotropic_whitening() -> TestResult {
        let noise = NoiseModel::isotropic(2, 0.5)?;
        let r = DVector::from_vec(vec![1.0, -2.0]);
        assert_eq!(noise.whiten(&r).as_slice(), &[2.0, -4.0]);
        assert_eq!(noise.squared_mahalanobis(&r), 20.0);
        Ok(())
    }

    #[test]
    fn test_diagonal_whitens_rows() -> TestResult {
        let noise = NoiseModel::diagonal(DVector::from_vec(vec![1.0, 2.0, 4.0]))?;
        let j = DMatrix::from_element(3, 2, 8.0);
        let w = noise.whiten_jacobian(&j);
        assert_eq!(w.row(0).iter().copied().collect::<Vec<_>>(), vec![8.0, 8.0]);
        assert_eq!(w.row(1).iter().copied().collect::<Vec<_>>(), vec![4.0, 4.0]);
        assert_eq!(w.row(2).iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
        assert_eq!(noise.dim(), 3);
        assert_eq!(noise.sigma(2), Some(4.0));
        assert_eq!(noise.sigma(3), None);
        Ok(())
    }

    #[test]
    fn test_invalid_sigma_rejected() {
        assert!(NoiseModel::isotropic(2, 0.0).is_err());
        assert!(NoiseModel::isotropic(2, f64::NAN).is_err());
        assert!(NoiseModel::diagonal(DVector::from_vec(vec![1.0, -1.0])).is_err());
    }

    #[test]
    fn test_unit_is_identity() {
        let noise = NoiseModel::unit(3);
        let r = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(noise.whiten(&r), r);
        assert_eq!(noise.dim(), 3);
    }

    #[test]
    fn test_sigma_out_of_range() -> TestResult {
        assert_eq!(NoiseModel::unit(2).sigma(1), Some(1.0));
        assert_eq!(NoiseModel::unit(2).sigma(2), None);
        let isotropic = NoiseModel::isotropic(3, 0.5)?;
        assert_eq!(isotropic.sigma(0), Some(0.5));
        assert_eq!(isotropic.sigma(7), None);
        Ok(())
    }
}
