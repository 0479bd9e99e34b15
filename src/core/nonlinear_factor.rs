//! Nonlinear factors: a [`Factor`] bound to its keys, a noise model and a [`FactorKind`].
//!
//! This is where residuals are whitened and where the factor's Jacobian blocks are checked
//! against the variables they refer to before they reach the sparse assembly.

use crate::core::key::format_keys;
use crate::core::linear::LinearFactor;
use crate::core::{CoreError, CoreResult, JacobianMode, Key, NoiseModel, Value, Values};
use crate::factors::{Factor, FactorError};
use nalgebra::{DMatrix, DVector};

/// Equality (least-squares) or inequality (`e[0] ≤ 0`) factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorKind {
    Equality,
    Inequality { dual_key: Key },
}

#[derive(Debug)]
pub struct NonlinearFactor {
    keys: Vec<Key>,
    factor: Box<dyn Factor>,
    noise_model: NoiseModel,
    kind: FactorKind,
}

impl NonlinearFactor {
    /// An equality factor. The noise model dimension must match the factor's residual.
    pub fn new<F: Factor + 'static>(
        keys: Vec<Key>,
        factor: F,
        noise_model: NoiseModel,
    ) -> CoreResult<Self> {
        Self::with_kind(keys, Box::new(factor), noise_model, FactorKind::Equality)
    }

    /// An inequality factor with its dual variable key.
    pub fn inequality<F: Factor + 'static>(
        keys: Vec<Key>,
        factor: F,
        noise_model: NoiseModel,
        dual_key: Key,
    ) -> CoreResult<Self> {
        Self::with_kind(
            keys,
            Box::new(factor),
            noise_model,
            FactorKind::Inequality { dual_key },
        )
    }

    pub fn with_kind(
        keys: Vec<Key>,
        factor: Box<dyn Factor>,
        noise_model: NoiseModel,
        kind: FactorKind,
    ) -> CoreResult<Self> {
        if noise_model.dim() != factor.dimension() {
            return Err(CoreError::DimensionMismatch(format!(
                "noise model of dimension {} for a factor of dimension {} on [{}]",
                noise_model.dim(),
                factor.dimension(),
                format_keys(&keys)
            ))
            .log());
        }
        if keys.is_empty() {
            return Err(CoreError::DimensionMismatch("factor without keys".to_string()).log());
        }
        Ok(NonlinearFactor {
            keys,
            factor,
            noise_model,
            kind,
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn kind(&self) -> FactorKind {
        self.kind
    }

    pub fn noise_model(&self) -> &NoiseModel {
        &self.noise_model
    }

    pub fn dimension(&self) -> usize {
        self.factor.dimension()
    }

    pub fn is_inequality(&self) -> bool {
        matches!(self.kind, FactorKind::Inequality { .. })
    }

    pub fn dual_key(&self) -> Option<Key> {
        match self.kind {
            FactorKind::Equality => None,
            FactorKind::Inequality { dual_key } => Some(dual_key),
        }
    }

    fn gather<'a>(&self, values: &'a Values) -> CoreResult<Vec<&'a Value>> {
        self.keys
            .iter()
            .map(|&key| values.get(key).map_err(CoreError::log))
            .collect()
    }

    fn wrap(&self, source: FactorError) -> CoreError {
        CoreError::Factor {
            keys: format_keys(&self.keys),
            source,
        }
    }

    fn check_residual(&self, residual: &DVector<f64>) -> CoreResult<()> {
        if residual.len() != self.dimension() {
            return Err(CoreError::DimensionMismatch(format!(
                "residual of length {} for a factor of dimension {} on [{}]",
                residual.len(),
                self.dimension(),
                format_keys(&self.keys)
            ))
            .log());
        }
        if residual.iter().any(|v| !v.is_finite()) {
            return Err(
                CoreError::NonFinite(format!("residual of factor on [{}]", format_keys(&self.keys)))
                    .log(),
            );
        }
        Ok(())
    }

    /// Residual before whitening.
    pub fn unwhitened_error(&self, values: &Values) -> CoreResult<DVector<f64>> {
        let variables = self.gather(values)?;
        let residual = self
            .factor
            .evaluate(&variables, JacobianMode::ValueOnly)
            .map_err(|e| self.wrap(e))?
            .into_value();
        self.check_residual(&residual)?;
        Ok(residual)
    }

    pub fn whitened_error(&self, values: &Values) -> CoreResult<DVector<f64>> {
        Ok(self.noise_model.whiten(&self.unwhitened_error(values)?))
    }

    /// Squared whitened residual norm `‖Σ^{-1/2} r‖²`.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        Ok(self.whitened_error(values)?.norm_squared())
    }

    /// Whether the constraint is active: `e[0] ≥ −tol`. Equality factors are always active.
    pub fn is_active(&self, values: &Values, tolerance: f64) -> CoreResult<bool> {
        match self.kind {
            FactorKind::Equality => Ok(true),
            FactorKind::Inequality { .. } => {
                Ok(self.unwhitened_error(values)?[0] >= -tolerance)
            }
        }
    }

    /// First-order approximation at `values`: `‖Σ J_k·dx_k − b‖²` with `b = −whitened residual`.
    pub fn linearize(&self, values: &Values) -> CoreResult<LinearFactor> {
        let variables = self.gather(values)?;
        let (residual, jacobians) = self
            .factor
            .evaluate(&variables, JacobianMode::WithJacobians)
            .map_err(|e| self.wrap(e))?
            .into_parts();
        self.check_residual(&residual)?;
        let jacobians = jacobians.ok_or_else(|| {
            CoreError::DimensionMismatch(format!(
                "factor on [{}] returned no Jacobians",
                format_keys(&self.keys)
            ))
            .log()
        })?;
        self.check_jacobians(&variables, &jacobians)?;

        let whitened_jacobians = jacobians
            .iter()
            .map(|j| self.noise_model.whiten_jacobian(j))
            .collect();
        let rhs = -self.noise_model.whiten(&residual);
        Ok(LinearFactor::new(
            self.keys.clone(),
            whitened_jacobians,
            rhs,
            self.kind,
        ))
    }

    fn check_jacobians(&self, variables: &[&Value], jacobians: &[DMatrix<f64>]) -> CoreResult<()> {
        if jacobians.len() != variables.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "{} Jacobian blocks for {} keys on [{}]",
                jacobians.len(),
                variables.len(),
                format_keys(&self.keys)
            ))
            .log());
        }
        for ((key, variable), jacobian) in self.keys.iter().zip(variables).zip(jacobians) {
            let expected = (self.dimension(), variable.dim());
            if jacobian.shape() != expected {
                return Err(CoreError::DimensionMismatch(format!(
                    "Jacobian block for {key} is {:?}, expected {:?}",
                    jacobian.shape(),
                    expected
                ))
                .log());
            }
            if jacobian.iter().any(|v| !v.is_finite()) {
                return Err(CoreError::NonFinite(format!("Jacobian block for {key}")).log());
            }
        }
        Ok(())
    }
}
