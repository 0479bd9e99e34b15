//! Prior factor for unary constraints on variables.

use super::{Factor, FactorEvaluation, FactorResult, check_arity, variable};
use crate::core::{Evaluation, JacobianMode, Value, VariableType};

/// Prior factor (unary constraint) on a single variable of any type.
///
/// # Mathematical Formulation
///
/// The residual is the tangent vector from the prior to the current value:
///
/// ```text
/// r = local_coordinates(x_prior, x)
/// ```
///
/// For Lie groups this is `Log(x_prior⁻¹ ∘ x)` with Jacobian `Jr⁻¹(r)`; for Euclidean types the
/// difference `x − x_prior` with an identity Jacobian.
///
/// # Use Cases
///
/// - **Gauge fixing**: anchor the first camera and point of a bundle adjustment problem
/// - **Anchoring**: fix the first pose of a pose graph
/// - **Prior knowledge**: known calibration or GPS position
///
/// # Example
///
/// ```
/// use apex_sfm::core::{JacobianMode, Value};
/// use apex_sfm::factors::{Factor, PriorFactor};
/// use apex_sfm::manifold::se2::SE2;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
/// let prior = PriorFactor::new(SE2::from_xy_angle(0.0, 0.0, 0.0));
/// let current = Value::Pose2(SE2::from_xy_angle(0.1, 0.05, 0.02));
///
/// let evaluation = prior.evaluate(&[&current], JacobianMode::WithJacobians)?;
/// let (residual, jacobians) = evaluation.into_parts();
/// assert_eq!(residual.len(), 3);
/// assert_eq!(jacobians.map(|j| j.len()), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PriorFactor<T: VariableType> {
    /// The prior value (measurement or known value)
    pub prior: T,
}

impl<T: VariableType> PriorFactor<T> {
    pub fn new(prior: T) -> Self {
        PriorFactor { prior }
    }
}

impl<T> Factor for PriorFactor<T>
where
    T: VariableType + Send + Sync,
{
    fn dimension(&self) -> usize {
        self.prior.tangent_dim()
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 1)?;
        let x: &T = variable(values, 0)?;
        let residual = self.prior.local_coordinates(x)?;
        Ok(match mode {
            JacobianMode::ValueOnly => Evaluation::ValueOnly(residual),
            JacobianMode::WithJacobians => {
                let jacobian = self.prior.local_coordinates_jacobian(x)?;
                Evaluation::WithJacobians(residual, vec![jacobian])
            }
        })
    }
}
