use super::{Factor, FactorEvaluation, FactorResult, check_arity, variable};
use crate::core::{Evaluation, JacobianMode, Value, VariableType};
use crate::manifold::{DynamicJacobian, LieGroup, Tangent};

/// Generic between factor for Lie group pose constraints.
///
/// Represents a relative pose measurement `Z` between two poses `X_i` and `X_j`. Works for any
/// Lie group stored in [`Values`](crate::core::Values); in practice SE(2) for planar SLAM and
/// SE(3) for 3D pose graphs.
///
/// # Mathematical Formulation
///
/// ```text
/// H = X_i⁻¹ ∘ X_j
/// r = Log(Z⁻¹ ∘ H)
/// ```
///
/// # Jacobian Computation
///
/// With right perturbations on both poses:
///
/// ```text
/// ∂r/∂X_j = Jr⁻¹(r)
/// ∂r/∂X_i = −Jr⁻¹(r) · Ad(H⁻¹)
/// ```
///
/// # Example
///
/// ```
/// use apex_sfm::core::{JacobianMode, Value};
/// use apex_sfm::factors::{BetweenFactor, Factor};
/// use apex_sfm::manifold::se2::SE2;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
/// // Measurement: robot moved 1m forward and rotated 0.1 rad
/// let between = BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.1));
///
/// let pose_i = Value::Pose2(SE2::from_xy_angle(0.0, 0.0, 0.0));
/// let pose_j = Value::Pose2(SE2::from_xy_angle(0.95, 0.05, 0.12));
///
/// let (residual, jacobians) = between
///     .evaluate(&[&pose_i, &pose_j], JacobianMode::WithJacobians)?
///     .into_parts();
/// assert_eq!(residual.len(), 3);
/// assert_eq!(jacobians.map(|j| j.len()), Some(2));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenFactor<T>
where
    T: LieGroup + VariableType,
{
    /// The measured relative pose transformation between the two connected poses
    pub relative_pose: T,
}

impl<T> BetweenFactor<T>
where
    T: LieGroup + VariableType,
{
    pub fn new(relative_pose: T) -> Self {
        Self { relative_pose }
    }
}

impl<T> Factor for BetweenFactor<T>
where
    T: LieGroup + VariableType + Send + Sync,
{
    fn dimension(&self) -> usize {
        T::TangentVector::DIM
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 2)?;
        let pose_i: &T = variable(values, 0)?;
        let pose_j: &T = variable(values, 1)?;

        let relative = LieGroup::between(pose_i, pose_j);
        let error = self.relative_pose.inverse().compose(&relative).log();
        let residual = error.to_dvector();

        Ok(match mode {
            JacobianMode::ValueOnly => Evaluation::ValueOnly(residual),
            JacobianMode::WithJacobians => {
                let jr_inv = error.right_jacobian_inv();
                let j_i = -(jr_inv.clone() * relative.inverse().adjoint());
                Evaluation::WithJacobians(residual, vec![j_i.to_dmatrix(), jr_inv.to_dmatrix()])
            }
        })
    }
}
