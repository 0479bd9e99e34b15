//! Reprojection factor with a fixed, shared calibration.

use super::{Factor, FactorEvaluation, FactorResult, check_arity, variable};
use crate::camera::{Cal3Bundler, PinholeCamera};
use crate::core::{Evaluation, JacobianMode, Value};
use crate::manifold::{DynamicJacobian, se3::SE3};
use nalgebra::{DVector, Vector2, Vector3};
use std::sync::Arc;

/// Reprojection error of a 3D point observed by a camera pose with known calibration.
///
/// Variables: `[pose (SE3), point (Point3)]`. The calibration is shared between all factors
/// observed by the same camera, hence the `Arc`.
///
/// ```text
/// r = π(K, X_pose, P) − z
/// ```
#[derive(Debug, Clone)]
pub struct ProjectionFactor {
    measured: Vector2<f64>,
    calibration: Arc<Cal3Bundler>,
}

impl ProjectionFactor {
    pub fn new(measured: Vector2<f64>, calibration: Arc<Cal3Bundler>) -> Self {
        ProjectionFactor {
            measured,
            calibration,
        }
    }

    pub fn measured(&self) -> &Vector2<f64> {
        &self.measured
    }

    pub fn calibration(&self) -> &Cal3Bundler {
        &self.calibration
    }
}

impl Factor for ProjectionFactor {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 2)?;
        let pose: &SE3 = variable(values, 0)?;
        let point: &Vector3<f64> = variable(values, 1)?;
        let camera = PinholeCamera::new(pose.clone(), (*self.calibration).clone());

        Ok(match mode {
            JacobianMode::ValueOnly => {
                let pixel = camera.project(point)?;
                Evaluation::ValueOnly(to_dvector(&(pixel - self.measured)))
            }
            JacobianMode::WithJacobians => {
                let jacobians = camera.project_with_jacobians(point)?;
                Evaluation::WithJacobians(
                    to_dvector(&(jacobians.pixel - self.measured)),
                    vec![jacobians.dpose.to_dmatrix(), jacobians.dpoint.to_dmatrix()],
                )
            }
        })
    }
}

pub(crate) fn to_dvector(v: &Vector2<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}
