//! Bundle-adjustment-in-the-large reprojection factor with dual-number Jacobians.

use super::{Factor, FactorError, FactorEvaluation, FactorResult, check_arity, variable};
use super::projection_factor::to_dvector;
use crate::camera::autodiff::{SnavelyCamera, snavely_project, snavely_project_with_jacobians};
use crate::core::{Evaluation, JacobianMode, Value};
use crate::manifold::DynamicJacobian;
use nalgebra::{DVector, Vector2, Vector3};

/// Reprojection error for a Snavely camera stored as a 9-vector
/// `[angle-axis(3), t(3), f, k1, k2]` and a point.
///
/// The measurement lives in the Snavely image frame: centered on the principal point with the y
/// axis pointing up (see [`snavely_measurement`](crate::camera::autodiff::snavely_measurement)).
#[derive(Debug, Clone, PartialEq)]
pub struct SnavelyProjectionFactor {
    measured: Vector2<f64>,
}

impl SnavelyProjectionFactor {
    pub fn new(measured: Vector2<f64>) -> Self {
        SnavelyProjectionFactor { measured }
    }
}

fn snavely_camera(vector: &DVector<f64>) -> FactorResult<SnavelyCamera> {
    if vector.len() != 9 {
        return Err(FactorError::InvalidDimension {
            expected: 9,
            actual: vector.len(),
        }
        .log());
    }
    Ok(SnavelyCamera::from_column_slice(vector.as_slice()))
}

impl Factor for SnavelyProjectionFactor {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 2)?;
        let camera = snavely_camera(variable(values, 0)?)?;
        let point: &Vector3<f64> = variable(values, 1)?;

        Ok(match mode {
            JacobianMode::ValueOnly => {
                let pixel = snavely_project(&camera, point)?;
                Evaluation::ValueOnly(to_dvector(&(pixel - self.measured)))
            }
            JacobianMode::WithJacobians => {
                let (pixel, d_camera, d_point) = snavely_project_with_jacobians(&camera, point)?;
                Evaluation::WithJacobians(
                    to_dvector(&(pixel - self.measured)),
                    vec![d_camera.to_dmatrix(), d_point.to_dmatrix()],
                )
            }
        })
    }
}
