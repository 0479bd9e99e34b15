//! Reprojection factor over a full camera (pose + calibration) and a point.

use super::projection_factor::to_dvector;
use super::{Factor, FactorEvaluation, FactorResult, check_arity, variable};
use crate::camera::PinholeCamera;
use crate::core::{Evaluation, JacobianMode, Value};
use crate::manifold::DynamicJacobian;
use nalgebra::{DMatrix, Vector2, Vector3};

/// Reprojection error with the calibration optimized jointly with the pose.
///
/// Variables: `[camera (PinholeCamera, 9 DOF), point (Point3)]`. The camera Jacobian is the
/// 2×9 block `[∂pixel/∂pose | ∂pixel/∂(f, k1, k2)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralSfmFactor {
    measured: Vector2<f64>,
}

impl GeneralSfmFactor {
    pub fn new(measured: Vector2<f64>) -> Self {
        GeneralSfmFactor { measured }
    }

    pub fn measured(&self) -> &Vector2<f64> {
        &self.measured
    }
}

impl Factor for GeneralSfmFactor {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 2)?;
        let camera: &PinholeCamera = variable(values, 0)?;
        let point: &Vector3<f64> = variable(values, 1)?;

        Ok(match mode {
            JacobianMode::ValueOnly => {
                let pixel = camera.project(point)?;
                Evaluation::ValueOnly(to_dvector(&(pixel - self.measured)))
            }
            JacobianMode::WithJacobians => {
                let jacobians = camera.project_with_jacobians(point)?;
                let d_camera: DMatrix<f64> = DMatrix::from_iterator(
                    2,
                    PinholeCamera::DOF,
                    jacobians.dcamera().iter().copied(),
                );
                Evaluation::WithJacobians(
                    to_dvector(&(jacobians.pixel - self.measured)),
                    vec![d_camera, jacobians.dpoint.to_dmatrix()],
                )
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Cal3Bundler;
    use crate::manifold::{Manifold, se3::SE3};
    use nalgebra::DVector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_camera_jacobian_numerical() -> TestResult {
        let camera = PinholeCamera::new(
            SE3::from_translation_euler(-0.2, 0.1, -4.0, 0.0, 0.1, 0.2),
            Cal3Bundler::new(600.0, 5e-3, -1e-3, 0.0, 0.0),
        );
        let point = Value::Point3(Vector3::new(0.3, 0.4, -0.1));
        let factor = GeneralSfmFactor::new(Vector2::new(10.0, -20.0));

        let camera_value = Value::Camera(camera.clone());
        let (residual, jacobians) = factor
            .evaluate(&[&camera_value, &point], JacobianMode::WithJacobians)?
            .into_parts();
        let jacobians = jacobians.ok_or("missing jacobians")?;
        assert_eq!(residual.len(), 2);
        assert_eq!(jacobians[0].shape(), (2, 9));

        let h = 1e-6;
        for i in 0..9 {
            let mut delta = DVector::zeros(9);
            delta[i] = h;
            let plus = Value::Camera(camera.retract(&delta)?);
            let minus = Value::Camera(camera.retract(&(-&delta))?);
            let numerical = (factor
                .evaluate(&[&plus, &point], JacobianMode::ValueOnly)?
                .into_value()
                - factor
                    .evaluate(&[&minus, &point], JacobianMode::ValueOnly)?
                    .into_value())
                / (2.0 * h);
            assert!(
                (numerical - jacobians[0].column(i)).norm() < 1e-4,
                "column {i}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_rejects_pose_in_camera_slot() {
        let factor = GeneralSfmFactor::new(Vector2::zeros());
        let pose = Value::Pose3(SE3::from_translation_euler(0.0, 0.0, -1.0, 0.0, 0.0, 0.0));
        let point = Value::Point3(Vector3::zeros());
        assert!(
            factor
                .evaluate(&[&pose, &point], JacobianMode::ValueOnly)
                .is_err()
        );
    }
}
