//! Pinhole camera with Bundler calibration.
//!
//! Projection chains the calibrated projection with [`Cal3Bundler::uncalibrate`], so every pose
//! and point Jacobian is the normalized one pre-multiplied by the calibration's `∂pixel/∂pn`.

use crate::camera::{CalibratedCamera, Cal3Bundler, CameraResult, CheiralityError};
use crate::manifold::{LieGroup, Manifold, ManifoldResult, check_tangent, se3::SE3};
use nalgebra::{DMatrix, DVector, Matrix2x3, Matrix2x6, Matrix2xX, Vector2, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Tolerance in pixels used when inverting the calibration during backprojection.
const BACKPROJECT_TOLERANCE: f64 = 1e-9;

/// Pixel projection together with its Jacobians.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionJacobians {
    pub pixel: Vector2<f64>,
    /// w.r.t. the pose tangent `[ρ, θ]`
    pub dpose: Matrix2x6<f64>,
    /// w.r.t. `[f, k1, k2]`
    pub dcal: Matrix2x3<f64>,
    /// w.r.t. the world point
    pub dpoint: Matrix2x3<f64>,
}

impl ProjectionJacobians {
    /// Jacobian w.r.t. the full 9-dimensional camera tangent `[pose, calibration]`.
    pub fn dcamera(&self) -> Matrix2xX<f64> {
        let mut d = Matrix2xX::zeros(9);
        d.fixed_view_mut::<2, 6>(0, 0).copy_from(&self.dpose);
        d.fixed_view_mut::<2, 3>(0, 6).copy_from(&self.dcal);
        d
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    pose: SE3,
    calibration: Cal3Bundler,
}

impl Display for PinholeCamera {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PinholeCamera({}, {})", self.pose, self.calibration)
    }
}

impl Default for PinholeCamera {
    fn default() -> Self {
        Self::new(SE3::identity(), Cal3Bundler::default())
    }
}

impl PinholeCamera {
    pub const DOF: usize = 9;

    pub fn new(pose: SE3, calibration: Cal3Bundler) -> Self {
        PinholeCamera { pose, calibration }
    }

    pub fn pose(&self) -> &SE3 {
        &self.pose
    }

    pub fn calibration(&self) -> &Cal3Bundler {
        &self.calibration
    }

    /// The pose-only camera sharing this camera's extrinsics.
    pub fn calibrated(&self) -> CalibratedCamera {
        CalibratedCamera::new(self.pose.clone())
    }

    pub fn project(&self, point: &Vector3<f64>) -> Result<Vector2<f64>, CheiralityError> {
        let pn = self.calibrated().project(point)?;
        Ok(self.calibration.uncalibrate(&pn))
    }

    pub fn project_with_jacobians(
        &self,
        point: &Vector3<f64>,
    ) -> Result<ProjectionJacobians, CheiralityError> {
        let (pn, dpose_n, dpoint_n) = self.calibrated().project_with_jacobians(point)?;
        let (pixel, dcal, dpn) = self.calibration.uncalibrate_with_jacobians(&pn);
        Ok(ProjectionJacobians {
            pixel,
            dpose: dpn * dpose_n,
            dcal,
            dpoint: dpn * dpoint_n,
        })
    }

    /// World point at `depth` along the ray through `pixel`.
    pub fn backproject(&self, pixel: &Vector2<f64>, depth: f64) -> CameraResult<Vector3<f64>> {
        let pn = self.calibration.calibrate(pixel, BACKPROJECT_TOLERANCE)?;
        Ok(self.calibrated().backproject(&pn, depth))
    }

    pub fn range(&self, point: &Vector3<f64>) -> f64 {
        self.calibrated().range(point)
    }
}

impl Manifold for PinholeCamera {
    fn tangent_dim(&self) -> usize {
        Self::DOF
    }

    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(delta, Self::DOF)?;
        let pose = self.pose.retract(&delta.rows(0, 6).into_owned())?;
        let calibration = self
            .calibration
            .retract(&delta.rows(6, 3).into_owned())?;
        Ok(Self::new(pose, calibration))
    }

    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>> {
        let mut d = DVector::zeros(Self::DOF);
        d.rows_mut(0, 6)
            .copy_from(&self.pose.local_coordinates(&other.pose)?);
        d.rows_mut(6, 3)
            .copy_from(&self.calibration.local_coordinates(&other.calibration)?);
        Ok(d)
    }

    fn local_coordinates_jacobian(&self, other: &Self) -> ManifoldResult<DMatrix<f64>> {
        let mut j = DMatrix::zeros(Self::DOF, Self::DOF);
        j.view_mut((0, 0), (6, 6))
            .copy_from(&self.pose.local_coordinates_jacobian(&other.pose)?);
        j.view_mut((6, 6), (3, 3)).copy_from(
            &self
                .calibration
                .local_coordinates_jacobian(&other.calibration)?,
        );
        Ok(j)
    }
}
