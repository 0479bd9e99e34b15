//! A calibrated camera: a pose projecting to normalized image coordinates.
//!
//! The pose is camera-to-world with the camera looking down its +z axis. Projection uses the
//! cached intermediates `(u, v)` (normalized coordinates), `d = 1/z` (inverse depth) and the
//! rotation `R` to build the closed-form Jacobians.

use crate::camera::{CameraError, CameraResult, CheiralityError};
use crate::manifold::{
    LieGroup, Manifold, ManifoldResult,
    se2::SE2,
    se3::SE3,
    so3::SO3,
};
use nalgebra::{DMatrix, DVector, Matrix1x3, Matrix1x6, Matrix2x3, Matrix2x6, Matrix3, Vector2, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedCamera {
    pose: SE3,
}

impl Default for CalibratedCamera {
    fn default() -> Self {
        Self::new(SE3::identity())
    }
}

impl CalibratedCamera {
    pub fn new(pose: SE3) -> Self {
        CalibratedCamera { pose }
    }

    pub fn pose(&self) -> &SE3 {
        &self.pose
    }

    /// Camera at `height` above a planar pose, looking horizontally along its heading.
    pub fn level(pose2: &SE2, height: f64) -> Self {
        Self::new(Self::level_pose(pose2, height))
    }

    pub fn level_pose(pose2: &SE2, height: f64) -> SE3 {
        let (st, ct) = pose2.angle().sin_cos();
        let x = Vector3::new(st, -ct, 0.0);
        let y = Vector3::new(0.0, 0.0, -1.0);
        let z = Vector3::new(ct, st, 0.0);
        let rotation = SO3::from_rotation_matrix(&Matrix3::from_columns(&[x, y, z]));
        SE3::from_translation_so3(Vector3::new(pose2.x(), pose2.y(), height), rotation)
    }

    /// Camera at `eye` looking at `target`, with image "up" opposite to `up`.
    pub fn lookat(eye: &Vector3<f64>, target: &Vector3<f64>, up: &Vector3<f64>) -> CameraResult<Self> {
        Ok(Self::new(Self::lookat_pose(eye, target, up)?))
    }

    pub fn lookat_pose(
        eye: &Vector3<f64>,
        target: &Vector3<f64>,
        up: &Vector3<f64>,
    ) -> CameraResult<SE3> {
        let zc = (target - eye)
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| CameraError::DegenerateFrame("eye coincides with target".into()).log())?;
        let xc = (-up).cross(&zc).try_normalize(f64::EPSILON).ok_or_else(|| {
            CameraError::DegenerateFrame("up vector is parallel to the viewing direction".into())
                .log()
        })?;
        let yc = zc.cross(&xc);
        let rotation = SO3::from_rotation_matrix(&Matrix3::from_columns(&[xc, yc, zc]));
        Ok(SE3::from_translation_so3(*eye, rotation))
    }

    /// Perspective divide of a point already expressed in the camera frame.
    pub fn project_to_camera(p_camera: &Vector3<f64>) -> Result<Vector2<f64>, CheiralityError> {
        if p_camera.z <= 0.0 {
            return Err(CheiralityError { depth: p_camera.z });
        }
        Ok(Vector2::new(p_camera.x / p_camera.z, p_camera.y / p_camera.z))
    }

    /// Inverse of [`project_to_camera`](Self::project_to_camera) at a given depth.
    pub fn backproject_from_camera(pn: &Vector2<f64>, depth: f64) -> Vector3<f64> {
        Vector3::new(pn.x * depth, pn.y * depth, depth)
    }

    /// Normalized-coordinate derivative w.r.t. the pose tangent `[ρ, θ]`.
    pub fn calculate_dpose(pn: &Vector2<f64>, d: f64) -> Matrix2x6<f64> {
        let (u, v) = (pn.x, pn.y);
        let (uv, uu, vv) = (u * v, u * u, v * v);
        Matrix2x6::new(
            -d,
            0.0,
            d * u,
            uv,
            -1.0 - uu,
            v,
            0.0,
            -d,
            d * v,
            1.0 + vv,
            -uv,
            -u,
        )
    }

    /// Normalized-coordinate derivative w.r.t. the world point.
    pub fn calculate_dpoint(pn: &Vector2<f64>, d: f64, r: &Matrix3<f64>) -> Matrix2x3<f64> {
        let (u, v) = (pn.x, pn.y);
        d * Matrix2x3::new(
            r[(0, 0)] - u * r[(0, 2)],
            r[(1, 0)] - u * r[(1, 2)],
            r[(2, 0)] - u * r[(2, 2)],
            r[(0, 1)] - v * r[(0, 2)],
            r[(1, 1)] - v * r[(1, 2)],
            r[(2, 1)] - v * r[(2, 2)],
        )
    }

    pub fn project(&self, point: &Vector3<f64>) -> Result<Vector2<f64>, CheiralityError> {
        Self::project_to_camera(&self.pose.transform_to(point))
    }

    /// Project with Jacobians w.r.t. the pose (2×6) and the point (2×3).
    pub fn project_with_jacobians(
        &self,
        point: &Vector3<f64>,
    ) -> Result<(Vector2<f64>, Matrix2x6<f64>, Matrix2x3<f64>), CheiralityError> {
        let q = self.pose.transform_to(point);
        let pn = Self::project_to_camera(&q)?;
        let d = 1.0 / q.z;
        let r = self.pose.rotation_matrix();
        Ok((
            pn,
            Self::calculate_dpose(&pn, d),
            Self::calculate_dpoint(&pn, d, &r),
        ))
    }

    /// World point at `depth` along the ray through normalized coordinates `pn`.
    pub fn backproject(&self, pn: &Vector2<f64>, depth: f64) -> Vector3<f64> {
        self.pose
            .transform_from(&Self::backproject_from_camera(pn, depth))
    }

    /// Euclidean distance from the camera center to `point`.
    pub fn range(&self, point: &Vector3<f64>) -> f64 {
        (point - self.pose.translation()).norm()
    }

    /// Range with Jacobians w.r.t. the pose (1×6) and the point (1×3).
    pub fn range_with_jacobians(&self, point: &Vector3<f64>) -> (f64, Matrix1x6<f64>, Matrix1x3<f64>) {
        let delta = point - self.pose.translation();
        let range = delta.norm();
        let direction = delta / range;
        let local = self.pose.rotation_matrix().transpose() * direction;
        let mut d_pose = Matrix1x6::zeros();
        d_pose[(0, 0)] = -local.x;
        d_pose[(0, 1)] = -local.y;
        d_pose[(0, 2)] = -local.z;
        (range, d_pose, direction.transpose())
    }

    /// Range to the center of another camera.
    pub fn range_to_camera(&self, other: &CalibratedCamera) -> f64 {
        self.range(&other.pose.translation())
    }
}

impl Manifold for CalibratedCamera {
    fn tangent_dim(&self) -> usize {
        SE3::DOF
    }

    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self> {
        Ok(Self::new(self.pose.retract(delta)?))
    }

    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>> {
        self.pose.local_coordinates(&other.pose)
    }

    fn local_coordinates_jacobian(&self, other: &Self) -> ManifoldResult<DMatrix<f64>> {
        self.pose.local_coordinates_jacobian(&other.pose)
    }
}
