//! Bundler calibration: focal length `f`, radial distortion `k1`, `k2`, fixed principal point.
//!
//! ```text
//! r = u² + v²
//! g = 1 + k1·r + k2·r²
//! pixel = (u0 + f·g·u, v0 + f·g·v)
//! ```

use crate::camera::{CameraError, CameraResult};
use crate::manifold::{Manifold, ManifoldResult, check_tangent};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix2x3, Vector2, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Maximum number of fixed-point iterations used by [`Cal3Bundler::calibrate`].
const MAX_CALIBRATE_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Cal3Bundler {
    f: f64,
    k1: f64,
    k2: f64,
    u0: f64,
    v0: f64,
}

impl Display for Cal3Bundler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cal3Bundler(f: {:.4}, k1: {:.4e}, k2: {:.4e}, u0: {:.2}, v0: {:.2})",
            self.f, self.k1, self.k2, self.u0, self.v0
        )
    }
}

impl Default for Cal3Bundler {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 0.0)
    }
}

impl Cal3Bundler {
    pub fn new(f: f64, k1: f64, k2: f64, u0: f64, v0: f64) -> Self {
        Cal3Bundler { f, k1, k2, u0, v0 }
    }

    pub fn f(&self) -> f64 {
        self.f
    }

    pub fn k1(&self) -> f64 {
        self.k1
    }

    pub fn k2(&self) -> f64 {
        self.k2
    }

    pub fn u0(&self) -> f64 {
        self.u0
    }

    pub fn v0(&self) -> f64 {
        self.v0
    }

    /// Optimized parameters `[f, k1, k2]`.
    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.f, self.k1, self.k2)
    }

    pub fn principal_point(&self) -> Vector2<f64> {
        Vector2::new(self.u0, self.v0)
    }

    /// Map normalized coordinates to pixels.
    pub fn uncalibrate(&self, pn: &Vector2<f64>) -> Vector2<f64> {
        let r = pn.norm_squared();
        let g = 1.0 + r * (self.k1 + self.k2 * r);
        Vector2::new(self.u0 + self.f * g * pn.x, self.v0 + self.f * g * pn.y)
    }

    /// Map normalized coordinates to pixels with Jacobians w.r.t. `[f, k1, k2]` and `pn`.
    pub fn uncalibrate_with_jacobians(
        &self,
        pn: &Vector2<f64>,
    ) -> (Vector2<f64>, Matrix2x3<f64>, Matrix2<f64>) {
        let (u, v) = (pn.x, pn.y);
        let (uu, vv, uv) = (u * u, v * v, u * v);
        let r = uu + vv;
        let g = 1.0 + r * (self.k1 + self.k2 * r);
        let pixel = Vector2::new(self.u0 + self.f * g * u, self.v0 + self.f * g * v);

        let f_r = self.f * r;
        let f_r2 = f_r * r;
        let d_cal = Matrix2x3::new(g * u, f_r * u, f_r2 * u, g * v, f_r * v, f_r2 * v);

        let s = 2.0 * (self.k1 + 2.0 * self.k2 * r);
        let d_pn = self.f * Matrix2::new(g + uu * s, uv * s, uv * s, g + vv * s);

        (pixel, d_cal, d_pn)
    }

    /// Invert [`uncalibrate`](Self::uncalibrate) by fixed-point iteration on the distortion.
    pub fn calibrate(&self, pixel: &Vector2<f64>, tolerance: f64) -> CameraResult<Vector2<f64>> {
        let centered = (pixel - self.principal_point()) / self.f;
        let mut pn = centered;
        for _ in 0..MAX_CALIBRATE_ITERATIONS {
            let r = pn.norm_squared();
            let g = 1.0 + r * (self.k1 + self.k2 * r);
            pn = centered / g;
            if (self.uncalibrate(&pn) - pixel).norm() < tolerance {
                return Ok(pn);
            }
        }
        Err(CameraError::CalibrationDidNotConverge {
            iterations: MAX_CALIBRATE_ITERATIONS,
        }
        .log())
    }

    pub(crate) fn with_vector(&self, params: &Vector3<f64>) -> Self {
        Cal3Bundler {
            f: params.x,
            k1: params.y,
            k2: params.z,
            u0: self.u0,
            v0: self.v0,
        }
    }
}

impl Manifold for Cal3Bundler {
    fn tangent_dim(&self) -> usize {
        3
    }

    fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Self> {
        check_tangent(delta, 3)?;
        Ok(self.with_vector(&(self.vector() + Vector3::new(delta[0], delta[1], delta[2]))))
    }

    fn local_coordinates(&self, other: &Self) -> ManifoldResult<DVector<f64>> {
        let d = other.vector() - self.vector();
        Ok(DVector::from_column_slice(d.as_slice()))
    }

    fn local_coordinates_jacobian(&self, _other: &Self) -> ManifoldResult<DMatrix<f64>> {
        Ok(DMatrix::identity(3, 3))
    }
}
