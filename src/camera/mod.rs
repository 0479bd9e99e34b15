//! Camera projection models.
//!
//! - [`Cal3Bundler`]: focal length plus two radial distortion coefficients
//! - [`CalibratedCamera`]: a pose only, projecting to normalized image coordinates
//! - [`PinholeCamera`]: pose plus [`Cal3Bundler`], projecting to pixels
//! - [`autodiff`]: dual-number versions of the same projections
//!
//! All projections report a point with non-positive depth as a [`CheiralityError`]; the value
//! is never clamped.

pub mod autodiff;
pub mod calibrated;
pub mod calibration;
pub mod pinhole;

pub use calibrated::CalibratedCamera;
pub use calibration::Cal3Bundler;
pub use pinhole::{PinholeCamera, ProjectionJacobians};

use thiserror::Error;
use tracing::error;

/// A point projects behind the camera.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("Cheirality violation: point depth {depth:.6e} is not in front of the camera")]
pub struct CheiralityError {
    /// Depth of the point along the principal axis
    pub depth: f64,
}

/// Camera-specific error types for apex-sfm
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error(transparent)]
    Cheirality(#[from] CheiralityError),

    /// Iterative undistortion did not reach the requested tolerance
    #[error("Calibration inversion did not converge after {iterations} iterations")]
    CalibrationDidNotConverge { iterations: usize },

    /// The requested camera frame is degenerate (e.g. up vector parallel to viewing direction)
    #[error("Degenerate camera frame: {0}")]
    DegenerateFrame(String),
}

impl CameraError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;
