//! Builders turning measurement data into factor graphs and initial Values.
//!
//! - [`bundle_adjustment`]: [`SfmData`] to general-SFM or Snavely reprojection problems
//! - [`pose_graph`]: planar pose graphs ([`Pose2Graph`]) to SE(2) SLAM problems
//! - [`synthetic`]: random scenes with known ground truth for tests and benchmarks
//!
//! Keys follow one convention throughout: cameras `c{i}`, points `p{j}`, planar poses `x{id}`.

use crate::camera::CameraError;
use crate::core::{CoreError, Key};
use thiserror::Error;
use tracing::error;

pub mod bundle_adjustment;
pub mod pose_graph;
pub mod synthetic;

pub use bundle_adjustment::{BundleAdjustmentOptions, SfmData, SfmTrack};
pub use pose_graph::{Pose2Constraint, Pose2Graph};
pub use synthetic::{SyntheticScene, SyntheticSceneConfig};

/// Problem construction error types for apex-sfm
#[derive(Debug, Clone, Error)]
pub enum ProblemError {
    /// A measurement refers to a camera that is not in the dataset
    #[error("Track {track} observes camera {camera}, but only {cameras} cameras exist")]
    InvalidCameraIndex {
        track: usize,
        camera: usize,
        cameras: usize,
    },

    /// A constraint refers to a pose that was never added
    #[error("Constraint {constraint} refers to unknown pose {pose}")]
    UnknownPose { constraint: usize, pose: usize },

    /// The dataset holds nothing to optimize
    #[error("Empty problem: {0}")]
    Empty(String),

    /// Invalid builder or generator parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl ProblemError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for problem construction
pub type ProblemResult<T> = Result<T, ProblemError>;

/// Key of camera `index`.
pub const fn camera_key(index: usize) -> Key {
    Key::new('c', index as u64)
}

/// Key of point (track) `index`.
pub const fn point_key(index: usize) -> Key {
    Key::new('p', index as u64)
}

/// Key of planar pose `id`.
pub const fn pose_key(id: usize) -> Key {
    Key::new('x', id as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_conventions() {
        assert_eq!(camera_key(2).to_string(), "c2");
        assert_eq!(point_key(11).to_string(), "p11");
        assert_eq!(pose_key(0).to_string(), "x0");
        assert!(camera_key(5) < point_key(0));
    }
}
