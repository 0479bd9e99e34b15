//! # Apex SfM
//!
//! Factor-graph nonlinear least squares for structure-from-motion and SLAM.
//!
//! A problem is a [`NonlinearFactorGraph`](core::NonlinearFactorGraph) of residual factors over
//! keyed variables plus an initial [`Values`](core::Values) estimate. [`LevenbergMarquardt`]
//! linearizes the graph, solves the damped normal equations with a sparse `faer` backend and
//! retracts the step on each variable's manifold until the total squared whitened error
//! converges.
//!
//! ## Modules
//!
//! - [`manifold`]: SO(3), SE(3), SE(2) and Euclidean variables with retraction and Jacobians
//! - [`camera`]: calibrated, pinhole and Snavely projection models with cheirality checks
//! - [`factors`]: prior, between, reprojection and inequality factors
//! - [`core`]: keys, Values, noise models, nonlinear/linear/inequality factor graphs
//! - [`linalg`]: sparse Cholesky and QR solvers
//! - [`optimizer`]: Levenberg-Marquardt with explicit termination status
//! - [`problems`]: bundle adjustment, Pose2 SLAM and synthetic scene builders
//!
//! ## Example
//!
//! ```
//! use apex_sfm::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
//! use apex_sfm::problems::bundle_adjustment::{BundleAdjustmentOptions, build_general_sfm};
//! use apex_sfm::problems::{SyntheticScene, SyntheticSceneConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scene = SyntheticScene::generate(&SyntheticSceneConfig::new())?;
//! let (graph, initial) = build_general_sfm(&scene.initial, &BundleAdjustmentOptions::new())?;
//!
//! let config = LevenbergMarquardtConfig::new().with_absolute_error_tolerance(1e-10);
//! let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
//! assert!(result.final_error < result.initial_error);
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod problems;

pub use crate::core::{Key, NoiseModel, NonlinearFactorGraph, Values};
pub use error::{ApexSfmError, ApexSfmResult};

pub use factors::{
    BetweenFactor, ComponentBoundFactor, Factor, GeneralSfmFactor, MaxDistanceFactor,
    PriorFactor, ProjectionFactor, SnavelyProjectionFactor,
};

pub use linalg::{LinearSolverType, SparseCholeskySolver, SparseLinearSolver, SparseQRSolver};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level, try_init_logger_with_level};
pub use optimizer::{
    LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus, SolverResult,
};
