//! Top-level error type of apex-sfm.
//!
//! Every module owns a `thiserror` enum; [`ApexSfmError`] wraps them transparently so callers can
//! use one error type with `?` across builders and the optimizer while keeping the source chain:
//!
//! ```text
//! ApexSfmError::Optimizer(
//!     OptimizerError::RetriesExhausted {
//!         retries: 11,
//!         cause: Core(Factor { keys: "c1, p4", source: Cheirality { depth: -0.3 } }),
//!     }
//! )
//! ```

use crate::{
    camera::CameraError, core::CoreError, factors::FactorError, linalg::LinAlgError,
    manifold::ManifoldError, optimizer::OptimizerError, problems::ProblemError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type of the apex-sfm library
pub type ApexSfmResult<T> = Result<T, ApexSfmError>;

/// Main error type of the apex-sfm library
///
/// ```
/// use apex_sfm::error::ApexSfmResult;
/// use apex_sfm::optimizer::LevenbergMarquardt;
/// use apex_sfm::problems::{SyntheticScene, SyntheticSceneConfig, bundle_adjustment};
///
/// fn run() -> ApexSfmResult<f64> {
///     let scene = SyntheticScene::generate(&SyntheticSceneConfig::new())?;
///     let (graph, initial) = bundle_adjustment::build_general_sfm(
///         &scene.initial,
///         &bundle_adjustment::BundleAdjustmentOptions::new(),
///     )?;
///     Ok(LevenbergMarquardt::new().optimize(&graph, &initial)?.final_error)
/// }
///
/// match run() {
///     Ok(error) => assert!(error.is_finite()),
///     Err(e) => panic!("{}", e.chain()),
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApexSfmError {
    /// Factor graph and Values errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    /// Factor evaluation errors outside a graph
    #[error(transparent)]
    Factor(#[from] FactorError),

    /// Camera projection errors outside a graph
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Problem construction errors
    #[error(transparent)]
    Problem(#[from] ProblemError),
}

impl ApexSfmError {
    fn sources(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        std::iter::successors(self.source(), |err| (*err).source())
    }

    /// Multi-line rendering of the error and its sources, one per line.
    pub fn chain(&self) -> String {
        std::iter::once(self.to_string())
            .chain(self.sources().map(|err| format!("  → {}", err)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Single-line rendering of the error chain
    ///
    /// ```text
    /// All 11 attempts of the iteration failed → Factor on [c1, p4] failed: ... → Cheirality violation: ...
    /// ```
    pub fn chain_compact(&self) -> String {
        std::iter::once(self.to_string())
            .chain(self.sources().map(|err| err.to_string()))
            .collect::<Vec<_>>()
            .join(" → ")
    }
}
