//! Nonlinear least-squares optimization over factor graphs.
//!
//! [`LevenbergMarquardt`] minimizes the total squared whitened error of a
//! [`NonlinearFactorGraph`](crate::core::NonlinearFactorGraph) starting from an initial
//! [`Values`]. A run ends with a [`SolverResult`] carrying an explicit [`OptimizationStatus`];
//! running out of iterations is a status, not an error. Only structural problems and numerical
//! failures that persist through all retries surface as [`OptimizerError`].

use crate::core::{CoreError, Key, Values};
use crate::linalg::{self, LinAlgError};
use faer::Mat;
use std::collections::BTreeMap;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;
use web_time as time;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{
    IterationStats, LevenbergMarquardt, LevenbergMarquardtConfig, LevenbergMarquardtSummary,
};

/// Optimizer-specific error types for apex-sfm
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Factor graph or Values error (missing key, type mismatch, failed factor, ...)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),

    /// Every retry of one iteration failed with a recoverable error
    #[error("All {retries} attempts of the iteration failed")]
    RetriesExhausted {
        retries: usize,
        #[source]
        cause: Box<OptimizerError>,
    },

    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// NaN or Inf in the error of the initial Values
    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),

    /// The initial Values hold no variables
    #[error("Problem has no variables to optimize")]
    EmptyProblem,
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// Whether raising the damping and retrying from the last accepted Values may help.
    pub fn is_recoverable(&self) -> bool {
        match self {
            OptimizerError::Core(e) => e.is_recoverable(),
            OptimizerError::LinAlg(e) => matches!(
                e,
                LinAlgError::SingularMatrix | LinAlgError::FactorizationFailed(_)
            ),
            _ => false,
        }
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Detailed convergence information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceInfo {
    /// Norm of `Jᵀr` at the last linearization
    pub final_gradient_norm: f64,
    /// Norm of the last computed step
    pub final_step_norm: f64,
    /// Damping at termination
    pub final_damping: f64,
    /// Graph error evaluations, initial one included
    pub error_evaluations: usize,
    pub linearizations: usize,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

impl Display for ConvergenceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final step norm: {:.2e}, Final damping: {:.2e}, Error evaluations: {}, Linearizations: {}, Steps accepted/rejected: {}/{}",
            self.final_gradient_norm,
            self.final_step_norm,
            self.final_damping,
            self.error_evaluations,
            self.linearizations,
            self.accepted_steps,
            self.rejected_steps
        )
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Absolute or relative error tolerance reached
    Converged,
    /// Iteration budget used up
    MaxIterationsReached,
    /// The damping hit its upper bound without an accepted step
    DampingLimitReached,
    /// Every retry of an iteration was rejected without an error
    NoDecrease,
    /// The abort signal was set
    UserTerminated,
}

impl OptimizationStatus {
    pub fn is_converged(self) -> bool {
        self == OptimizationStatus::Converged
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::DampingLimitReached => write!(f, "Damping limit reached"),
            OptimizationStatus::NoDecrease => write!(f, "No error decrease"),
            OptimizationStatus::UserTerminated => write!(f, "User terminated"),
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Best Values found: the last accepted ones
    pub values: Values,
    pub status: OptimizationStatus,
    pub initial_error: f64,
    pub final_error: f64,
    /// Outer iterations performed (one linearization each)
    pub iterations: usize,
    pub elapsed: time::Duration,
    /// Error of the initial Values followed by the error after each accepted step
    pub error_history: Vec<f64>,
    pub convergence_info: ConvergenceInfo,
    /// Feasibility and complementarity of the final Values, for constrained runs
    pub constraints_satisfied: Option<bool>,
    /// Per-key tangent-space covariance blocks, when enabled in the configuration
    pub covariances: Option<BTreeMap<Key, Mat<f64>>>,
}

impl SolverResult {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}
