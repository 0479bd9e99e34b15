//! Factor implementations for factor-graph optimization.
//!
//! A factor is a residual function of one or more variables. It is bound to its keys and a
//! noise model by [`NonlinearFactor`](crate::core::NonlinearFactor); the factor itself only
//! sees the variable values, in key order, and returns the unwhitened residual plus (on request)
//! one Jacobian block per variable.
//!
//! # Factor Types
//!
//! ## Pose factors
//! - [`PriorFactor`]: unary prior on any variable type
//! - [`BetweenFactor`]: relative pose constraint, SE(2) or SE(3)
//!
//! ## Projection factors
//! - [`ProjectionFactor`]: SE(3) pose and point, fixed shared calibration
//! - [`GeneralSfmFactor`]: pinhole camera (pose + calibration) and point
//! - [`SnavelyProjectionFactor`]: Snavely 9-vector camera and point, dual-number Jacobians
//!
//! ## Inequality factors
//! - [`ComponentBoundFactor`]: one component of a point or vector above/below a bound
//! - [`MaxDistanceFactor`]: distance between two points below a limit
//!
//! Inequality factors follow the convention `e[0] ≤ 0` when feasible.

use crate::camera::{CameraError, CheiralityError};
use crate::core::{Evaluation, JacobianMode, Value, VariableType};
use crate::manifold::ManifoldError;
use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;
use thiserror::Error;
use tracing::error;

pub mod between_factor;
pub mod bound_factor;
pub mod general_sfm_factor;
pub mod prior_factor;
pub mod projection_factor;
pub mod snavely_factor;

pub use between_factor::BetweenFactor;
pub use bound_factor::{BoundSense, ComponentBoundFactor, MaxDistanceFactor};
pub use general_sfm_factor::GeneralSfmFactor;
pub use prior_factor::PriorFactor;
pub use projection_factor::ProjectionFactor;
pub use snavely_factor::SnavelyProjectionFactor;

/// Factor-specific error types for apex-sfm
#[derive(Debug, Clone, Error)]
pub enum FactorError {
    /// A point projects behind the camera
    #[error(transparent)]
    Cheirality(#[from] CheiralityError),

    /// Invalid dimension mismatch between expected and actual
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Wrong number of variables passed to the factor
    #[error("Invalid arity: expected {expected} variables, got {actual}")]
    InvalidArity { expected: usize, actual: usize },

    /// A variable has a different type than the factor expects
    #[error("Variable {index} has type {actual}, expected {expected}")]
    InvalidVariableType {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    #[error(transparent)]
    Camera(CameraError),
}

impl From<CameraError> for FactorError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::Cheirality(c) => FactorError::Cheirality(c),
            other => FactorError::Camera(other),
        }
    }
}

impl FactorError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error for debugging context
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// Failures that depend on the evaluation point rather than on the graph structure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FactorError::Cheirality(_))
    }
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Residual plus, in [`JacobianMode::WithJacobians`], one Jacobian block per variable.
pub type FactorEvaluation = Evaluation<DVector<f64>, Vec<DMatrix<f64>>>;

/// Trait for factor (residual) implementations.
///
/// `values` holds the connected variables in the order of the factor's keys. Jacobian block
/// `i` has `dimension()` rows and as many columns as the tangent dimension of variable `i`.
///
/// # Thread Safety
///
/// Factors must be `Send + Sync` to enable parallel evaluation.
///
/// # Example
///
/// ```
/// use apex_sfm::core::{Evaluation, JacobianMode, Value};
/// use apex_sfm::factors::{Factor, FactorEvaluation, FactorResult, variable};
/// use nalgebra::{DMatrix, DVector, Vector3};
///
/// // Distance of a point from the origin
/// #[derive(Debug)]
/// struct RangeFactor {
///     measured: f64,
/// }
///
/// impl Factor for RangeFactor {
///     fn dimension(&self) -> usize {
///         1
///     }
///
///     fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
///         let p: &Vector3<f64> = variable(values, 0)?;
///         let range = p.norm();
///         let residual = DVector::from_element(1, range - self.measured);
///         Ok(Evaluation::for_mode(mode, residual, || {
///             vec![DMatrix::from_row_slice(1, 3, (p / range).as_slice())]
///         }))
///     }
/// }
/// ```
pub trait Factor: Send + Sync + Debug {
    /// Number of rows of the residual.
    fn dimension(&self) -> usize;

    /// Evaluate the unwhitened residual, with Jacobians when `mode` asks for them.
    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation>;
}

/// Check the number of variables handed to a factor.
pub fn check_arity(values: &[&Value], expected: usize) -> FactorResult<()> {
    if values.len() != expected {
        return Err(FactorError::InvalidArity {
            expected,
            actual: values.len(),
        }
        .log());
    }
    Ok(())
}

/// Typed access to variable `index` of a factor.
pub fn variable<'a, T: VariableType>(values: &[&'a Value], index: usize) -> FactorResult<&'a T> {
    let value: &'a Value = values.get(index).copied().ok_or_else(|| {
        FactorError::InvalidArity {
            expected: index + 1,
            actual: values.len(),
        }
        .log()
    })?;
    T::from_value(value).ok_or_else(|| {
        FactorError::InvalidVariableType {
            index,
            expected: T::TYPE_NAME,
            actual: value.type_name(),
        }
        .log()
    })
}
