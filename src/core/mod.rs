//! Core factor-graph components for the apex-sfm library
//!
//! This module contains the building blocks the optimizer works on:
//! - Keys and the Values / VectorValues containers
//! - Noise models and nonlinear factors
//! - Nonlinear and linear factor graphs, with the sparse assembly of the latter
//! - Inequality-constrained graphs and the feasibility/complementarity predicate

pub mod factor_graph;
pub mod inequality;
pub mod key;
pub mod linear;
pub mod noise_model;
pub mod nonlinear_factor;
pub mod values;

pub use factor_graph::NonlinearFactorGraph;
pub use inequality::NonlinearInequalityFactorGraph;
pub use key::Key;
pub use linear::{LinearFactor, LinearFactorGraph, Ordering};
pub use noise_model::NoiseModel;
pub use nonlinear_factor::{FactorKind, NonlinearFactor};
pub use values::{Value, Values, VariableType, VectorValues};

use crate::camera::CameraError;
use crate::factors::FactorError;
use crate::manifold::ManifoldError;
use thiserror::Error;
use tracing::error;

/// Core module error types for factor graphs and their containers
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A factor or update references a key that is not in the Values
    #[error("Missing key: {0}")]
    MissingKey(Key),

    /// A key was inserted twice
    #[error("Duplicate key: {0}")]
    DuplicateKey(Key),

    /// The stored value has a different variable type than requested
    #[error("Type mismatch for {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        key: Key,
        expected: &'static str,
        actual: &'static str,
    },

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Factor evaluation failed
    #[error("Factor on [{keys}] failed: {source}")]
    Factor {
        keys: String,
        #[source]
        source: FactorError,
    },

    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    /// NaN or Inf in a residual, Jacobian or error value
    #[error("Non-finite value: {0}")]
    NonFinite(String),

    /// Invalid sigma or dimension for a noise model
    #[error("Invalid noise model: {0}")]
    InvalidNoiseModel(String),

    /// An equality factor was added where an inequality is required
    #[error("Factor on [{0}] is not an inequality constraint")]
    NotInequality(String),

    /// Sparse structure construction failed
    #[error("Sparse structure error: {0}")]
    SparseStructure(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Example
    /// ```ignore
    /// SparseColMat::try_new_from_triplets(rows, cols, &triplets).map_err(|e| {
    ///     CoreError::SparseStructure("Failed to assemble Jacobian".to_string())
    ///         .log_with_source(e)
    /// })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }

    /// Whether the optimizer may recover by raising the damping and retrying.
    ///
    /// Geometric failures at a trial point (cheirality, non-finite values) are recoverable.
    /// Structural errors (missing keys, type or dimension mismatches) are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::Factor { source, .. } => source.is_recoverable(),
            CoreError::NonFinite(_) => true,
            CoreError::Manifold(ManifoldError::InvalidNumber) => true,
            _ => false,
        }
    }
}

impl From<CameraError> for CoreError {
    fn from(e: CameraError) -> Self {
        CoreError::Factor {
            keys: String::new(),
            source: FactorError::from(e),
        }
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Whether a factor evaluation should also produce Jacobians.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianMode {
    ValueOnly,
    WithJacobians,
}

/// Result of a factor evaluation, tagged by [`JacobianMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation<V, J> {
    ValueOnly(V),
    WithJacobians(V, J),
}

impl<V, J> Evaluation<V, J> {
    /// Build an evaluation for `mode`, computing the Jacobians only when requested.
    pub fn for_mode<F>(mode: JacobianMode, value: V, jacobians: F) -> Self
    where
        F: FnOnce() -> J,
    {
        match mode {
            JacobianMode::ValueOnly => Evaluation::ValueOnly(value),
            JacobianMode::WithJacobians => Evaluation::WithJacobians(value, jacobians()),
        }
    }

    pub fn value(&self) -> &V {
        match self {
            Evaluation::ValueOnly(v) | Evaluation::WithJacobians(v, _) => v,
        }
    }

    pub fn into_value(self) -> V {
        match self {
            Evaluation::ValueOnly(v) | Evaluation::WithJacobians(v, _) => v,
        }
    }

    pub fn into_parts(self) -> (V, Option<J>) {
        match self {
            Evaluation::ValueOnly(v) => (v, None),
            Evaluation::WithJacobians(v, j) => (v, Some(j)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CheiralityError;

    #[test]
    fn test_recoverable_classification() {
        let cheirality = CoreError::Factor {
            keys: "c0, p1".to_string(),
            source: FactorError::Cheirality(CheiralityError { depth: -1.0 }),
        };
        assert!(cheirality.is_recoverable());
        assert!(CoreError::NonFinite("residual".into()).is_recoverable());
        assert!(!CoreError::MissingKey(Key::new('x', 3)).is_recoverable());
        assert!(!CoreError::DimensionMismatch("jacobian".into()).is_recoverable());
    }

    #[test]
    fn test_factor_error_display_names_keys() {
        let err = CoreError::Factor {
            keys: "c0, p1".to_string(),
            source: FactorError::Cheirality(CheiralityError { depth: -2.5 }),
        };
        let message = err.to_string();
        assert!(message.contains("c0, p1"));
        assert!(message.contains("Cheirality"));
    }

    #[test]
    fn test_evaluation_modes() {
        let value_only: Evaluation<f64, f64> =
            Evaluation::for_mode(JacobianMode::ValueOnly, 1.0, || unreachable!());
        assert_eq!(value_only.into_parts(), (1.0, None));

        let with: Evaluation<f64, f64> =
            Evaluation::for_mode(JacobianMode::WithJacobians, 1.0, || 2.0);
        assert_eq!(*with.value(), 1.0);
        assert_eq!(with.into_parts(), (1.0, Some(2.0)));
    }
}
