//! Inequality factors. The residual is a single row `e` with `e ≤ 0` when feasible.

use super::{Factor, FactorError, FactorEvaluation, FactorResult, check_arity, variable};
use crate::core::{Evaluation, JacobianMode, Value};
use nalgebra::{DMatrix, DVector, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSense {
    /// `x[i] ≤ bound`
    Upper,
    /// `x[i] ≥ bound`
    Lower,
}

impl BoundSense {
    fn sign(self) -> f64 {
        match self {
            BoundSense::Upper => 1.0,
            BoundSense::Lower => -1.0,
        }
    }
}

/// Bound on one component of a point or vector: `e = sign·(x[i] − bound)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentBoundFactor {
    component: usize,
    bound: f64,
    sense: BoundSense,
}

impl ComponentBoundFactor {
    pub fn new(component: usize, bound: f64, sense: BoundSense) -> Self {
        ComponentBoundFactor {
            component,
            bound,
            sense,
        }
    }

    pub fn upper(component: usize, bound: f64) -> Self {
        Self::new(component, bound, BoundSense::Upper)
    }

    pub fn lower(component: usize, bound: f64) -> Self {
        Self::new(component, bound, BoundSense::Lower)
    }
}

impl Factor for ComponentBoundFactor {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 1)?;
        let components: &[f64] = match values[0] {
            Value::Point3(p) => p.as_slice(),
            Value::Vector(v) => v.as_slice(),
            other => {
                return Err(FactorError::InvalidVariableType {
                    index: 0,
                    expected: "Point3 or Vector",
                    actual: other.type_name(),
                }
                .log());
            }
        };
        let x = *components.get(self.component).ok_or_else(|| {
            FactorError::InvalidDimension {
                expected: self.component + 1,
                actual: components.len(),
            }
            .log()
        })?;

        let sign = self.sense.sign();
        let residual = DVector::from_element(1, sign * (x - self.bound));
        Ok(Evaluation::for_mode(mode, residual, || {
            let mut jacobian = DMatrix::zeros(1, components.len());
            jacobian[(0, self.component)] = sign;
            vec![jacobian]
        }))
    }
}

/// Maximum distance between two points: `e = ‖a − b‖ − d_max`.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxDistanceFactor {
    max_distance: f64,
}

impl MaxDistanceFactor {
    pub fn new(max_distance: f64) -> Self {
        MaxDistanceFactor { max_distance }
    }
}

impl Factor for MaxDistanceFactor {
    fn dimension(&self) -> usize {
        1
    }

    fn evaluate(&self, values: &[&Value], mode: JacobianMode) -> FactorResult<FactorEvaluation> {
        check_arity(values, 2)?;
        let a: &Vector3<f64> = variable(values, 0)?;
        let b: &Vector3<f64> = variable(values, 1)?;
        let diff = a - b;
        let distance = diff.norm();
        let residual = DVector::from_element(1, distance - self.max_distance);

        Ok(Evaluation::for_mode(mode, residual, || {
            // coincident points: the zero subgradient
            let direction = if distance > f64::EPSILON {
                diff / distance
            } else {
                Vector3::zeros()
            };
            let d_a = DMatrix::from_row_slice(1, 3, direction.as_slice());
            vec![d_a.clone(), -d_a]
        }))
    }
}
