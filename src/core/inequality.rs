//! Inequality-constrained factor graphs.
//!
//! Each factor carries a scalar feasibility residual `e[0] ≤ 0` and a dual key. The graph does
//! not solve the constrained problem: it linearizes the constraints, reports which are active and
//! checks a candidate primal/dual pair for feasibility and complementary slackness.

use crate::core::key::format_keys;
use crate::core::linear::LinearFactorGraph;
use crate::core::{CoreError, CoreResult, Key, NoiseModel, NonlinearFactor, Values, VectorValues};
use crate::factors::Factor;
use tracing::debug;

#[derive(Debug, Default)]
pub struct NonlinearInequalityFactorGraph {
    factors: Vec<NonlinearFactor>,
}

impl NonlinearInequalityFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inequality factor. Equality factors are rejected with `NotInequality`.
    pub fn add(&mut self, factor: NonlinearFactor) -> CoreResult<()> {
        if !factor.is_inequality() {
            return Err(CoreError::NotInequality(format_keys(factor.keys())).log());
        }
        self.factors.push(factor);
        Ok(())
    }

    pub fn add_inequality<F: Factor + 'static>(
        &mut self,
        keys: Vec<Key>,
        factor: F,
        noise_model: NoiseModel,
        dual_key: Key,
    ) -> CoreResult<()> {
        self.add(NonlinearFactor::inequality(
            keys,
            factor,
            noise_model,
            dual_key,
        )?)
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NonlinearFactor> {
        self.factors.iter()
    }

    pub fn dual_keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.factors.iter().filter_map(NonlinearFactor::dual_key)
    }

    pub fn linearize(&self, values: &Values) -> CoreResult<LinearFactorGraph> {
        self.factors
            .iter()
            .map(|factor| factor.linearize(values))
            .collect()
    }

    /// Dual keys of the constraints with `e[0] ≥ −tol`.
    pub fn active_set(&self, values: &Values, tolerance: f64) -> CoreResult<Vec<Key>> {
        let mut active = Vec::new();
        for factor in &self.factors {
            if factor.is_active(values, tolerance)? {
                active.extend(factor.dual_key());
            }
        }
        Ok(active)
    }

    /// Whether `values` is feasible and complementary to `duals` within `tolerance`.
    ///
    /// A constraint with `e[0] > tol` is infeasible. A constraint whose dual key is absent from
    /// `duals` is inactive and only needs to be feasible. A constraint with a dual must be tight:
    /// `|e[0]| ≤ tol`.
    ///
    /// A dual that was never inserted is indistinguishable from an inactive constraint here, so a
    /// caller that forgets a dual gets a feasibility-only check for it.
    pub fn check_feasibility_and_complementarity(
        &self,
        values: &Values,
        duals: &VectorValues,
        tolerance: f64,
    ) -> CoreResult<bool> {
        for factor in &self.factors {
            let e = factor.unwhitened_error(values)?[0];
            if e > tolerance {
                debug!("Constraint on [{}] infeasible: e = {e:.3e}", format_keys(factor.keys()));
                return Ok(false);
            }
            let Some(dual_key) = factor.dual_key() else {
                continue;
            };
            if duals.contains_key(dual_key) && e.abs() > tolerance {
                debug!(
                    "Constraint on [{}] violates complementarity: e = {e:.3e} with dual {dual_key}",
                    format_keys(factor.keys())
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}
