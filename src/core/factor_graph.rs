//! Nonlinear factor graph: an ordered collection of [`NonlinearFactor`]s.
//!
//! Factor evaluation and linearization run data-parallel under the `parallel` feature. Results
//! are always collected in factor order, so the assembled system is identical with or without
//! it.

use crate::core::linear::LinearFactorGraph;
use crate::core::{CoreResult, Key, NoiseModel, NonlinearFactor, Values};
use crate::factors::Factor;
use std::collections::BTreeSet;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Default)]
pub struct NonlinearFactorGraph {
    factors: Vec<NonlinearFactor>,
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality factor on `keys`.
    ///
    /// # Example
    ///
    /// ```
    /// use apex_sfm::core::{Key, NoiseModel, NonlinearFactorGraph, Values};
    /// use apex_sfm::factors::PriorFactor;
    /// use nalgebra::Vector3;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let landmark = Key::new('l', 0);
    /// let mut graph = NonlinearFactorGraph::new();
    /// graph.add(vec![landmark], PriorFactor::new(Vector3::new(1.0, 0.0, 0.0)), NoiseModel::unit(3))?;
    ///
    /// let mut values = Values::new();
    /// values.insert(landmark, Vector3::new(0.0, 0.0, 0.0))?;
    /// assert_eq!(graph.error(&values)?, 1.0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn add<F: Factor + 'static>(
        &mut self,
        keys: Vec<Key>,
        factor: F,
        noise_model: NoiseModel,
    ) -> CoreResult<()> {
        self.factors
            .push(NonlinearFactor::new(keys, factor, noise_model)?);
        Ok(())
    }

    pub fn add_factor(&mut self, factor: NonlinearFactor) {
        self.factors.push(factor);
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

    /// Every key referenced by some factor.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors
            .iter()
            .flat_map(|factor| factor.keys().iter().copied())
            .collect()
    }

    /// Sum of squared whitened residuals over the equality factors.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        #[cfg(feature = "parallel")]
        let errors: CoreResult<Vec<f64>> = self
            .factors
            .par_iter()
            .filter(|factor| !factor.is_inequality())
            .map(|factor| factor.error(values))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let errors: CoreResult<Vec<f64>> = self
            .factors
            .iter()
            .filter(|factor| !factor.is_inequality())
            .map(|factor| factor.error(values))
            .collect();

        // summed sequentially so the total does not depend on the thread split
        Ok(errors?.into_iter().sum())
    }

    /// Linearize every factor at `values`, in factor order.
    ///
    /// Inequality factors are linearized too; [`LinearFactorGraph::to_sparse`] leaves them out.
    pub fn linearize(&self, values: &Values) -> CoreResult<LinearFactorGraph> {
        #[cfg(feature = "parallel")]
        let linear: CoreResult<LinearFactorGraph> = self
            .factors
            .par_iter()
            .map(|factor| factor.linearize(values))
            .collect::<CoreResult<Vec<_>>>()
            .map(|factors| factors.into_iter().collect());

        #[cfg(not(feature = "parallel"))]
        let linear: CoreResult<LinearFactorGraph> = self
            .factors
            .iter()
            .map(|factor| factor.linearize(values))
            .collect();

        let linear = linear?;
        debug!(
            "Linearized {} factors over {} variables",
            linear.len(),
            values.len()
        );
        Ok(linear)
    }
}

impl FromIterator<NonlinearFactor> for NonlinearFactorGraph {
    fn from_iter<I: IntoIterator<Item = NonlinearFactor>>(iter: I) -> Self {
        NonlinearFactorGraph {
            factors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreError, FactorKind, Ordering};
    use crate::factors::{BetweenFactor, ComponentBoundFactor, PriorFactor};
    use crate::manifold::LieGroup;
    use crate::manifold::se2::SE2;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn pose_chain() -> CoreResult<(NonlinearFactorGraph, Values)> {
        let (x0, x1) = (Key::new('x', 0), Key::new('x', 1));
        let mut graph = NonlinearFactorGraph::new();
        graph.add(vec![x0], PriorFactor::new(SE2::identity()), NoiseModel::unit(3))?;
        graph.add(
            vec![x0, x1],
            BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.0)),
            NoiseModel::isotropic(3, 0.1)?,
        )?;

        let mut values = Values::new();
        values.insert(x0, SE2::identity())?;
        values.insert(x1, SE2::from_xy_angle(1.2, 0.1, 0.05))?;
        Ok((graph, values))
    }

    #[test]
    fn test_error_is_sum_of_factor_errors() -> TestResult {
        let (graph, values) = pose_chain()?;
        let expected: f64 = graph
            .iter()
            .map(|factor| factor.error(&values))
            .sum::<CoreResult<f64>>()?;
        assert!((graph.error(&values)? - expected).abs() < 1e-12);
        assert!(expected > 0.0);
        Ok(())
    }

    #[test]
    fn test_linearize_keeps_factor_order() -> TestResult {
        let (graph, values) = pose_chain()?;
        let linear = graph.linearize(&values)?;
        assert_eq!(linear.len(), 2);
        let keys: Vec<_> = linear.iter().map(|f| f.keys.len()).collect();
        assert_eq!(keys, vec![1, 2]);

        let (jacobian, rhs) = linear.to_sparse(&Ordering::from_values(&values))?;
        assert_eq!((jacobian.nrows(), jacobian.ncols()), (6, 6));
        // linear error at dx = 0 equals the nonlinear error
        let b_norm: f64 = (0..rhs.nrows()).map(|i| rhs[(i, 0)] * rhs[(i, 0)]).sum();
        assert!((b_norm - graph.error(&values)?).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_missing_key_aborts_linearization() -> TestResult {
        let (mut graph, values) = pose_chain()?;
        let ghost = Key::new('x', 9);
        graph.add(
            vec![Key::new('x', 1), ghost],
            BetweenFactor::new(SE2::identity()),
            NoiseModel::unit(3),
        )?;
        assert!(matches!(
            graph.linearize(&values),
            Err(CoreError::MissingKey(k)) if k == ghost
        ));
        assert!(graph.keys().contains(&ghost));
        Ok(())
    }

    #[test]
    fn test_inequalities_do_not_count_in_error() -> TestResult {
        let landmark = Key::new('l', 0);
        let mut graph = NonlinearFactorGraph::new();
        graph.add(vec![landmark], PriorFactor::new(Vector3::zeros()), NoiseModel::unit(3))?;
        graph.add_factor(NonlinearFactor::inequality(
            vec![landmark],
            ComponentBoundFactor::upper(0, -10.0),
            NoiseModel::unit(1),
            Key::new('d', 0),
        )?);

        let mut values = Values::new();
        values.insert(landmark, Vector3::new(1.0, 0.0, 0.0))?;
        assert_eq!(graph.error(&values)?, 1.0);

        let linear = graph.linearize(&values)?;
        assert_eq!(linear.len(), 2);
        assert!(matches!(
            linear.iter().nth(1).map(|f| f.kind),
            Some(FactorKind::Inequality { .. })
        ));
        let (jacobian, _) = linear.to_sparse(&Ordering::from_values(&values))?;
        assert_eq!(jacobian.nrows(), 3);
        Ok(())
    }
}
