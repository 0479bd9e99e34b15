//! Linearized factor graphs and their sparse assembly.
//!
//! A [`LinearFactorGraph`] holds one [`LinearFactor`] per nonlinear factor, in factor order.
//! [`LinearFactorGraph::to_sparse`] lays the equality factors out as a sparse Jacobian
//! `J` (rows: stacked residuals, columns: stacked tangent spaces per [`Ordering`]) together with
//! the right-hand side `b`, so that the linear objective is `‖J·dx − b‖²`.

use crate::core::{CoreError, CoreResult, FactorKind, Key, Values, VectorValues};
use faer::Mat;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Local first-order approximation of one factor: `‖Σ_k J_k·dx_k − b‖²`.
///
/// The Jacobian blocks and `rhs` are already whitened.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFactor {
    pub keys: Vec<Key>,
    pub jacobians: Vec<DMatrix<f64>>,
    pub rhs: DVector<f64>,
    pub kind: FactorKind,
}

impl LinearFactor {
    pub fn new(
        keys: Vec<Key>,
        jacobians: Vec<DMatrix<f64>>,
        rhs: DVector<f64>,
        kind: FactorKind,
    ) -> Self {
        LinearFactor {
            keys,
            jacobians,
            rhs,
            kind,
        }
    }

    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// `‖Σ_k J_k·dx_k − b‖²`. Keys absent from `delta` contribute a zero step.
    pub fn error(&self, delta: &VectorValues) -> CoreResult<f64> {
        let mut residual = -&self.rhs;
        for (key, jacobian) in self.keys.iter().zip(&self.jacobians) {
            if let Some(dx) = delta.get(*key) {
                if dx.len() != jacobian.ncols() {
                    return Err(CoreError::DimensionMismatch(format!(
                        "step for {key} has length {}, expected {}",
                        dx.len(),
                        jacobian.ncols()
                    ))
                    .log());
                }
                residual += jacobian * dx;
            }
        }
        Ok(residual.norm_squared())
    }
}

/// Column layout of the stacked tangent space: Key → (offset, dimension), in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ordering {
    columns: BTreeMap<Key, (usize, usize)>,
    total_dim: usize,
}

impl Ordering {
    pub fn from_values(values: &Values) -> Self {
        let mut columns = BTreeMap::new();
        let mut offset = 0;
        for (key, value) in values.iter() {
            let dim = value.dim();
            columns.insert(key, (offset, dim));
            offset += dim;
        }
        Ordering {
            columns,
            total_dim: offset,
        }
    }

    pub fn offset(&self, key: Key) -> Option<usize> {
        self.columns.get(&key).map(|&(offset, _)| offset)
    }

    pub fn dim(&self, key: Key) -> Option<usize> {
        self.columns.get(&key).map(|&(_, dim)| dim)
    }

    pub fn total_dim(&self) -> usize {
        self.total_dim
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.columns.keys().copied()
    }

    /// Cut a stacked `total_dim × 1` step back into per-key tangent vectors.
    pub fn split(&self, step: &Mat<f64>) -> CoreResult<VectorValues> {
        if step.nrows() != self.total_dim || step.ncols() != 1 {
            return Err(CoreError::DimensionMismatch(format!(
                "step is {}x{}, expected {}x1",
                step.nrows(),
                step.ncols(),
                self.total_dim
            ))
            .log());
        }
        Ok(self
            .columns
            .iter()
            .map(|(&key, &(offset, dim))| {
                let block = DVector::from_fn(dim, |i, _| step[(offset + i, 0)]);
                (key, block)
            })
            .collect())
    }
}

/// Linearized graph, one [`LinearFactor`] per nonlinear factor in factor order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearFactorGraph {
    factors: Vec<LinearFactor>,
}

impl LinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, factor: LinearFactor) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinearFactor> {
        self.factors.iter()
    }

    fn equality_factors(&self) -> impl Iterator<Item = &LinearFactor> {
        self.factors
            .iter()
            .filter(|factor| factor.kind == FactorKind::Equality)
    }

    /// Sum of [`LinearFactor::error`] over the equality factors.
    pub fn error(&self, delta: &VectorValues) -> CoreResult<f64> {
        self.equality_factors()
            .map(|factor| factor.error(delta))
            .sum()
    }

    /// Assemble the sparse Jacobian and right-hand side of the equality factors.
    ///
    /// Rows follow factor order, and within a factor the Jacobian blocks are emitted in key
    /// order, so the triplet list is identical across runs. Every key must be in `ordering`.
    pub fn to_sparse(
        &self,
        ordering: &Ordering,
    ) -> CoreResult<(SparseColMat<usize, f64>, Mat<f64>)> {
        let rows: usize = self.equality_factors().map(LinearFactor::rows).sum();
        let nnz: usize = self
            .equality_factors()
            .flat_map(|factor| factor.jacobians.iter().map(|j| j.len()))
            .sum();

        let mut triplets = Vec::with_capacity(nnz);
        let mut rhs = Mat::<f64>::zeros(rows, 1);
        let mut row_start = 0;

        for factor in self.equality_factors() {
            for (key, jacobian) in factor.keys.iter().zip(&factor.jacobians) {
                let (offset, dim) = ordering
                    .columns
                    .get(key)
                    .copied()
                    .ok_or_else(|| CoreError::MissingKey(*key).log())?;
                if jacobian.shape() != (factor.rows(), dim) {
                    return Err(CoreError::DimensionMismatch(format!(
                        "Jacobian block for {key} is {:?}, expected {:?}",
                        jacobian.shape(),
                        (factor.rows(), dim)
                    ))
                    .log());
                }
                for col in 0..dim {
                    for row in 0..factor.rows() {
                        triplets.push(Triplet::new(
                            row_start + row,
                            offset + col,
                            jacobian[(row, col)],
                        ));
                    }
                }
            }
            for (i, b) in factor.rhs.iter().enumerate() {
                rhs[(row_start + i, 0)] = *b;
            }
            row_start += factor.rows();
        }

        let jacobian = SparseColMat::try_new_from_triplets(rows, ordering.total_dim(), &triplets)
            .map_err(|e| {
                CoreError::SparseStructure(format!(
                    "failed to assemble {rows}x{} Jacobian",
                    ordering.total_dim()
                ))
                .log_with_source(e)
            })?;
        Ok((jacobian, rhs))
    }
}

impl FromIterator<LinearFactor> for LinearFactorGraph {
    fn from_iter<I: IntoIterator<Item = LinearFactor>>(iter: I) -> Self {
        LinearFactorGraph {
            factors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::LieGroup;
    use crate::manifold::se2::SE2;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn values() -> CoreResult<Values> {
        let mut values = Values::new();
        values.insert(Key::new('x', 1), SE2::from_xy_angle(1.0, 0.0, 0.0))?;
        values.insert(Key::new('l', 0), Vector3::new(0.0, 1.0, 2.0))?;
        values.insert(Key::new('x', 0), SE2::identity())?;
        Ok(values)
    }

    #[test]
    fn test_ordering_follows_key_order() -> TestResult {
        let ordering = Ordering::from_values(&values()?);
        assert_eq!(ordering.offset(Key::new('l', 0)), Some(0));
        assert_eq!(ordering.offset(Key::new('x', 0)), Some(3));
        assert_eq!(ordering.offset(Key::new('x', 1)), Some(6));
        assert_eq!(ordering.dim(Key::new('x', 1)), Some(3));
        assert_eq!(ordering.total_dim(), 9);
        assert_eq!(ordering.offset(Key::new('x', 7)), None);
        Ok(())
    }

    #[test]
    fn test_split_round_trips_columns() -> TestResult {
        let ordering = Ordering::from_values(&values()?);
        let step = Mat::from_fn(9, 1, |i, _| i as f64);
        let delta = ordering.split(&step)?;
        assert_eq!(delta.get(Key::new('l', 0)).map(|v| v.as_slice()), Some(&[0.0, 1.0, 2.0][..]));
        assert_eq!(delta.get(Key::new('x', 1)).map(|v| v.as_slice()), Some(&[6.0, 7.0, 8.0][..]));
        assert!(ordering.split(&Mat::zeros(4, 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_to_sparse_skips_inequalities() -> TestResult {
        let ordering = Ordering::from_values(&values()?);
        let x0 = Key::new('x', 0);
        let l0 = Key::new('l', 0);
        let graph: LinearFactorGraph = [
            LinearFactor::new(
                vec![x0],
                vec![DMatrix::identity(3, 3) * 2.0],
                DVector::from_vec(vec![1.0, 2.0, 3.0]),
                FactorKind::Equality,
            ),
            LinearFactor::new(
                vec![l0],
                vec![DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0])],
                DVector::from_vec(vec![-4.0]),
                FactorKind::Inequality {
                    dual_key: Key::new('d', 0),
                },
            ),
            LinearFactor::new(
                vec![l0, x0],
                vec![DMatrix::from_element(1, 3, 1.0), DMatrix::from_element(1, 3, -1.0)],
                DVector::from_vec(vec![0.5]),
                FactorKind::Equality,
            ),
        ]
        .into_iter()
        .collect();

        let (jacobian, rhs) = graph.to_sparse(&ordering)?;
        assert_eq!(jacobian.nrows(), 4);
        assert_eq!(jacobian.ncols(), 9);
        assert_eq!(rhs.nrows(), 4);
        assert_eq!(rhs[(3, 0)], 0.5);

        let dense = crate::linalg::to_dense(&jacobian);
        assert_eq!(dense[(0, 3)], 2.0);
        assert_eq!(dense[(2, 5)], 2.0);
        assert_eq!(dense[(3, 0)], 1.0);
        assert_eq!(dense[(3, 4)], -1.0);
        assert_eq!(dense[(3, 6)], 0.0);
        Ok(())
    }

    #[test]
    fn test_to_sparse_rejects_unknown_key() -> TestResult {
        let ordering = Ordering::from_values(&values()?);
        let graph: LinearFactorGraph = [LinearFactor::new(
            vec![Key::new('p', 9)],
            vec![DMatrix::identity(3, 3)],
            DVector::zeros(3),
            FactorKind::Equality,
        )]
        .into_iter()
        .collect();
        assert!(matches!(
            graph.to_sparse(&ordering),
            Err(CoreError::MissingKey(_))
        ));
        Ok(())
    }

    #[test]
    fn test_linear_error() -> TestResult {
        let key = Key::new('l', 0);
        let factor = LinearFactor::new(
            vec![key],
            vec![DMatrix::identity(3, 3)],
            DVector::from_vec(vec![1.0, 1.0, 1.0]),
            FactorKind::Equality,
        );
        assert_eq!(factor.error(&VectorValues::new())?, 3.0);
        let mut delta = VectorValues::new();
        delta.insert(key, DVector::from_vec(vec![1.0, 1.0, 0.0]));
        assert_eq!(factor.error(&delta)?, 1.0);
        Ok(())
    }
}
