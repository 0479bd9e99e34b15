//! Planar pose graphs (Pose2 SLAM).
//!
//! Poses are SE(2) vertices keyed `x{id}`; each constraint becomes a [`BetweenFactor`] with a
//! diagonal noise model. The first pose (smallest id) is anchored with a unit-noise prior at its
//! initial estimate.

use super::{ProblemError, ProblemResult, pose_key};
use crate::core::{NoiseModel, NonlinearFactorGraph, Values};
use crate::factors::{BetweenFactor, PriorFactor};
use crate::manifold::se2::SE2;
use nalgebra::{DVector, Vector3};
use std::{
    collections::BTreeMap,
    fmt,
    fmt::{Display, Formatter},
};
use tracing::debug;

/// Relative pose measurement between two planar poses.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose2Constraint {
    pub from: usize,
    pub to: usize,
    /// `from⁻¹ ∘ to`
    pub measurement: SE2,
    /// Standard deviations of `(x, y, θ)`
    pub sigmas: Vector3<f64>,
}

impl Pose2Constraint {
    pub fn new(from: usize, to: usize, dx: f64, dy: f64, dtheta: f64, sigmas: Vector3<f64>) -> Self {
        Self {
            from,
            to,
            measurement: SE2::from_xy_angle(dx, dy, dtheta),
            sigmas,
        }
    }

    /// Sigmas from the diagonal of a 3×3 information matrix.
    pub fn from_information_diagonal(
        from: usize,
        to: usize,
        measurement: SE2,
        information: Vector3<f64>,
    ) -> Self {
        Self {
            from,
            to,
            measurement,
            sigmas: information.map(|w| 1.0 / w.sqrt()),
        }
    }
}

impl Display for Pose2Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose2Constraint [ from: {}, to: {}, measurement: {}, sigmas: ({:.3}, {:.3}, {:.3}) ]",
            self.from, self.to, self.measurement, self.sigmas.x, self.sigmas.y, self.sigmas.z
        )
    }
}

/// Initial pose estimates plus relative constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose2Graph {
    pub poses: BTreeMap<usize, SE2>,
    pub constraints: Vec<Pose2Constraint>,
}

impl Display for Pose2Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose2Graph [ poses: {}, constraints: {} ]",
            self.poses.len(),
            self.constraints.len()
        )
    }
}

impl Pose2Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pose(&mut self, id: usize, pose: SE2) {
        self.poses.insert(id, pose);
    }

    pub fn add_constraint(&mut self, constraint: Pose2Constraint) {
        self.constraints.push(constraint);
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Factor graph and initial Values. Factor order: the anchor prior, then the constraints in
    /// insertion order.
    pub fn build(&self) -> ProblemResult<(NonlinearFactorGraph, Values)> {
        let Some((&first_id, first_pose)) = self.poses.iter().next() else {
            return Err(ProblemError::Empty("pose graph has no poses".to_string()).log());
        };

        let mut graph = NonlinearFactorGraph::new();
        graph.add(
            vec![pose_key(first_id)],
            PriorFactor::new(first_pose.clone()),
            NoiseModel::unit(3),
        )?;

        for (index, constraint) in self.constraints.iter().enumerate() {
            for pose in [constraint.from, constraint.to] {
                if !self.poses.contains_key(&pose) {
                    return Err(ProblemError::UnknownPose {
                        constraint: index,
                        pose,
                    }
                    .log());
                }
            }
            let noise = NoiseModel::diagonal(DVector::from_column_slice(constraint.sigmas.as_slice()))?;
            graph.add(
                vec![pose_key(constraint.from), pose_key(constraint.to)],
                BetweenFactor::new(constraint.measurement.clone()),
                noise,
            )?;
        }

        let mut values = Values::new();
        for (&id, pose) in &self.poses {
            values.insert(pose_key(id), pose.clone())?;
        }

        debug!("Pose2 SLAM problem: {} factors from {}", graph.len(), self);
        Ok((graph, values))
    }
}
