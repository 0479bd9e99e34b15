//! Levenberg-Marquardt algorithm over nonlinear factor graphs.
//!
//! Minimizes the total squared whitened error
//!
//! ```text
//! E(x) = Σ_f ‖Σ_f^{-1/2} r_f(x)‖²
//! ```
//!
//! over the equality factors of a graph. Each outer iteration linearizes the graph at the last
//! accepted Values and solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λI)·h = Jᵀb = −Jᵀr
//! ```
//!
//! with the configured sparse solver. The candidate `x ⊕ h` is accepted only if it lowers the
//! error; otherwise λ grows and the same linearization is solved again, up to `max_retries`
//! times.
//!
//! ## Damping update
//!
//! With the gain ratio `ρ = (E(x) − E(x ⊕ h)) / (hᵀ(λh − g))`, Nielsen's rule is
//!
//! ```text
//! accepted:  λ ← λ · max(1/3, 1 − (2ρ − 1)³),  ν ← 2
//! rejected:  λ ← λ · ν,                        ν ← 2ν
//! ```
//!
//! ## Failure handling
//!
//! A cheirality failure or a singular solve while trying a step counts as a rejection: the
//! damping is raised and the step recomputed from the last accepted Values. Structural errors
//! such as a missing key abort the run at once.
//!
//! # Example
//!
//! ```
//! use apex_sfm::core::{Key, NoiseModel, NonlinearFactorGraph, Values};
//! use apex_sfm::factors::{BetweenFactor, PriorFactor};
//! use apex_sfm::manifold::{LieGroup, se2::SE2};
//! use apex_sfm::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (x0, x1) = (Key::new('x', 0), Key::new('x', 1));
//! let mut graph = NonlinearFactorGraph::new();
//! graph.add(vec![x0], PriorFactor::new(SE2::identity()), NoiseModel::unit(3))?;
//! graph.add(
//!     vec![x0, x1],
//!     BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.1)),
//!     NoiseModel::unit(3),
//! )?;
//!
//! let mut initial = Values::new();
//! initial.insert(x0, SE2::from_xy_angle(0.1, -0.1, 0.05))?;
//! initial.insert(x1, SE2::from_xy_angle(0.8, 0.3, -0.2))?;
//!
//! let config = LevenbergMarquardtConfig::new().with_absolute_error_tolerance(1e-12);
//! let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
//! assert!(result.converged());
//! assert!(result.final_error < 1e-10);
//! # Ok(())
//! # }
//! ```

use crate::core::{
    NonlinearFactorGraph, NonlinearInequalityFactorGraph, Ordering, Values, VectorValues,
};
use crate::linalg::{LinearSolverType, SparseLinearSolver, create_linear_solver, marginal_covariances};
use crate::optimizer::{
    ConvergenceInfo, OptimizationStatus, OptimizerError, OptimizerResult, SolverResult,
};
use faer::{Mat, sparse::SparseColMat};
use std::{
    fmt,
    fmt::{Display, Formatter},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};
use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

/// Summary of a Levenberg-Marquardt run, logged at debug level on termination.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    pub initial_error: f64,
    pub final_error: f64,
    pub iterations: usize,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub final_damping: f64,
    pub max_gradient_norm: f64,
    pub final_gradient_norm: f64,
    pub max_step_norm: f64,
    pub final_step_norm: f64,
    pub total_time: Duration,
    pub average_time_per_iteration: Duration,
    /// Per-iteration table, filled only when debug logging is enabled
    pub iteration_history: Vec<IterationStats>,
    pub status: OptimizationStatus,
}

impl Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Levenberg-Marquardt Final Result")?;
        if self.status.is_converged() {
            writeln!(f, "CONVERGED ({})", self.status)?;
        } else {
            writeln!(f, "NOT CONVERGED ({})", self.status)?;
        }

        let attempts = (self.accepted_steps + self.rejected_steps).max(1) as f64;
        writeln!(f)?;
        writeln!(f, "Error:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_error)?;
        writeln!(f, "  Final:     {:.6e}", self.final_error)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_error - self.final_error,
            100.0 * (self.initial_error - self.final_error) / self.initial_error.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:            {}", self.iterations)?;
        writeln!(
            f,
            "  Accepted steps:   {} ({:.1}%)",
            self.accepted_steps,
            100.0 * self.accepted_steps as f64 / attempts
        )?;
        writeln!(
            f,
            "  Rejected steps:   {} ({:.1}%)",
            self.rejected_steps,
            100.0 * self.rejected_steps as f64 / attempts
        )?;
        writeln!(f, "  Final damping:    {:.2e}", self.final_damping)?;
        writeln!(f)?;
        writeln!(f, "Gradient:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_gradient_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_gradient_norm)?;
        writeln!(f)?;
        writeln!(f, "Step:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_step_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_step_norm)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        write!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )
    }
}

/// Per-iteration statistics (Ceres-style output).
#[derive(Debug, Clone)]
pub struct IterationStats {
    pub iteration: usize,
    /// Error after the iteration
    pub error: f64,
    pub error_change: f64,
    /// `‖Jᵀr‖`
    pub gradient_norm: f64,
    /// `‖h‖` of the last attempt
    pub step_norm: f64,
    /// Gain ratio of the last attempt
    pub rho: f64,
    /// λ after the iteration
    pub damping: f64,
    /// Linear solves in this iteration
    pub attempts: usize,
    pub iter_time_ms: f64,
    pub total_time_ms: f64,
    pub accepted: bool,
}

impl IterationStats {
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>11}  {:>8}  {:>11}  {:>13}  {:>6}",
            "iter",
            "error",
            "error_change",
            "|gradient|",
            "|step|",
            "rho",
            "lambda",
            "attempts",
            "iter_time",
            "total_time",
            "status"
        );
    }

    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };
        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>8}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.error,
            self.error_change,
            self.gradient_norm,
            self.step_norm,
            self.rho,
            self.damping,
            self.attempts,
            self.iter_time_ms,
            self.total_time_ms,
            status
        );
    }
}

/// Configuration parameters for the Levenberg-Marquardt optimizer.
///
/// ```
/// use apex_sfm::linalg::LinearSolverType;
/// use apex_sfm::optimizer::LevenbergMarquardtConfig;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_max_iterations(100)
///     .with_relative_error_tolerance(1e-8)
///     .with_damping(1e-3)
///     .with_linear_solver_type(LinearSolverType::SparseQR);
/// assert_eq!(config.max_retries, 10);
/// ```
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    pub linear_solver_type: LinearSolverType,
    pub max_iterations: usize,
    /// Stop when `(E_prev − E) / E_prev` falls below this after an accepted step
    pub relative_error_tolerance: f64,
    /// Stop when `E` falls to or below this
    pub absolute_error_tolerance: f64,
    /// Initial λ
    pub damping: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    /// Linear solves per outer iteration beyond the first
    pub max_retries: usize,
    /// Checked between outer iterations
    pub abort_signal: Option<Arc<AtomicBool>>,
    /// Tolerance of the feasibility/complementarity check in constrained runs
    pub constraint_tolerance: f64,
    /// Marginal covariances of the final Values
    pub compute_covariances: bool,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: LinearSolverType::default(),
            max_iterations: 50,
            relative_error_tolerance: 1e-5,
            absolute_error_tolerance: 1e-5,
            damping: 1e-4,
            damping_min: 1e-12,
            damping_max: 1e12,
            max_retries: 10,
            abort_signal: None,
            constraint_tolerance: 1e-6,
            compute_covariances: false,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_relative_error_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_error_tolerance = tolerance;
        self
    }

    pub fn with_absolute_error_tolerance(mut self, tolerance: f64) -> Self {
        self.absolute_error_tolerance = tolerance;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_abort_signal(mut self, signal: Arc<AtomicBool>) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    pub fn with_constraint_tolerance(mut self, tolerance: f64) -> Self {
        self.constraint_tolerance = tolerance;
        self
    }

    pub fn with_compute_covariances(mut self, compute_covariances: bool) -> Self {
        self.compute_covariances = compute_covariances;
        self
    }

    fn validate(&self) -> OptimizerResult<()> {
        let problems = [
            (self.max_iterations == 0, "max_iterations must be positive"),
            (
                !(self.relative_error_tolerance >= 0.0 && self.absolute_error_tolerance >= 0.0),
                "error tolerances must be non-negative",
            ),
            (
                !(self.damping_min > 0.0
                    && self.damping_min <= self.damping
                    && self.damping <= self.damping_max),
                "damping must satisfy 0 < min <= initial <= max",
            ),
        ];
        match problems.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => {
                Err(OptimizerError::InvalidParameters((*message).to_string()).log())
            }
            None => Ok(()),
        }
    }

    /// Print configuration parameters at debug level
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Levenberg-Marquardt\n  Linear solver: {}\n  Convergence Criteria:\n  Max iterations:      {}\n  Relative tolerance:  {:.2e}\n  Absolute tolerance:  {:.2e}\n  Damping Parameters:\n  Initial damping:     {:.2e}\n  Damping range:       [{:.2e}, {:.2e}]\n  Max retries:         {}\n  Abort signal:        {}\n  Compute covariances: {}",
            self.linear_solver_type,
            self.max_iterations,
            self.relative_error_tolerance,
            self.absolute_error_tolerance,
            self.damping,
            self.damping_min,
            self.damping_max,
            self.max_retries,
            if self.abort_signal.is_some() {
                "set"
            } else {
                "none"
            },
            if self.compute_covariances {
                "enabled"
            } else {
                "disabled"
            }
        );
    }
}

/// λ and its growth factor ν.
#[derive(Debug, Clone, Copy)]
struct Damping {
    lambda: f64,
    nu: f64,
    min: f64,
    max: f64,
}

impl Damping {
    fn new(config: &LevenbergMarquardtConfig) -> Self {
        Damping {
            lambda: config.damping,
            nu: 2.0,
            min: config.damping_min,
            max: config.damping_max,
        }
    }

    fn accept(&mut self, rho: f64) {
        let c = 2.0 * rho - 1.0;
        self.lambda = (self.lambda * (1.0_f64 / 3.0).max(1.0 - c * c * c)).max(self.min);
        self.nu = 2.0;
    }

    fn reject(&mut self) {
        self.lambda = (self.lambda * self.nu).min(self.max);
        self.nu *= 2.0;
    }

    fn at_limit(&self) -> bool {
        self.lambda >= self.max
    }
}

/// A solved, not yet accepted step.
struct Trial {
    values: Values,
    error: f64,
    step_norm: f64,
    gradient_norm: f64,
    predicted_reduction: f64,
}

/// `hᵀ(λh − g)`: the decrease of the linear model `‖J·h + r‖²` for the damped step.
fn predicted_reduction(step: &Mat<f64>, gradient: &Mat<f64>, lambda: f64) -> f64 {
    (0..step.nrows())
        .map(|i| step[(i, 0)] * (lambda * step[(i, 0)] - gradient[(i, 0)]))
        .sum()
}

fn gain_ratio(current: f64, candidate: f64, predicted: f64) -> f64 {
    let actual = current - candidate;
    if predicted.abs() < 1e-15 {
        if actual > 0.0 { 1.0 } else { 0.0 }
    } else {
        actual / predicted
    }
}

/// Levenberg-Marquardt optimizer.
///
/// Stateless between runs: the damping, linear solver and statistics live in each
/// [`optimize`](Self::optimize) call.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    fn abort_requested(&self) -> bool {
        self.config
            .abort_signal
            .as_ref()
            .is_some_and(|signal| signal.load(AtomicOrdering::Relaxed))
    }

    /// Solve the damped system and evaluate the candidate. Values are never modified here.
    #[allow(clippy::too_many_arguments)]
    fn try_step(
        &self,
        linear_solver: &mut dyn SparseLinearSolver,
        residuals: &Mat<f64>,
        jacobian: &SparseColMat<usize, f64>,
        lambda: f64,
        ordering: &Ordering,
        graph: &NonlinearFactorGraph,
        values: &Values,
    ) -> OptimizerResult<Trial> {
        let step = linear_solver.solve_augmented_equation(residuals, jacobian, lambda)?;
        let gradient_norm = linear_solver
            .get_gradient()
            .map(|g| g.norm_l2())
            .unwrap_or_default();
        let predicted = linear_solver
            .get_gradient()
            .map(|g| predicted_reduction(&step, g, lambda))
            .unwrap_or_default();

        let delta: VectorValues = ordering.split(&step)?;
        let candidate = values.retract(&delta)?;
        let error = graph.error(&candidate)?;
        Ok(Trial {
            values: candidate,
            error,
            step_norm: step.norm_l2(),
            gradient_norm,
            predicted_reduction: predicted,
        })
    }

    /// Minimize the equality error of `graph` starting from `initial`.
    ///
    /// # Errors
    ///
    /// - `Core(MissingKey | TypeMismatch | ...)` for structural problems, immediately
    /// - `Core(Factor { .. })` when a factor fails at the initial or last accepted Values
    ///   (e.g. a point already behind a camera), immediately and without retries
    /// - `RetriesExhausted` when every attempt of one iteration failed and the last failure was
    ///   an error (cheirality at a candidate, singular system)
    /// - `InvalidParameters`, `EmptyProblem`, `NumericalInstability` before the first iteration
    pub fn optimize(
        &self,
        graph: &NonlinearFactorGraph,
        initial: &Values,
    ) -> OptimizerResult<SolverResult> {
        let start_time = Instant::now();
        self.config.validate()?;
        if initial.is_empty() {
            return Err(OptimizerError::EmptyProblem.log());
        }

        let ordering = Ordering::from_values(initial);
        let mut values = initial.clone();
        let mut current_error = graph.error(&values)?;
        if !current_error.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "initial error is {current_error}"
            ))
            .log());
        }
        let initial_error = current_error;
        let mut error_history = vec![current_error];

        let mut linear_solver = create_linear_solver(self.config.linear_solver_type);
        let mut damping = Damping::new(&self.config);
        let mut info = ConvergenceInfo {
            error_evaluations: 1,
            ..ConvergenceInfo::default()
        };
        let mut max_gradient_norm: f64 = 0.0;
        let mut max_step_norm: f64 = 0.0;
        let debug_enabled = tracing::enabled!(tracing::Level::DEBUG);
        let mut iteration_stats = Vec::new();
        let mut iteration = 0;

        if debug_enabled {
            self.config.print_configuration();
            debug!(
                "Optimizing {} factors over {} variables ({} DOF), initial error {:.6e}",
                graph.len(),
                values.len(),
                ordering.total_dim(),
                current_error
            );
            IterationStats::print_header();
        }

        let status = loop {
            if current_error <= self.config.absolute_error_tolerance {
                break OptimizationStatus::Converged;
            }
            if iteration >= self.config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }
            if self.abort_requested() {
                break OptimizationStatus::UserTerminated;
            }

            let iter_start = Instant::now();
            let linear = graph.linearize(&values)?;
            let (jacobian, rhs) = linear.to_sparse(&ordering)?;
            let residuals = -&rhs;
            info.linearizations += 1;
            iteration += 1;

            let mut accepted: Option<(Trial, f64)> = None;
            let mut last_failure: Option<OptimizerError> = None;
            let mut attempts = 0;
            let mut last_rho = 0.0;

            while attempts <= self.config.max_retries {
                attempts += 1;
                let lambda = damping.lambda;
                match self.try_step(
                    linear_solver.as_mut(),
                    &residuals,
                    &jacobian,
                    lambda,
                    &ordering,
                    graph,
                    &values,
                ) {
                    Ok(trial) => {
                        info.error_evaluations += 1;
                        info.final_gradient_norm = trial.gradient_norm;
                        info.final_step_norm = trial.step_norm;
                        max_gradient_norm = max_gradient_norm.max(trial.gradient_norm);
                        max_step_norm = max_step_norm.max(trial.step_norm);
                        last_rho =
                            gain_ratio(current_error, trial.error, trial.predicted_reduction);
                        last_failure = None;

                        if trial.error.is_finite() && trial.error < current_error {
                            damping.accept(last_rho);
                            accepted = Some((trial, last_rho));
                            break;
                        }
                        info.rejected_steps += 1;
                        damping.reject();
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(
                            "Iteration {iteration}, attempt {attempts}: {e}; raising damping from {lambda:.2e}"
                        );
                        info.rejected_steps += 1;
                        damping.reject();
                        last_failure = Some(e);
                    }
                    Err(e) => return Err(e),
                }
                if damping.at_limit() {
                    break;
                }
            }

            let previous_error = current_error;
            let step_accepted = accepted.is_some();
            if let Some((trial, _)) = accepted {
                info.accepted_steps += 1;
                values = trial.values;
                current_error = trial.error;
                error_history.push(current_error);
            }

            if debug_enabled {
                let stats = IterationStats {
                    iteration,
                    error: current_error,
                    error_change: previous_error - current_error,
                    gradient_norm: info.final_gradient_norm,
                    step_norm: info.final_step_norm,
                    rho: last_rho,
                    damping: damping.lambda,
                    attempts,
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                    accepted: step_accepted,
                };
                stats.print_line();
                iteration_stats.push(stats);
            }

            if !step_accepted {
                if let Some(cause) = last_failure {
                    return Err(OptimizerError::RetriesExhausted {
                        retries: attempts,
                        cause: Box::new(cause),
                    }
                    .log());
                }
                if damping.at_limit() {
                    break OptimizationStatus::DampingLimitReached;
                }
                break OptimizationStatus::NoDecrease;
            }

            if current_error > self.config.absolute_error_tolerance
                && (previous_error - current_error) / previous_error
                    < self.config.relative_error_tolerance
            {
                break OptimizationStatus::Converged;
            }
        };

        let elapsed = start_time.elapsed();
        info.final_damping = damping.lambda;

        let summary = LevenbergMarquardtSummary {
            initial_error,
            final_error: current_error,
            iterations: iteration,
            accepted_steps: info.accepted_steps,
            rejected_steps: info.rejected_steps,
            final_damping: damping.lambda,
            max_gradient_norm,
            final_gradient_norm: info.final_gradient_norm,
            max_step_norm,
            final_step_norm: info.final_step_norm,
            total_time: elapsed,
            average_time_per_iteration: if iteration > 0 {
                elapsed / iteration as u32
            } else {
                Duration::from_secs(0)
            },
            iteration_history: iteration_stats,
            status,
        };
        if debug_enabled {
            debug!("{}", summary);
        }
        if status.is_converged() {
            info!(
                "Levenberg-Marquardt converged after {iteration} iterations: {initial_error:.6e} -> {current_error:.6e}"
            );
        } else {
            warn!(
                "Levenberg-Marquardt stopped without convergence ({status}) after {iteration} iterations: {initial_error:.6e} -> {current_error:.6e}"
            );
        }

        let covariances = if self.config.compute_covariances {
            self.compute_covariances(graph, &values, &ordering)
        } else {
            None
        };

        Ok(SolverResult {
            values,
            status,
            initial_error,
            final_error: current_error,
            iterations: iteration,
            elapsed,
            error_history,
            convergence_info: info,
            constraints_satisfied: None,
            covariances,
        })
    }

    /// [`optimize`](Self::optimize) followed by the feasibility/complementarity check of
    /// `inequalities` against `duals` at the final Values.
    pub fn optimize_constrained(
        &self,
        graph: &NonlinearFactorGraph,
        inequalities: &NonlinearInequalityFactorGraph,
        initial: &Values,
        duals: &VectorValues,
    ) -> OptimizerResult<SolverResult> {
        let mut result = self.optimize(graph, initial)?;
        let satisfied = inequalities.check_feasibility_and_complementarity(
            &result.values,
            duals,
            self.config.constraint_tolerance,
        )?;
        if !satisfied {
            warn!(
                "Final values violate {} inequality constraints at tolerance {:.1e}",
                inequalities.len(),
                self.config.constraint_tolerance
            );
        }
        result.constraints_satisfied = Some(satisfied);
        Ok(result)
    }

    /// `(JᵀJ)⁻¹` at `values`, cut into per-key blocks. `None` when the system is singular.
    fn compute_covariances(
        &self,
        graph: &NonlinearFactorGraph,
        values: &Values,
        ordering: &Ordering,
    ) -> Option<std::collections::BTreeMap<crate::core::Key, Mat<f64>>> {
        let mut linear_solver = create_linear_solver(self.config.linear_solver_type);
        let covariance = graph
            .linearize(values)
            .and_then(|linear| linear.to_sparse(ordering))
            .map_err(OptimizerError::from)
            .and_then(|(jacobian, rhs)| {
                linear_solver
                    .solve_normal_equation(&(-&rhs), &jacobian)
                    .map_err(OptimizerError::from)
            });
        if let Err(e) = covariance {
            warn!("Covariance computation failed: {e}");
            return None;
        }
        let full = linear_solver.compute_covariance_matrix()?;
        Some(marginal_covariances(full, ordering))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreError, Key, NoiseModel, NonlinearFactor};
    use crate::factors::{BetweenFactor, ComponentBoundFactor, PriorFactor};
    use crate::manifold::LieGroup;
    use crate::manifold::se2::SE2;
    use nalgebra::{DVector, Vector3};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn pose_triangle() -> Result<(NonlinearFactorGraph, Values), CoreError> {
        let keys: Vec<Key> = (0..3).map(|i| Key::new('x', i)).collect();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(vec![keys[0]], PriorFactor::new(SE2::identity()), NoiseModel::unit(3))?;
        let odometry = SE2::from_xy_angle(1.0, 0.0, std::f64::consts::FRAC_PI_2);
        graph.add(
            vec![keys[0], keys[1]],
            BetweenFactor::new(odometry.clone()),
            NoiseModel::diagonal(DVector::from_vec(vec![0.2, 0.2, 0.1]))?,
        )?;
        graph.add(
            vec![keys[1], keys[2]],
            BetweenFactor::new(odometry),
            NoiseModel::diagonal(DVector::from_vec(vec![0.2, 0.2, 0.1]))?,
        )?;

        let mut values = Values::new();
        values.insert(keys[0], SE2::from_xy_angle(0.2, -0.1, 0.1))?;
        values.insert(keys[1], SE2::from_xy_angle(1.3, 0.2, 1.4))?;
        values.insert(keys[2], SE2::from_xy_angle(0.8, 1.2, 3.0))?;
        Ok((graph, values))
    }

    #[test]
    fn test_damping_update() {
        let config = LevenbergMarquardtConfig::new();
        let mut damping = Damping::new(&config);
        damping.accept(1.0);
        assert!((damping.lambda - 1e-4 / 3.0).abs() < 1e-18);

        damping.reject();
        damping.reject();
        assert!((damping.nu - 8.0).abs() < 1e-12);
        assert!((damping.lambda - 1e-4 / 3.0 * 8.0).abs() < 1e-15);

        damping.accept(0.5);
        assert_eq!(damping.nu, 2.0);
    }

    #[test]
    fn test_predicted_reduction_matches_linear_model() {
        // J = I, r = [1, -2]: g = r, h = -g / (1 + λ)
        let lambda = 0.5;
        let gradient: Mat<f64> = Mat::from_fn(2, 1, |i, _| [1.0, -2.0][i]);
        let step: Mat<f64> = Mat::from_fn(2, 1, |i, _| -gradient[(i, 0)] / (1.0 + lambda));
        let model_after: f64 = (0..2)
            .map(|i| (step[(i, 0)] + gradient[(i, 0)]).powi(2))
            .sum();
        let expected = 5.0 - model_after;
        assert!((predicted_reduction(&step, &gradient, lambda) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_pose_graph_converges_monotonically() -> TestResult {
        let (graph, initial) = pose_triangle()?;
        let config = LevenbergMarquardtConfig::new()
            .with_absolute_error_tolerance(1e-14)
            .with_relative_error_tolerance(1e-12);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;

        assert!(result.converged(), "status {}", result.status);
        assert!(result.final_error < 1e-12);
        assert!(result.error_history.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(result.error_history[0], result.initial_error);
        let x2: &SE2 = result.values.at(Key::new('x', 2))?;
        assert!((x2.x() - 1.0).abs() < 1e-6);
        assert!((x2.y() - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_qr_backend_converges() -> TestResult {
        let (graph, initial) = pose_triangle()?;
        let config = LevenbergMarquardtConfig::new()
            .with_linear_solver_type(LinearSolverType::SparseQR)
            .with_absolute_error_tolerance(1e-12);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
        assert!(result.converged());
        Ok(())
    }

    #[test]
    fn test_max_iterations_returns_best_values() -> TestResult {
        let (graph, initial) = pose_triangle()?;
        let config = LevenbergMarquardtConfig::new()
            .with_max_iterations(1)
            .with_absolute_error_tolerance(0.0)
            .with_relative_error_tolerance(0.0);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
        assert!(result.final_error < result.initial_error);
        Ok(())
    }

    #[test]
    fn test_already_converged_at_start() -> TestResult {
        let (graph, _) = pose_triangle()?;
        let mut exact = Values::new();
        exact.insert(Key::new('x', 0), SE2::identity())?;
        exact.insert(Key::new('x', 1), SE2::from_xy_angle(1.0, 0.0, std::f64::consts::FRAC_PI_2))?;
        exact.insert(Key::new('x', 2), SE2::from_xy_angle(1.0, 1.0, std::f64::consts::PI))?;
        let result = LevenbergMarquardt::new().optimize(&graph, &exact)?;
        assert_eq!(result.status, OptimizationStatus::Converged);
        assert_eq!(result.iterations, 0);
        Ok(())
    }

    #[test]
    fn test_abort_signal_stops_before_first_iteration() -> TestResult {
        let (graph, initial) = pose_triangle()?;
        let signal = Arc::new(AtomicBool::new(true));
        let config = LevenbergMarquardtConfig::new().with_abort_signal(signal);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
        assert_eq!(result.status, OptimizationStatus::UserTerminated);
        assert_eq!(result.values, initial);
        Ok(())
    }

    #[test]
    fn test_invalid_configuration() -> TestResult {
        let (graph, initial) = pose_triangle()?;
        let config = LevenbergMarquardtConfig::new().with_damping_bounds(1.0, 0.5);
        assert!(matches!(
            LevenbergMarquardt::with_config(config).optimize(&graph, &initial),
            Err(OptimizerError::InvalidParameters(_))
        ));
        assert!(matches!(
            LevenbergMarquardt::new().optimize(&graph, &Values::new()),
            Err(OptimizerError::EmptyProblem)
        ));
        Ok(())
    }

    #[test]
    fn test_constrained_run_reports_feasibility() -> TestResult {
        let landmark = Key::new('l', 0);
        let mut graph = NonlinearFactorGraph::new();
        graph.add(
            vec![landmark],
            PriorFactor::new(Vector3::new(2.0, 0.0, 0.0)),
            NoiseModel::unit(3),
        )?;
        let mut initial = Values::new();
        initial.insert(landmark, Vector3::zeros())?;

        let mut satisfied = NonlinearInequalityFactorGraph::new();
        satisfied.add(NonlinearFactor::inequality(
            vec![landmark],
            ComponentBoundFactor::upper(0, 3.0),
            NoiseModel::unit(1),
            Key::new('d', 0),
        )?)?;
        let mut violated = NonlinearInequalityFactorGraph::new();
        violated.add(NonlinearFactor::inequality(
            vec![landmark],
            ComponentBoundFactor::upper(0, 1.0),
            NoiseModel::unit(1),
            Key::new('d', 0),
        )?)?;

        let optimizer = LevenbergMarquardt::with_config(
            LevenbergMarquardtConfig::new().with_absolute_error_tolerance(1e-12),
        );
        let ok = optimizer.optimize_constrained(&graph, &satisfied, &initial, &VectorValues::new())?;
        assert_eq!(ok.constraints_satisfied, Some(true));
        let bad = optimizer.optimize_constrained(&graph, &violated, &initial, &VectorValues::new())?;
        assert_eq!(bad.constraints_satisfied, Some(false));
        Ok(())
    }

    #[test]
    fn test_covariances_of_prior_only_problem() -> TestResult {
        let landmark = Key::new('l', 0);
        let mut graph = NonlinearFactorGraph::new();
        graph.add(
            vec![landmark],
            PriorFactor::new(Vector3::new(1.0, 2.0, 3.0)),
            NoiseModel::isotropic(3, 0.5)?,
        )?;
        let mut initial = Values::new();
        initial.insert(landmark, Vector3::zeros())?;

        let config = LevenbergMarquardtConfig::new()
            .with_absolute_error_tolerance(1e-12)
            .with_compute_covariances(true);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
        let covariances = result.covariances.ok_or("no covariances")?;
        let block = covariances.get(&landmark).ok_or("missing block")?;
        // Σ = σ² I
        assert!((block[(0, 0)] - 0.25).abs() < 1e-9);
        assert!(block[(0, 1)].abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_summary_display() {
        let summary = LevenbergMarquardtSummary {
            initial_error: 10.0,
            final_error: 1e-9,
            iterations: 4,
            accepted_steps: 4,
            rejected_steps: 1,
            final_damping: 1e-6,
            max_gradient_norm: 3.0,
            final_gradient_norm: 1e-5,
            max_step_norm: 0.5,
            final_step_norm: 1e-6,
            total_time: Duration::from_millis(4),
            average_time_per_iteration: Duration::from_millis(1),
            iteration_history: Vec::new(),
            status: OptimizationStatus::Converged,
        };
        let text = summary.to_string();
        assert!(text.contains("CONVERGED (Converged)"));
        assert!(text.contains("Rejected steps:   1"));
    }
}
