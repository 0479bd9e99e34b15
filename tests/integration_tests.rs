//! Integration tests for apex-sfm
//!
//! End-to-end runs of the Levenberg-Marquardt optimizer on the problems the library builds:
//! synthetic bundle adjustment in all three camera parameterizations, Pose2 SLAM, and the
//! constrained-run feasibility check. Failure handling is covered as well: missing keys,
//! cheirality during step trials, and the abort signal.
//!
//! # Metrics Verified
//!
//! - Termination status and iteration count
//! - Final error against an absolute threshold
//! - Recovery of the ground truth where the problem is well determined
//! - Monotonic error history and consistency of the returned Values

use apex_sfm::camera::{Cal3Bundler, PinholeCamera};
use apex_sfm::core::{
    CoreError, Key, NoiseModel, NonlinearFactorGraph, NonlinearInequalityFactorGraph, Values,
    VectorValues,
};
use apex_sfm::error::ApexSfmError;
use apex_sfm::factors::{
    BetweenFactor, ComponentBoundFactor, MaxDistanceFactor, PriorFactor, ProjectionFactor,
};
use apex_sfm::manifold::{LieGroup, se2::SE2, se3::SE3};
use apex_sfm::optimizer::{
    LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus, OptimizerError,
};
use apex_sfm::problems::bundle_adjustment::{
    BundleAdjustmentOptions, build_fixed_calibration, build_general_sfm, build_snavely,
};
use apex_sfm::problems::{
    Pose2Constraint, Pose2Graph, SyntheticScene, SyntheticSceneConfig, camera_key, point_key,
    pose_key,
};
use apex_sfm::LinearSolverType;
use nalgebra::{Vector2, Vector3};
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::{Arc, atomic::AtomicBool};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn tight_config() -> LevenbergMarquardtConfig {
    LevenbergMarquardtConfig::new()
        .with_max_iterations(50)
        .with_absolute_error_tolerance(1e-12)
        .with_relative_error_tolerance(1e-15)
}

fn assert_monotonic(history: &[f64]) {
    for (i, pair) in history.windows(2).enumerate() {
        assert!(
            pair[1] < pair[0],
            "error increased at accepted step {}: {:.6e} -> {:.6e}",
            i + 1,
            pair[0],
            pair[1]
        );
    }
}

/// Square loop of four poses, each constraint "drive 2 m, turn left 90°".
fn square_loop() -> Pose2Graph {
    let sigmas = Vector3::new(0.1, 0.1, 0.05);
    let mut graph = Pose2Graph::new();
    graph.add_pose(0, SE2::from_xy_angle(0.0, 0.0, 0.0));
    graph.add_pose(1, SE2::from_xy_angle(2.3, 0.2, 1.4));
    graph.add_pose(2, SE2::from_xy_angle(1.8, 2.4, 3.3));
    graph.add_pose(3, SE2::from_xy_angle(-0.3, 1.7, -1.3));
    for (from, to) in [(0, 1), (1, 2), (2, 3), (3, 0)] {
        graph.add_constraint(Pose2Constraint::new(from, to, 2.0, 0.0, FRAC_PI_2, sigmas));
    }
    graph
}

/// Camera at the origin looking down +z at a point on its axis, with a tight prior pulling the
/// point 5 m behind the camera. The undamped step always crosses the image plane.
fn behind_camera_problem() -> Result<(NonlinearFactorGraph, Values), CoreError> {
    let (pose, point) = (camera_key(0), point_key(0));
    let calibration = Arc::new(Cal3Bundler::new(500.0, 0.0, 0.0, 320.0, 240.0));

    let mut graph = NonlinearFactorGraph::new();
    graph.add(
        vec![pose, point],
        ProjectionFactor::new(Vector2::new(320.0, 240.0), calibration),
        NoiseModel::unit(2),
    )?;
    graph.add(vec![pose], PriorFactor::new(SE3::identity()), NoiseModel::isotropic(6, 1e-3)?)?;
    graph.add(
        vec![point],
        PriorFactor::new(Vector3::new(0.0, 0.0, -5.0)),
        NoiseModel::isotropic(3, 1e-3)?,
    )?;

    let mut values = Values::new();
    values.insert(pose, SE3::identity())?;
    values.insert(point, Vector3::new(0.0, 0.0, 1.0))?;
    Ok((graph, values))
}

#[test]
fn test_synthetic_bundle_adjustment_recovers_ground_truth() -> TestResult {
    let scene = SyntheticScene::generate(&SyntheticSceneConfig::new())?;
    assert_eq!(scene.initial.number_cameras(), 3);
    assert_eq!(scene.initial.number_tracks(), 5);

    let options = BundleAdjustmentOptions::new();
    let (graph, initial) = build_fixed_calibration(&scene.initial, &options)?;
    let result = LevenbergMarquardt::with_config(tight_config()).optimize(&graph, &initial)?;

    assert!(
        result.converged(),
        "did not converge: {} after {} iterations, final error {:.3e}",
        result.status,
        result.iterations,
        result.final_error
    );
    assert!(result.final_error < 1e-8, "final error {:.3e}", result.final_error);
    assert!(result.iterations <= 50);
    assert_monotonic(&result.error_history);

    for (i, camera) in scene.ground_truth.cameras.iter().enumerate() {
        let estimate: &SE3 = result.values.at(camera_key(i))?;
        assert!(
            estimate.is_approx(camera.pose(), 1e-5),
            "camera {i} not recovered: {estimate}"
        );
    }
    assert!(scene.max_point_error(&result.values)? < 1e-5);
    Ok(())
}

#[test]
fn test_general_sfm_with_calibration_converges() -> TestResult {
    let config = SyntheticSceneConfig::new()
        .with_cameras(4)
        .with_points(20)
        .with_focal_perturbation(5.0)
        .with_seed(11);
    let scene = SyntheticScene::generate(&config)?;
    let (graph, initial) = build_general_sfm(&scene.initial, &BundleAdjustmentOptions::new())?;

    let result = LevenbergMarquardt::with_config(tight_config()).optimize(&graph, &initial)?;
    assert!(result.final_error < 1e-6, "final error {:.3e}", result.final_error);
    assert!(result.final_error < result.initial_error * 1e-6);
    assert_monotonic(&result.error_history);

    let recovered = scene.initial.with_values(&result.values)?;
    assert_eq!(recovered.number_measurements(), scene.initial.number_measurements());
    Ok(())
}

#[test]
fn test_snavely_bundle_adjustment_converges() -> TestResult {
    let config = SyntheticSceneConfig::new().with_cameras(4).with_points(20).with_seed(5);
    let scene = SyntheticScene::generate(&config)?;
    let (graph, initial) = build_snavely(&scene.initial, &BundleAdjustmentOptions::new())?;

    let result = LevenbergMarquardt::with_config(tight_config()).optimize(&graph, &initial)?;
    assert!(result.final_error < 1e-6, "final error {:.3e}", result.final_error);
    assert_monotonic(&result.error_history);
    Ok(())
}

#[test]
fn test_pose2_slam_square_loop() -> TestResult {
    let (graph, initial) = square_loop().build()?;
    assert_eq!(graph.len(), 5);

    for solver in [LinearSolverType::SparseCholesky, LinearSolverType::SparseQR] {
        let config = tight_config().with_linear_solver_type(solver);
        let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
        assert!(result.converged(), "{solver}: {}", result.status);
        assert!(result.final_error < 1e-10, "{solver}: {:.3e}", result.final_error);

        let expected = [
            SE2::from_xy_angle(0.0, 0.0, 0.0),
            SE2::from_xy_angle(2.0, 0.0, FRAC_PI_2),
            SE2::from_xy_angle(2.0, 2.0, PI),
            SE2::from_xy_angle(0.0, 2.0, -FRAC_PI_2),
        ];
        for (id, pose) in expected.iter().enumerate() {
            let estimate: &SE2 = result.values.at(pose_key(id))?;
            assert!(estimate.is_approx(pose, 1e-6), "{solver}: x{id} = {estimate}");
        }
    }
    Ok(())
}

#[test]
fn test_missing_key_is_fatal() -> TestResult {
    let (mut graph, initial) = square_loop().build()?;
    let absent = pose_key(9);
    graph.add(
        vec![pose_key(3), absent],
        BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.0)),
        NoiseModel::unit(3),
    )?;

    assert!(matches!(graph.linearize(&initial), Err(CoreError::MissingKey(k)) if k == absent));
    let result = LevenbergMarquardt::new().optimize(&graph, &initial);
    match result {
        Err(OptimizerError::Core(CoreError::MissingKey(k))) => assert_eq!(k, absent),
        other => panic!("expected MissingKey, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_returned_values_match_reported_error() -> TestResult {
    let scene = SyntheticScene::generate(&SyntheticSceneConfig::new().with_seed(9))?;
    let (graph, initial) = build_general_sfm(&scene.initial, &BundleAdjustmentOptions::new())?;

    // a huge initial damping forces tiny steps and a long accepted history
    let config = LevenbergMarquardtConfig::new()
        .with_damping(1e6)
        .with_max_iterations(8)
        .with_absolute_error_tolerance(0.0)
        .with_relative_error_tolerance(0.0);
    let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;

    assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
    assert_monotonic(&result.error_history);
    assert_eq!(result.error_history.len(), result.convergence_info.accepted_steps + 1);
    assert_eq!(graph.error(&result.values)?, result.final_error);
    assert_eq!(graph.error(&initial)?, result.initial_error);
    Ok(())
}

#[test]
fn test_cheirality_raises_damping_and_recovers() -> TestResult {
    let (graph, initial) = behind_camera_problem()?;
    let config = LevenbergMarquardtConfig::new()
        .with_max_iterations(2)
        .with_absolute_error_tolerance(0.0)
        .with_relative_error_tolerance(0.0);
    let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;

    assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
    assert!(result.convergence_info.rejected_steps > 0);
    assert!(result.final_error < result.initial_error);
    let point: &Vector3<f64> = result.values.at(point_key(0))?;
    assert!(point.z > 0.0, "point crossed the camera: {point}");
    Ok(())
}

#[test]
fn test_cheirality_without_retries_is_reported() -> TestResult {
    let (graph, initial) = behind_camera_problem()?;
    let config = LevenbergMarquardtConfig::new().with_max_retries(0);
    let error = LevenbergMarquardt::with_config(config)
        .optimize(&graph, &initial)
        .err()
        .ok_or("expected the run to fail")?;

    assert!(matches!(error, OptimizerError::RetriesExhausted { retries: 1, .. }));
    let chain = ApexSfmError::from(error).chain();
    assert!(chain.contains("Cheirality"), "{chain}");
    Ok(())
}

#[test]
fn test_cheirality_at_initial_values_is_not_retried() -> TestResult {
    let (graph, mut initial) = behind_camera_problem()?;
    initial.update(point_key(0), Vector3::new(0.0, 0.0, -1.0))?;

    match LevenbergMarquardt::new().optimize(&graph, &initial) {
        Err(OptimizerError::Core(CoreError::Factor { source, .. })) => {
            assert!(source.is_recoverable(), "{source}");
        }
        other => panic!("expected an immediate factor error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_abort_signal() -> TestResult {
    let (graph, initial) = square_loop().build()?;
    let signal = Arc::new(AtomicBool::new(true));
    let config = tight_config().with_abort_signal(Arc::clone(&signal));

    let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;
    assert_eq!(result.status, OptimizationStatus::UserTerminated);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.values, initial);
    Ok(())
}

#[test]
fn test_constrained_run_feasibility() -> TestResult {
    let (a, b) = (Key::new('l', 0), Key::new('l', 1));
    let mut graph = NonlinearFactorGraph::new();
    graph.add(vec![a], PriorFactor::new(Vector3::new(0.0, 0.0, 1.0)), NoiseModel::unit(3))?;
    graph.add(vec![b], PriorFactor::new(Vector3::new(1.0, 0.0, 1.0)), NoiseModel::unit(3))?;
    let mut initial = Values::new();
    initial.insert(a, Vector3::new(0.3, -0.2, 0.5))?;
    initial.insert(b, Vector3::new(1.5, 0.4, 0.8))?;

    let (dual_height, dual_distance) = (Key::new('d', 0), Key::new('d', 1));
    let mut constraints = NonlinearInequalityFactorGraph::new();
    constraints.add_inequality(
        vec![a],
        ComponentBoundFactor::lower(2, 0.0),
        NoiseModel::unit(1),
        dual_height,
    )?;
    constraints.add_inequality(
        vec![a, b],
        MaxDistanceFactor::new(2.0),
        NoiseModel::unit(1),
        dual_distance,
    )?;

    let optimizer = LevenbergMarquardt::with_config(tight_config());
    let result = optimizer.optimize_constrained(&graph, &constraints, &initial, &VectorValues::new())?;
    assert!(result.converged());
    assert_eq!(result.constraints_satisfied, Some(true));
    assert!(constraints.active_set(&result.values, 1e-6)?.is_empty());

    // a dual on a slack constraint breaks complementarity
    let mut duals = VectorValues::new();
    duals.insert(dual_distance, nalgebra::DVector::from_element(1, 0.5));
    let result = optimizer.optimize_constrained(&graph, &constraints, &initial, &duals)?;
    assert_eq!(result.constraints_satisfied, Some(false));

    // tightening the distance bound below the optimum makes the solution infeasible
    let mut tight = NonlinearInequalityFactorGraph::new();
    tight.add_inequality(vec![a, b], MaxDistanceFactor::new(0.5), NoiseModel::unit(1), dual_distance)?;
    let result = optimizer.optimize_constrained(&graph, &tight, &initial, &VectorValues::new())?;
    assert_eq!(result.constraints_satisfied, Some(false));
    Ok(())
}

#[test]
fn test_covariances_after_pose_graph() -> TestResult {
    let (graph, initial) = square_loop().build()?;
    let config = tight_config().with_compute_covariances(true);
    let result = LevenbergMarquardt::with_config(config).optimize(&graph, &initial)?;

    let covariances = result.covariances.ok_or("covariances not computed")?;
    assert_eq!(covariances.len(), 4);
    let anchor = covariances.get(&pose_key(0)).ok_or("missing x0")?;
    let far = covariances.get(&pose_key(2)).ok_or("missing x2")?;
    // uncertainty grows away from the anchored pose
    assert!(far[(0, 0)] > anchor[(0, 0)]);
    assert!((0..3).all(|i| anchor[(i, i)] > 0.0 && anchor[(i, i)] <= 1.0 + 1e-9));
    Ok(())
}

#[test]
fn test_pinhole_camera_values_round_trip() -> TestResult {
    let scene = SyntheticScene::generate(&SyntheticSceneConfig::new())?;
    let (_, values) = build_general_sfm(&scene.ground_truth, &BundleAdjustmentOptions::new())?;
    let camera: &PinholeCamera = values.at(camera_key(2))?;
    assert_eq!(camera, &scene.ground_truth.cameras[2]);
    assert_eq!(scene.max_camera_error(&values)?, 0.0);
    Ok(())
}
