//! Bundle adjustment problems from an in-memory structure-from-motion dataset.
//!
//! Two parameterizations of the same measurements are supported:
//!
//! - **General SFM**: each camera is a [`PinholeCamera`] variable (pose + `f, k1, k2`, 9 DOF)
//!   observed through [`GeneralSfmFactor`]s with analytic Jacobians.
//! - **Fixed calibration**: each camera is an SE(3) pose; every camera's `Cal3Bundler` is shared
//!   by its [`ProjectionFactor`]s and not optimized.
//! - **Snavely**: each camera is a 9-vector `[angle-axis, t, f, k1, k2]` in the world-to-camera,
//!   −z-looking convention of Bundle Adjustment in the Large, observed through
//!   [`SnavelyProjectionFactor`]s with dual-number Jacobians.
//!
//! SFM is only determined up to a similarity transform. [`BundleAdjustmentOptions`] fixes that
//! gauge with priors on the first camera and the first point.

use super::{ProblemError, ProblemResult, camera_key, point_key};
use crate::camera::PinholeCamera;
use crate::camera::autodiff::{snavely_camera_from_pinhole, snavely_measurement};
use crate::core::{CoreResult, NoiseModel, NonlinearFactorGraph, Values};
use crate::factors::{GeneralSfmFactor, PriorFactor, ProjectionFactor, SnavelyProjectionFactor};
use crate::manifold::se3::SE3;
use nalgebra::{DVector, Vector2, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
    sync::Arc,
};
use tracing::debug;

/// A 3D point and the pixels it was observed at.
#[derive(Debug, Clone, PartialEq)]
pub struct SfmTrack {
    pub point: Vector3<f64>,
    /// `(camera index, pixel)` pairs
    pub measurements: Vec<(usize, Vector2<f64>)>,
}

impl SfmTrack {
    pub fn new(point: Vector3<f64>) -> Self {
        SfmTrack {
            point,
            measurements: Vec::new(),
        }
    }

    pub fn add_measurement(&mut self, camera: usize, pixel: Vector2<f64>) {
        self.measurements.push((camera, pixel));
    }

    pub fn number_measurements(&self) -> usize {
        self.measurements.len()
    }
}

/// Cameras plus tracks: the input of a bundle adjustment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SfmData {
    pub cameras: Vec<PinholeCamera>,
    pub tracks: Vec<SfmTrack>,
}

impl Display for SfmData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SfmData [ cameras: {}, tracks: {}, measurements: {} ]",
            self.number_cameras(),
            self.number_tracks(),
            self.number_measurements()
        )
    }
}

impl SfmData {
    pub fn new(cameras: Vec<PinholeCamera>, tracks: Vec<SfmTrack>) -> Self {
        SfmData { cameras, tracks }
    }

    pub fn number_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn number_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn number_measurements(&self) -> usize {
        self.tracks.iter().map(SfmTrack::number_measurements).sum()
    }

    /// Every measurement must refer to an existing camera.
    pub fn validate(&self) -> ProblemResult<()> {
        if self.cameras.is_empty() || self.tracks.is_empty() {
            return Err(ProblemError::Empty(format!(
                "{} cameras and {} tracks",
                self.cameras.len(),
                self.tracks.len()
            ))
            .log());
        }
        for (track_index, track) in self.tracks.iter().enumerate() {
            if let Some(&(camera, _)) = track
                .measurements
                .iter()
                .find(|(camera, _)| *camera >= self.cameras.len())
            {
                return Err(ProblemError::InvalidCameraIndex {
                    track: track_index,
                    camera,
                    cameras: self.cameras.len(),
                }
                .log());
            }
        }
        Ok(())
    }

    /// Copy of the dataset with cameras and points read back from general-SFM Values.
    pub fn with_values(&self, values: &Values) -> CoreResult<SfmData> {
        let cameras = (0..self.cameras.len())
            .map(|i| values.at::<PinholeCamera>(camera_key(i)).cloned())
            .collect::<CoreResult<Vec<_>>>()?;
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(j, track)| {
                Ok(SfmTrack {
                    point: *values.at::<Vector3<f64>>(point_key(j))?,
                    measurements: track.measurements.clone(),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(SfmData { cameras, tracks })
    }
}

/// Noise and gauge settings shared by both bundle adjustment builders.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleAdjustmentOptions {
    /// Isotropic standard deviation of a pixel measurement
    pub pixel_sigma: f64,
    /// Standard deviation of the prior on the first camera, `None` to leave it free
    pub camera_prior_sigma: Option<f64>,
    /// Standard deviation of the prior on the first point, `None` to leave it free
    pub point_prior_sigma: Option<f64>,
}

impl Default for BundleAdjustmentOptions {
    fn default() -> Self {
        Self {
            pixel_sigma: 1.0,
            camera_prior_sigma: Some(0.1),
            point_prior_sigma: Some(0.1),
        }
    }
}

impl BundleAdjustmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pixel_sigma(mut self, sigma: f64) -> Self {
        self.pixel_sigma = sigma;
        self
    }

    pub fn with_camera_prior_sigma(mut self, sigma: Option<f64>) -> Self {
        self.camera_prior_sigma = sigma;
        self
    }

    pub fn with_point_prior_sigma(mut self, sigma: Option<f64>) -> Self {
        self.point_prior_sigma = sigma;
        self
    }

    /// No gauge priors at all.
    pub fn without_gauge_priors(self) -> Self {
        self.with_camera_prior_sigma(None).with_point_prior_sigma(None)
    }
}

/// General SFM problem: `c{i}` holds `PinholeCamera`s and `p{j}` `Point3`s.
///
/// Factors are added in track order, then measurement order, followed by the gauge priors.
pub fn build_general_sfm(
    data: &SfmData,
    options: &BundleAdjustmentOptions,
) -> ProblemResult<(NonlinearFactorGraph, Values)> {
    data.validate()?;
    let pixel_noise = NoiseModel::isotropic(2, options.pixel_sigma)?;

    let mut graph = NonlinearFactorGraph::new();
    for (j, track) in data.tracks.iter().enumerate() {
        for (i, pixel) in &track.measurements {
            graph.add(
                vec![camera_key(*i), point_key(j)],
                GeneralSfmFactor::new(*pixel),
                pixel_noise.clone(),
            )?;
        }
    }

    if let Some(sigma) = options.camera_prior_sigma {
        graph.add(
            vec![camera_key(0)],
            PriorFactor::new(data.cameras[0].clone()),
            NoiseModel::isotropic(PinholeCamera::DOF, sigma)?,
        )?;
    }
    if let Some(sigma) = options.point_prior_sigma {
        graph.add(
            vec![point_key(0)],
            PriorFactor::new(data.tracks[0].point),
            NoiseModel::isotropic(3, sigma)?,
        )?;
    }

    let mut values = Values::new();
    for (i, camera) in data.cameras.iter().enumerate() {
        values.insert(camera_key(i), camera.clone())?;
    }
    for (j, track) in data.tracks.iter().enumerate() {
        values.insert(point_key(j), track.point)?;
    }

    debug!(
        "General SFM problem: {} factors, {} variables from {}",
        graph.len(),
        values.len(),
        data
    );
    Ok((graph, values))
}

/// Fixed-calibration problem: `c{i}` holds camera poses (`Pose3`) and `p{j}` `Point3`s.
///
/// The camera prior only covers the 6 pose DOF.
pub fn build_fixed_calibration(
    data: &SfmData,
    options: &BundleAdjustmentOptions,
) -> ProblemResult<(NonlinearFactorGraph, Values)> {
    data.validate()?;
    let pixel_noise = NoiseModel::isotropic(2, options.pixel_sigma)?;
    let calibrations: Vec<Arc<_>> = data
        .cameras
        .iter()
        .map(|camera| Arc::new(camera.calibration().clone()))
        .collect();

    let mut graph = NonlinearFactorGraph::new();
    for (j, track) in data.tracks.iter().enumerate() {
        for (i, pixel) in &track.measurements {
            graph.add(
                vec![camera_key(*i), point_key(j)],
                ProjectionFactor::new(*pixel, Arc::clone(&calibrations[*i])),
                pixel_noise.clone(),
            )?;
        }
    }

    if let Some(sigma) = options.camera_prior_sigma {
        graph.add(
            vec![camera_key(0)],
            PriorFactor::new(data.cameras[0].pose().clone()),
            NoiseModel::isotropic(6, sigma)?,
        )?;
    }
    if let Some(sigma) = options.point_prior_sigma {
        graph.add(
            vec![point_key(0)],
            PriorFactor::new(data.tracks[0].point),
            NoiseModel::isotropic(3, sigma)?,
        )?;
    }

    let mut values = Values::new();
    for (i, camera) in data.cameras.iter().enumerate() {
        values.insert::<SE3>(camera_key(i), camera.pose().clone())?;
    }
    for (j, track) in data.tracks.iter().enumerate() {
        values.insert(point_key(j), track.point)?;
    }

    debug!(
        "Fixed-calibration problem: {} factors, {} variables from {}",
        graph.len(),
        values.len(),
        data
    );
    Ok((graph, values))
}

/// Snavely camera vector of a pinhole camera, as stored in the Values.
pub fn snavely_camera_vector(camera: &PinholeCamera) -> DVector<f64> {
    DVector::from_column_slice(snavely_camera_from_pinhole(camera).as_slice())
}

/// Snavely problem: `c{i}` holds 9-vectors and `p{j}` `Point3`s.
///
/// Measurements are moved into each camera's Snavely image frame (principal point at the
/// origin, y axis up).
pub fn build_snavely(
    data: &SfmData,
    options: &BundleAdjustmentOptions,
) -> ProblemResult<(NonlinearFactorGraph, Values)> {
    data.validate()?;
    let pixel_noise = NoiseModel::isotropic(2, options.pixel_sigma)?;

    let mut graph = NonlinearFactorGraph::new();
    for (j, track) in data.tracks.iter().enumerate() {
        for (i, pixel) in &track.measurements {
            let principal_point = data.cameras[*i].calibration().principal_point();
            graph.add(
                vec![camera_key(*i), point_key(j)],
                SnavelyProjectionFactor::new(snavely_measurement(pixel, &principal_point)),
                pixel_noise.clone(),
            )?;
        }
    }

    let cameras: Vec<DVector<f64>> = data.cameras.iter().map(snavely_camera_vector).collect();
    if let Some(sigma) = options.camera_prior_sigma {
        graph.add(
            vec![camera_key(0)],
            PriorFactor::new(cameras[0].clone()),
            NoiseModel::isotropic(9, sigma)?,
        )?;
    }
    if let Some(sigma) = options.point_prior_sigma {
        graph.add(
            vec![point_key(0)],
            PriorFactor::new(data.tracks[0].point),
            NoiseModel::isotropic(3, sigma)?,
        )?;
    }

    let mut values = Values::new();
    for (i, camera) in cameras.into_iter().enumerate() {
        values.insert(camera_key(i), camera)?;
    }
    for (j, track) in data.tracks.iter().enumerate() {
        values.insert(point_key(j), track.point)?;
    }

    debug!(
        "Snavely problem: {} factors, {} variables from {}",
        graph.len(),
        values.len(),
        data
    );
    Ok((graph, values))
}
