//! Random structure-from-motion scenes with known ground truth.
//!
//! Cameras sit on a horizontal ring looking at the origin; points are drawn uniformly from a
//! cube around it. Every camera observes every point in front of it. The initial estimate is the
//! ground truth perturbed on the manifold, except for the first camera and the first point, which
//! stay exact so the gauge priors of
//! [`build_general_sfm`](super::bundle_adjustment::build_general_sfm) agree with the truth.
//!
//! ```
//! use apex_sfm::problems::{SyntheticScene, SyntheticSceneConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyntheticSceneConfig::new().with_cameras(4).with_points(20).with_seed(7);
//! let scene = SyntheticScene::generate(&config)?;
//! assert_eq!(scene.initial.number_measurements(), 80);
//! # Ok(())
//! # }
//! ```

use super::bundle_adjustment::{SfmData, SfmTrack};
use super::{ProblemError, ProblemResult, camera_key, point_key};
use crate::camera::{Cal3Bundler, CalibratedCamera, PinholeCamera};
use crate::core::{CoreError, CoreResult, Values};
use crate::manifold::Manifold;
use nalgebra::{DVector, Vector2, Vector3};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::f64::consts::TAU;
use tracing::debug;

/// Parameters of a synthetic scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSceneConfig {
    pub num_cameras: usize,
    pub num_points: usize,
    /// Distance of the cameras from the vertical axis
    pub ring_radius: f64,
    /// Height of the camera ring above the xy plane
    pub ring_height: f64,
    /// Points are drawn from `[-extent, extent]³`
    pub point_extent: f64,
    pub calibration: Cal3Bundler,
    /// Amplitude of the uniform pixel noise, 0 for exact measurements
    pub pixel_noise: f64,
    /// Amplitude of the uniform rotation perturbation (radians, per tangent component)
    pub rotation_perturbation: f64,
    pub translation_perturbation: f64,
    pub point_perturbation: f64,
    /// Amplitude of the perturbation of `f`; the distortion is left exact
    pub focal_perturbation: f64,
    pub seed: u64,
}

impl Default for SyntheticSceneConfig {
    fn default() -> Self {
        Self {
            num_cameras: 3,
            num_points: 5,
            ring_radius: 8.0,
            ring_height: 1.0,
            point_extent: 1.0,
            calibration: Cal3Bundler::new(500.0, 0.0, 0.0, 320.0, 240.0),
            pixel_noise: 0.0,
            rotation_perturbation: 0.05,
            translation_perturbation: 0.1,
            point_perturbation: 0.1,
            focal_perturbation: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticSceneConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cameras(mut self, num_cameras: usize) -> Self {
        self.num_cameras = num_cameras;
        self
    }

    pub fn with_points(mut self, num_points: usize) -> Self {
        self.num_points = num_points;
        self
    }

    pub fn with_ring(mut self, radius: f64, height: f64) -> Self {
        self.ring_radius = radius;
        self.ring_height = height;
        self
    }

    pub fn with_point_extent(mut self, extent: f64) -> Self {
        self.point_extent = extent;
        self
    }

    pub fn with_calibration(mut self, calibration: Cal3Bundler) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_pixel_noise(mut self, amplitude: f64) -> Self {
        self.pixel_noise = amplitude;
        self
    }

    pub fn with_pose_perturbation(mut self, rotation: f64, translation: f64) -> Self {
        self.rotation_perturbation = rotation;
        self.translation_perturbation = translation;
        self
    }

    pub fn with_point_perturbation(mut self, amplitude: f64) -> Self {
        self.point_perturbation = amplitude;
        self
    }

    pub fn with_focal_perturbation(mut self, amplitude: f64) -> Self {
        self.focal_perturbation = amplitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> ProblemResult<()> {
        if self.num_cameras == 0 || self.num_points == 0 {
            return Err(ProblemError::InvalidParameters(format!(
                "scene needs cameras and points, got {} and {}",
                self.num_cameras, self.num_points
            ))
            .log());
        }
        if !(self.point_extent >= 0.0 && self.ring_radius > self.point_extent * 3.0_f64.sqrt()) {
            return Err(ProblemError::InvalidParameters(format!(
                "ring radius {} does not clear the point cube of extent {}",
                self.ring_radius, self.point_extent
            ))
            .log());
        }
        let amplitudes = [
            self.pixel_noise,
            self.rotation_perturbation,
            self.translation_perturbation,
            self.point_perturbation,
            self.focal_perturbation,
        ];
        if amplitudes.iter().any(|a| !(a.is_finite() && *a >= 0.0)) {
            return Err(ProblemError::InvalidParameters(
                "noise and perturbation amplitudes must be finite and non-negative".to_string(),
            )
            .log());
        }
        Ok(())
    }
}

/// A generated scene: exact data and the perturbed starting point built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    /// True cameras and points, with the measurements actually handed to the solver
    pub ground_truth: SfmData,
    /// Perturbed cameras and points with the same measurements
    pub initial: SfmData,
}

fn uniform(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.random_range(-amplitude..amplitude)
    } else {
        0.0
    }
}

impl SyntheticScene {
    pub fn generate(config: &SyntheticSceneConfig) -> ProblemResult<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let up = Vector3::z();
        let cameras = (0..config.num_cameras)
            .map(|i| -> ProblemResult<PinholeCamera> {
                let angle = TAU * i as f64 / config.num_cameras as f64;
                let eye = Vector3::new(
                    config.ring_radius * angle.cos(),
                    config.ring_radius * angle.sin(),
                    config.ring_height,
                );
                let pose = CalibratedCamera::lookat_pose(&eye, &Vector3::zeros(), &up)?;
                Ok(PinholeCamera::new(pose, config.calibration.clone()))
            })
            .collect::<ProblemResult<Vec<_>>>()?;

        let e = config.point_extent;
        let mut tracks = Vec::with_capacity(config.num_points);
        for _ in 0..config.num_points {
            let point = Vector3::new(uniform(&mut rng, e), uniform(&mut rng, e), uniform(&mut rng, e));
            let mut track = SfmTrack::new(point);
            for (i, camera) in cameras.iter().enumerate() {
                // a point outside a camera's view is simply not observed by it
                if let Ok(pixel) = camera.project(&point) {
                    let noise = Vector2::new(
                        uniform(&mut rng, config.pixel_noise),
                        uniform(&mut rng, config.pixel_noise),
                    );
                    track.add_measurement(i, pixel + noise);
                }
            }
            tracks.push(track);
        }
        let ground_truth = SfmData::new(cameras, tracks);

        let initial_cameras = ground_truth
            .cameras
            .iter()
            .enumerate()
            .map(|(i, camera)| -> ProblemResult<PinholeCamera> {
                if i == 0 {
                    return Ok(camera.clone());
                }
                let mut delta = DVector::zeros(PinholeCamera::DOF);
                for k in 0..3 {
                    delta[k] = uniform(&mut rng, config.translation_perturbation);
                    delta[3 + k] = uniform(&mut rng, config.rotation_perturbation);
                }
                delta[6] = uniform(&mut rng, config.focal_perturbation);
                camera.retract(&delta).map_err(|e| ProblemError::Core(CoreError::from(e)))
            })
            .collect::<ProblemResult<Vec<_>>>()?;

        let initial_tracks = ground_truth
            .tracks
            .iter()
            .enumerate()
            .map(|(j, track)| {
                let mut perturbed = track.clone();
                if j > 0 {
                    perturbed.point += Vector3::new(
                        uniform(&mut rng, config.point_perturbation),
                        uniform(&mut rng, config.point_perturbation),
                        uniform(&mut rng, config.point_perturbation),
                    );
                }
                perturbed
            })
            .collect();

        let scene = SyntheticScene {
            initial: SfmData::new(initial_cameras, initial_tracks),
            ground_truth,
        };
        debug!(
            "Synthetic scene (seed {}): {}",
            config.seed, scene.ground_truth
        );
        Ok(scene)
    }

    /// Largest distance between an estimated point in general-SFM `values` and the truth.
    pub fn max_point_error(&self, values: &Values) -> CoreResult<f64> {
        self.ground_truth
            .tracks
            .iter()
            .enumerate()
            .try_fold(0.0_f64, |worst, (j, track)| -> CoreResult<f64> {
                let estimate = values.at::<Vector3<f64>>(point_key(j))?;
                Ok(worst.max((estimate - track.point).norm()))
            })
    }

    /// Largest tangent-space distance between an estimated camera and the truth.
    pub fn max_camera_error(&self, values: &Values) -> CoreResult<f64> {
        self.ground_truth
            .cameras
            .iter()
            .enumerate()
            .try_fold(0.0_f64, |worst, (i, camera)| -> CoreResult<f64> {
                let estimate = values.at::<PinholeCamera>(camera_key(i))?;
                let d = camera.local_coordinates(estimate)?;
                Ok(worst.max(d.norm()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::bundle_adjustment::{BundleAdjustmentOptions, build_general_sfm};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_scene_is_reproducible() -> TestResult {
        let config = SyntheticSceneConfig::new().with_seed(3);
        let a = SyntheticScene::generate(&config)?;
        let b = SyntheticScene::generate(&config)?;
        assert_eq!(a, b);
        let c = SyntheticScene::generate(&config.with_seed(4))?;
        assert_ne!(a.ground_truth.tracks, c.ground_truth.tracks);
        Ok(())
    }

    #[test]
    fn test_every_camera_sees_every_point() -> TestResult {
        let scene = SyntheticScene::generate(&SyntheticSceneConfig::new())?;
        assert_eq!(scene.ground_truth.number_measurements(), 3 * 5);
        assert_eq!(scene.initial.tracks[0].point, scene.ground_truth.tracks[0].point);
        assert_eq!(scene.initial.cameras[0], scene.ground_truth.cameras[0]);
        assert_ne!(scene.initial.cameras[1], scene.ground_truth.cameras[1]);
        Ok(())
    }

    #[test]
    fn test_ground_truth_has_zero_error() -> TestResult {
        let scene = SyntheticScene::generate(&SyntheticSceneConfig::new().with_points(12))?;
        let options = BundleAdjustmentOptions::new();
        let (graph, truth) = build_general_sfm(&scene.ground_truth, &options)?;
        assert!(graph.error(&truth)? < 1e-16);
        assert_eq!(scene.max_point_error(&truth)?, 0.0);
        assert!(scene.max_camera_error(&truth)? < 1e-12);

        let (_, initial) = build_general_sfm(&scene.initial, &options)?;
        assert!(graph.error(&initial)? > 1.0);
        assert!(scene.max_point_error(&initial)? > 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let too_close = SyntheticSceneConfig::new().with_ring(1.0, 0.0).with_point_extent(1.0);
        assert!(matches!(
            SyntheticScene::generate(&too_close),
            Err(ProblemError::InvalidParameters(_))
        ));
        let negative = SyntheticSceneConfig::new().with_pixel_noise(-1.0);
        assert!(SyntheticScene::generate(&negative).is_err());
        assert!(SyntheticScene::generate(&SyntheticSceneConfig::new().with_points(0)).is_err());
    }
}
