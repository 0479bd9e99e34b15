//! Dual-number projection Jacobians.
//!
//! Projections are written once, generic over [`nalgebra::RealField`], and differentiated with
//! `num-dual`. Both paths differentiate a local 12-parameter block:
//!
//! - pinhole: `[δρ(3), δθ(3), f, k1, k2, X(3)]`, with the pose perturbed on the right around its
//!   current value
//! - Snavely/BAL: `[angle-axis(3), t(3), f, k1, k2, X(3)]`
//!
//! Cheirality is checked in `f64` before any dual evaluation, so a point behind the camera is
//! reported exactly like the analytic path reports it.

use crate::camera::{CalibratedCamera, CheiralityError, PinholeCamera, ProjectionJacobians};
use crate::manifold::{LieGroup, so3::SO3};
use nalgebra::{Matrix2x3, Matrix3, RealField, SMatrix, SVector, Vector2, Vector3, convert};
use num_dual::{DualSVec64, jacobian};

/// Size of the differentiated parameter block.
const LOCAL_PARAMS: usize = 12;

/// A Snavely camera: `[angle-axis(3), t(3), f, k1, k2]`.
pub type SnavelyCamera = SVector<f64, 9>;

fn lift<T: RealField>(x: f64) -> T {
    convert(x)
}

/// Bundler radial distortion and focal scaling, without principal point.
fn distort_generic<T: RealField>(x: T, y: T, f: T, k1: T, k2: T) -> (T, T) {
    let r = x.clone() * x.clone() + y.clone() * y.clone();
    let g = T::one() + r.clone() * (k1 + k2 * r);
    let scale = f * g;
    (scale.clone() * x, scale * y)
}

fn pinhole_projection_generic<T: RealField>(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    principal_point: &Vector2<f64>,
    p: &SVector<T, LOCAL_PARAMS>,
) -> SVector<T, 2> {
    let rho = Vector3::new(p[0].clone(), p[1].clone(), p[2].clone());
    let theta = Vector3::new(p[3].clone(), p[4].clone(), p[5].clone());
    let point = Vector3::new(p[9].clone(), p[10].clone(), p[11].clone());

    // first order in the perturbation is exact at δ = 0
    let r0: Matrix3<T> = rotation.map(lift::<T>);
    let r = &r0 * (Matrix3::identity() + theta.cross_matrix());
    let t = translation.map(lift::<T>) + &r0 * rho;

    let q = r.transpose() * (point - t);
    let u = q.x.clone() / q.z.clone();
    let v = q.y.clone() / q.z.clone();
    let (x, y) = distort_generic(u, v, p[6].clone(), p[7].clone(), p[8].clone());
    SVector::<T, 2>::new(
        x + lift::<T>(principal_point.x),
        y + lift::<T>(principal_point.y),
    )
}

/// Pinhole projection Jacobians computed with dual numbers.
pub fn project_with_autodiff(
    camera: &PinholeCamera,
    point: &Vector3<f64>,
) -> Result<ProjectionJacobians, CheiralityError> {
    let q = camera.pose().transform_to(point);
    CalibratedCamera::project_to_camera(&q)?;

    let rotation = camera.pose().rotation_matrix();
    let translation = camera.pose().translation();
    let calibration = camera.calibration();
    let principal_point = calibration.principal_point();

    let mut p0 = SVector::<f64, LOCAL_PARAMS>::zeros();
    p0.fixed_rows_mut::<3>(6).copy_from(&calibration.vector());
    p0.fixed_rows_mut::<3>(9).copy_from(point);

    let (pixel, j) = jacobian(
        |p: SVector<DualSVec64<LOCAL_PARAMS>, LOCAL_PARAMS>| {
            pinhole_projection_generic(&rotation, &translation, &principal_point, &p)
        },
        p0,
    );

    Ok(ProjectionJacobians {
        pixel,
        dpose: j.fixed_view::<2, 6>(0, 0).into_owned(),
        dcal: j.fixed_view::<2, 3>(0, 6).into_owned(),
        dpoint: j.fixed_view::<2, 3>(0, 9).into_owned(),
    })
}

/// Rotate `point` by the angle-axis vector `w` (Rodrigues, first order near zero).
fn angle_axis_rotate_point<T: RealField>(w: &Vector3<T>, point: &Vector3<T>) -> Vector3<T> {
    let theta2 = w.norm_squared();
    if theta2 > lift::<T>(f64::EPSILON) {
        let theta = theta2.sqrt();
        let (sin, cos) = theta.clone().sin_cos();
        let axis = w / theta;
        let along = axis.dot(point) * (T::one() - cos.clone());
        point * cos + axis.cross(point) * sin + axis * along
    } else {
        point + w.cross(point)
    }
}

fn snavely_projection_generic<T: RealField>(p: &SVector<T, LOCAL_PARAMS>) -> SVector<T, 2> {
    let w = Vector3::new(p[0].clone(), p[1].clone(), p[2].clone());
    let t = Vector3::new(p[3].clone(), p[4].clone(), p[5].clone());
    let point = Vector3::new(p[9].clone(), p[10].clone(), p[11].clone());

    let pc = angle_axis_rotate_point(&w, &point) + t;
    let xp = -pc.x.clone() / pc.z.clone();
    let yp = -pc.y.clone() / pc.z.clone();
    let (x, y) = distort_generic(xp, yp, p[6].clone(), p[7].clone(), p[8].clone());
    SVector::<T, 2>::new(x, y)
}

fn snavely_params(camera: &SnavelyCamera, point: &Vector3<f64>) -> SVector<f64, LOCAL_PARAMS> {
    let mut p = SVector::<f64, LOCAL_PARAMS>::zeros();
    p.fixed_rows_mut::<9>(0).copy_from(camera);
    p.fixed_rows_mut::<3>(9).copy_from(point);
    p
}

fn snavely_check_depth(camera: &SnavelyCamera, point: &Vector3<f64>) -> Result<(), CheiralityError> {
    let w = camera.fixed_rows::<3>(0).into_owned();
    let t = camera.fixed_rows::<3>(3).into_owned();
    let depth = -(angle_axis_rotate_point(&w, point) + t).z;
    if depth <= 0.0 {
        return Err(CheiralityError { depth });
    }
    Ok(())
}

/// Project a world point with a Snavely camera. The image origin is the principal point and the
/// image y axis points up.
pub fn snavely_project(
    camera: &SnavelyCamera,
    point: &Vector3<f64>,
) -> Result<Vector2<f64>, CheiralityError> {
    snavely_check_depth(camera, point)?;
    Ok(snavely_projection_generic(&snavely_params(camera, point)))
}

/// Snavely projection with Jacobians w.r.t. the camera (2×9) and the point (2×3).
pub fn snavely_project_with_jacobians(
    camera: &SnavelyCamera,
    point: &Vector3<f64>,
) -> Result<(Vector2<f64>, SMatrix<f64, 2, 9>, Matrix2x3<f64>), CheiralityError> {
    snavely_check_depth(camera, point)?;
    let (pixel, j) = jacobian(
        |p: SVector<DualSVec64<LOCAL_PARAMS>, LOCAL_PARAMS>| snavely_projection_generic(&p),
        snavely_params(camera, point),
    );
    Ok((
        pixel,
        j.fixed_view::<2, 9>(0, 0).into_owned(),
        j.fixed_view::<2, 3>(0, 9).into_owned(),
    ))
}

/// Convert a camera-to-world pinhole camera (looking down +z) into Snavely form
/// (world-to-camera, looking down −z).
pub fn snavely_camera_from_pinhole(camera: &PinholeCamera) -> SnavelyCamera {
    let flip = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
    let r_gl = flip * camera.pose().rotation_matrix().transpose();
    let t_gl = -(r_gl * camera.pose().translation());
    // goes through a quaternion so half-turns (any axis-aligned camera) keep their axis
    let angle_axis = SO3::from_rotation_matrix(&r_gl).log().axis_angle();
    let calibration = camera.calibration().vector();

    let mut snavely = SnavelyCamera::zeros();
    snavely.fixed_rows_mut::<3>(0).copy_from(&angle_axis);
    snavely.fixed_rows_mut::<3>(3).copy_from(&t_gl);
    snavely.fixed_rows_mut::<3>(6).copy_from(&calibration);
    snavely
}

/// Convert a pixel measurement into the Snavely image frame.
pub fn snavely_measurement(pixel: &Vector2<f64>, principal_point: &Vector2<f64>) -> Vector2<f64> {
    Vector2::new(pixel.x - principal_point.x, -(pixel.y - principal_point.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Cal3Bundler;
    use crate::manifold::se3::SE3;
    use nalgebra::Rotation3;
    use std::f64::consts::PI;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            SE3::from_translation_euler(0.5, 0.2, -4.0, -0.2, 0.1, 0.4),
            Cal3Bundler::new(480.0, 3e-2, -1e-3, 320.0, 240.0),
        )
    }

    fn assert_close<const R: usize, const C: usize>(
        a: &SMatrix<f64, R, C>,
        b: &SMatrix<f64, R, C>,
        tolerance: f64,
    ) {
        assert!((a - b).norm() < tolerance, "{a} vs {b}");
    }

    #[test]
    fn test_autodiff_matches_analytic_jacobians() -> TestResult {
        let cam = camera();
        let points = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.7, -0.4, 0.3),
            Vector3::new(-1.2, 0.9, -0.6),
        ];
        for point in &points {
            let analytic = cam.project_with_jacobians(point)?;
            let dual = project_with_autodiff(&cam, point)?;
            assert_close(&analytic.pixel, &dual.pixel, 1e-9);
            assert_close(&analytic.dpose, &dual.dpose, 1e-8);
            assert_close(&analytic.dcal, &dual.dcal, 1e-8);
            assert_close(&analytic.dpoint, &dual.dpoint, 1e-8);
        }
        Ok(())
    }

    #[test]
    fn test_autodiff_reports_cheirality() {
        let cam = camera();
        let behind = Vector3::new(0.5, 0.2, -10.0);
        assert!(project_with_autodiff(&cam, &behind).is_err());
        let snavely = snavely_camera_from_pinhole(&cam);
        assert!(snavely_project(&snavely, &behind).is_err());
        assert!(snavely_project_with_jacobians(&snavely, &behind).is_err());
    }

    #[test]
    fn test_snavely_agrees_with_pinhole() -> TestResult {
        let cam = camera();
        let snavely = snavely_camera_from_pinhole(&cam);
        let point = Vector3::new(0.3, 0.6, -0.2);
        let expected = snavely_measurement(&cam.project(&point)?, &cam.calibration().principal_point());
        let projected = snavely_project(&snavely, &point)?;
        assert!((projected - expected).norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_snavely_conversion_of_half_turn_cameras() -> TestResult {
        let calibration = Cal3Bundler::new(500.0, 1e-2, 0.0, 320.0, 240.0);
        let poses = [
            ("identity", SE3::from_translation_euler(0.0, 0.0, -5.0, 0.0, 0.0, 0.0)),
            ("pi about y", SE3::from_translation_euler(0.0, 0.0, 5.0, 0.0, PI, 0.0)),
            ("pi about z", SE3::from_translation_euler(0.0, 0.0, -5.0, 0.0, 0.0, PI)),
        ];
        let point = Vector3::new(0.1, 0.2, 0.0);
        for (name, pose) in poses {
            let cam = PinholeCamera::new(pose, calibration.clone());
            let snavely = snavely_camera_from_pinhole(&cam);
            let angle = snavely.fixed_rows::<3>(0).norm();
            assert!((angle - PI).abs() < 1e-9, "{name}: rotation angle {angle}");

            let expected =
                snavely_measurement(&cam.project(&point)?, &calibration.principal_point());
            let projected = snavely_project(&snavely, &point)?;
            assert!((projected - expected).norm() < 1e-9, "{name}: {projected} vs {expected}");
        }
        Ok(())
    }

    #[test]
    fn test_snavely_identity_camera_keeps_image_y_up() -> TestResult {
        let cam = PinholeCamera::new(
            SE3::from_translation_euler(0.0, 0.0, -5.0, 0.0, 0.0, 0.0),
            Cal3Bundler::new(500.0, 0.0, 0.0, 0.0, 0.0),
        );
        let snavely = snavely_camera_from_pinhole(&cam);
        let projected = snavely_project(&snavely, &Vector3::new(0.1, 0.2, 0.0))?;
        assert!((projected - Vector2::new(10.0, -20.0)).norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_snavely_jacobians_numerical() -> TestResult {
        let snavely = snavely_camera_from_pinhole(&camera());
        let point = Vector3::new(-0.4, 0.1, 0.5);
        let (pixel, d_camera, d_point) = snavely_project_with_jacobians(&snavely, &point)?;
        assert!((pixel - snavely_project(&snavely, &point)?).norm() < 1e-12);

        let h = 1e-6;
        for i in 0..9 {
            let mut plus = snavely;
            let mut minus = snavely;
            plus[i] += h;
            minus[i] -= h;
            let numerical =
                (snavely_project(&plus, &point)? - snavely_project(&minus, &point)?) / (2.0 * h);
            assert!((numerical - d_camera.column(i)).norm() < 1e-4, "camera column {i}");
        }
        for i in 0..3 {
            let mut plus = point;
            let mut minus = point;
            plus[i] += h;
            minus[i] -= h;
            let numerical =
                (snavely_project(&snavely, &plus)? - snavely_project(&snavely, &minus)?) / (2.0 * h);
            assert!((numerical - d_point.column(i)).norm() < 1e-4, "point column {i}");
        }
        Ok(())
    }

    #[test]
    fn test_small_rotation_branch_is_continuous() {
        let w_small = Vector3::new(1e-9, -2e-9, 5e-10);
        let point = Vector3::new(1.0, 2.0, 3.0);
        let first_order = angle_axis_rotate_point(&w_small, &point);
        let exact = Rotation3::from_scaled_axis(w_small) * point;
        assert!((first_order - exact).norm() < 1e-15);
    }
}
