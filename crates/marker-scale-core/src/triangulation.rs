//! Multi-view triangulation of landmark corners.
//!
//! A point is solved algebraically from bearing rays and world-to-camera
//! poses, then accepted only if it lies in front of every contributing
//! camera. [`TriangulationEstimator`] plugs this into [`crate::ransac`] so
//! that false marker matches in a few views do not corrupt the point.

use std::fmt;
use std::marker::PhantomData;

use log::{debug, warn};
use nalgebra::{Matrix4, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::ransac::{self, EvalResult, Estimator, RansacOptions};
use crate::{Camera, LandmarkKey, LandmarkStore, Pose3, ViewId, MIN_TRIANGULATION_OBSERVATIONS};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Per-observation reprojection residual below which an observation counts
/// as an inlier. Expressed in the unit of [`Camera::residual`] (pixels).
pub const DEFAULT_INLIER_THRESHOLD: f64 = 0.1;

/// Camera and pose lookup for the views a landmark was observed in.
pub trait ViewGeometry {
    fn camera(&self, view: ViewId) -> Option<&dyn Camera>;
    fn pose(&self, view: ViewId) -> Option<Pose3>;
}

/// One pixel observation lifted to a bearing ray, with the view geometry
/// needed to score a candidate point.
#[derive(Clone, Copy)]
pub struct RayObservation<'a> {
    pub pixel: Point2<f64>,
    /// Unit bearing in the camera frame.
    pub ray: Vector3<f64>,
    pub camera: &'a dyn Camera,
    pub pose: Pose3,
}

impl fmt::Debug for RayObservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayObservation")
            .field("pixel", &self.pixel)
            .field("ray", &self.ray)
            .field("pose", &self.pose)
            .finish_non_exhaustive()
    }
}

impl<'a> RayObservation<'a> {
    /// Back-project `pixel`; `None` if the camera cannot produce a ray.
    pub fn new(camera: &'a dyn Camera, pose: Pose3, pixel: Point2<f64>) -> Option<Self> {
        let ray = camera.bearing(&pixel)?;
        Some(Self {
            pixel,
            ray,
            camera,
            pose,
        })
    }

    /// `true` when `x` lies in front of this camera along the ray.
    #[inline]
    pub fn in_front(&self, x: &Point3<f64>) -> bool {
        self.ray.dot(&self.pose.transform_point(x).coords) > 0.0
    }

    /// Reprojection residual magnitude of `x`.
    #[inline]
    pub fn residual(&self, x: &Point3<f64>) -> f64 {
        self.camera
            .residual(&self.pose.transform_point(x), &self.pixel)
            .norm()
    }
}

/// Algebraic N-view triangulation followed by the chirality check.
///
/// Needs at least two observations.
pub fn fit_point(obs: &[RayObservation<'_>]) -> Option<Point3<f64>> {
    if obs.len() < 2 {
        return None;
    }

    let mut ata = Matrix4::<f64>::zeros();
    for o in obs {
        let x = o.ray.normalize();
        let p = o.pose.as_matrix();
        // rows of P orthogonal to the ray
        let cost = p - x * (x.transpose() * p);
        ata += cost.transpose() * cost;
    }

    let eigen = ata.try_symmetric_eigen(f64::EPSILON, 10_000)?;
    let smallest = eigen.eigenvalues.imin();
    let xh = eigen.eigenvectors.column(smallest);
    let point = Point3::new(xh[0] / xh[3], xh[1] / xh[3], xh[2] / xh[3]);
    if !point.iter().all(|v| v.is_finite()) {
        return None;
    }

    obs.iter().all(|o| o.in_front(&point)).then_some(point)
}

/// Score `point` against every observation.
///
/// A point behind any camera yields a failed evaluation. Otherwise inliers
/// are the observations with residual below `threshold`; the residual sum
/// runs over inliers only.
pub fn evaluate_point<'a>(
    obs: &[RayObservation<'a>],
    point: &Point3<f64>,
    threshold: f64,
) -> EvalResult<RayObservation<'a>> {
    if !obs.iter().all(|o| o.in_front(point)) {
        return EvalResult::default();
    }

    let mut eval = EvalResult {
        success: true,
        ..EvalResult::default()
    };
    for o in obs {
        let r = o.residual(point);
        if r < threshold {
            eval.inliers.push(*o);
            eval.total_residual += r;
        }
    }
    if !eval.inliers.is_empty() {
        let n = eval.inliers.len() as f64;
        eval.fitness = n / obs.len() as f64;
        eval.inlier_rmse = eval.total_residual / n.sqrt();
    }
    eval
}

/// [`Estimator`] adapter triangulating one point from ray observations.
pub struct TriangulationEstimator<'a> {
    pub inlier_threshold: f64,
    _camera: PhantomData<&'a dyn Camera>,
}

impl TriangulationEstimator<'_> {
    pub fn new(inlier_threshold: f64) -> Self {
        Self {
            inlier_threshold,
            _camera: PhantomData,
        }
    }
}

impl<'a> Estimator for TriangulationEstimator<'a> {
    type Datum = RayObservation<'a>;
    type Model = Point3<f64>;
    type Evaluation = EvalResult<RayObservation<'a>>;

    fn fit(&self, sample: &[RayObservation<'a>]) -> Option<Point3<f64>> {
        fit_point(sample)
    }

    fn evaluate(&self, data: &[RayObservation<'a>], model: &Point3<f64>) -> Self::Evaluation {
        evaluate_point(data, model, self.inlier_threshold)
    }
}

/// Triangulation settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Wrap triangulation in RANSAC; otherwise solve once on all observations.
    pub robust: bool,
    /// Inlier residual threshold, in pixels.
    pub inlier_threshold: f64,
    pub max_iterations: usize,
    /// Base seed mixed with each landmark key; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            robust: true,
            inlier_threshold: DEFAULT_INLIER_THRESHOLD,
            max_iterations: RansacOptions::DEFAULT_MAX_ITERATIONS,
            seed: Some(0),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TriangulationError {
    #[error("not enough usable observations (got {got}, need {need})")]
    TooFewObservations { got: usize, need: usize },
    #[error("no consensus after {iterations} hypotheses")]
    NoConsensus { iterations: usize },
    #[error("degenerate or behind-camera solution")]
    Degenerate,
}

/// FNV-1a over the textual key, so every landmark draws from its own stream.
fn key_seed(key: &LandmarkKey) -> u64 {
    key.to_string()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
            (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// Triangulate one point from its observations.
pub fn triangulate_observations(
    obs: &[RayObservation<'_>],
    cfg: &TriangulationConfig,
    seed: Option<u64>,
) -> Result<Point3<f64>, TriangulationError> {
    if obs.len() < 2 {
        return Err(TriangulationError::TooFewObservations {
            got: obs.len(),
            need: 2,
        });
    }

    if !cfg.robust {
        return fit_point(obs).ok_or(TriangulationError::Degenerate);
    }

    let mut opts = RansacOptions::new(2).with_max_iterations(cfg.max_iterations);
    opts.seed = seed;
    let res = ransac::estimate(&TriangulationEstimator::new(cfg.inlier_threshold), obs, &opts);
    res.model.ok_or(TriangulationError::NoConsensus {
        iterations: res.iterations,
    })
}

/// Counts from one [`triangulate_landmarks`] pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TriangulationSummary {
    /// Landmarks with enough observations to attempt triangulation.
    pub eligible: usize,
    pub triangulated: usize,
    /// Landmarks skipped for having too few observations.
    pub sparse: usize,
    pub failed: usize,
}

/// Triangulate every landmark with at least
/// [`MIN_TRIANGULATION_OBSERVATIONS`] observations and store the results.
///
/// Failures are per landmark: they are logged and counted, never fatal.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(store, geometry, cfg), fields(landmarks = store.len()))
)]
pub fn triangulate_landmarks(
    store: &mut LandmarkStore,
    geometry: &dyn ViewGeometry,
    cfg: &TriangulationConfig,
) -> TriangulationSummary {
    let mut summary = TriangulationSummary::default();

    for landmark in store.iter_mut() {
        if !landmark.is_triangulable() {
            warn!(
                "not enough observations to triangulate landmark {} ({} of {})",
                landmark.key,
                landmark.observations.len(),
                MIN_TRIANGULATION_OBSERVATIONS
            );
            summary.sparse += 1;
            continue;
        }
        summary.eligible += 1;

        let rays: Vec<RayObservation<'_>> = landmark
            .observations
            .iter()
            .filter_map(|o| {
                let camera = geometry.camera(o.view)?;
                let pose = geometry.pose(o.view)?;
                RayObservation::new(camera, pose, o.pixel)
            })
            .collect();

        let seed = cfg.seed.map(|s| s ^ key_seed(&landmark.key));
        match triangulate_observations(&rays, cfg, seed) {
            Ok(point) => {
                debug!(
                    "landmark {} triangulated from {} view(s): [{:.4}, {:.4}, {:.4}]",
                    landmark.key,
                    rays.len(),
                    point.x,
                    point.y,
                    point.z
                );
                landmark.position = crate::LandmarkPosition::Triangulated(point);
                summary.triangulated += 1;
            }
            Err(err) => {
                warn!("could not triangulate landmark {}: {err}", landmark.key);
                summary.failed += 1;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CameraIntrinsics, MarkerCorner};
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use std::collections::BTreeMap;

    struct Rig {
        camera: CameraIntrinsics,
        poses: BTreeMap<ViewId, Pose3>,
    }

    impl ViewGeometry for Rig {
        fn camera(&self, _view: ViewId) -> Option<&dyn Camera> {
            Some(&self.camera)
        }

        fn pose(&self, view: ViewId) -> Option<Pose3> {
            self.poses.get(&view).copied()
        }
    }

    /// Cameras on an arc at z = -5 looking towards +z.
    fn rig(n: u32) -> Rig {
        let camera = CameraIntrinsics::pinhole(1000, 800, 800.0, Point2::new(500.0, 400.0));
        let poses = (0..n)
            .map(|i| {
                let yaw = -0.3 + 0.6 * i as f64 / (n.max(2) - 1) as f64;
                let center = Point3::new(-5.0 * yaw.sin(), 0.2 * i as f64, -5.0 * yaw.cos());
                let r = Rotation3::from_axis_angle(&Vector3::y_axis(), -yaw);
                (i, Pose3::new(*r.matrix(), center))
            })
            .collect();
        Rig { camera, poses }
    }

    fn observe<'a>(rig: &'a Rig, x: &Point3<f64>) -> Vec<RayObservation<'a>> {
        rig.poses
            .values()
            .map(|pose| {
                let px = rig.camera.project(&pose.transform_point(x));
                RayObservation::new(&rig.camera, *pose, px).expect("ray")
            })
            .collect()
    }

    #[test]
    fn exact_observations_triangulate_exactly() {
        let rig = rig(4);
        let x = Point3::new(0.3, -0.2, 1.0);
        let obs = observe(&rig, &x);
        let p = fit_point(&obs).expect("point");
        assert_relative_eq!(p, x, epsilon = 1e-6);

        let eval = evaluate_point(&obs, &p, DEFAULT_INLIER_THRESHOLD);
        assert!(eval.success);
        assert_eq!(eval.fitness, 1.0);
        assert_eq!(eval.inliers.len(), 4);
    }

    #[test]
    fn point_behind_a_camera_is_rejected() {
        let rig = rig(3);
        let x = Point3::new(0.1, 0.1, 2.0);
        let mut obs = observe(&rig, &x);
        // the same ray direction reversed places x behind the first camera
        obs[0].ray = -obs[0].ray;
        assert!(fit_point(&obs).is_none());

        let eval = evaluate_point(&obs, &x, DEFAULT_INLIER_THRESHOLD);
        assert!(!eval.success);
        assert_eq!(eval.fitness, 0.0);
        assert_eq!(eval.inlier_rmse, f64::INFINITY);
    }

    #[test]
    fn single_observation_cannot_be_fit() {
        let rig = rig(2);
        let obs = observe(&rig, &Point3::new(0.0, 0.0, 1.0));
        assert!(fit_point(&obs[..1]).is_none());
        assert_eq!(
            triangulate_observations(&obs[..1], &TriangulationConfig::default(), Some(0)),
            Err(TriangulationError::TooFewObservations { got: 1, need: 2 })
        );
    }

    #[test]
    fn ransac_ignores_a_false_match() {
        let rig = rig(6);
        let x = Point3::new(-0.4, 0.25, 0.5);
        let mut obs = observe(&rig, &x);
        obs[2] = RayObservation::new(&rig.camera, obs[2].pose, Point2::new(120.0, 640.0))
            .expect("ray");

        let cfg = TriangulationConfig::default();
        let robust = triangulate_observations(&obs, &cfg, Some(5)).expect("robust");
        assert_relative_eq!(robust, x, epsilon = 1e-6);

        let eval = evaluate_point(&obs, &robust, cfg.inlier_threshold);
        assert_eq!(eval.inliers.len(), 5);
    }

    #[test]
    fn store_pass_counts_sparse_and_triangulated() {
        let rig = rig(3);
        let mut store = LandmarkStore::new();
        let corners = [
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.5, 0.0, 1.0),
            Point3::new(0.5, 0.5, 1.0),
            Point3::new(0.0, 0.5, 1.0),
        ];
        for (&view, pose) in &rig.poses {
            let px = corners.map(|c| rig.camera.project(&pose.transform_point(&c)));
            store.record_marker(view, 11, &px);
        }
        // seen once only
        store.record(
            LandmarkKey::new(12, MarkerCorner::TopLeft),
            0,
            Point2::new(10.0, 10.0),
        );

        let summary = triangulate_landmarks(&mut store, &rig, &TriangulationConfig::default());
        assert_eq!(summary.eligible, 4);
        assert_eq!(summary.triangulated, 4);
        assert_eq!(summary.sparse, 1);
        assert_eq!(summary.failed, 0);

        let tl = store
            .position(&LandmarkKey::new(11, MarkerCorner::TopLeft))
            .expect("triangulated");
        assert_relative_eq!(*tl, corners[0], epsilon = 1e-6);
    }
}
