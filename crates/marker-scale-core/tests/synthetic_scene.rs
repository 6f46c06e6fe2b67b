use std::collections::BTreeMap;

use marker_scale_core::{
    estimate_scale, triangulate_landmarks, Camera, CameraIntrinsics, Distortion, LandmarkStore,
    Pose3, TriangulationConfig, ViewGeometry, ViewId,
};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MARKER_SIZE: f64 = 3.0;
/// Reconstruction units per metre of the simulated SfM result.
const RECONSTRUCTION_SCALE: f64 = 0.4;

struct Scene {
    cameras: BTreeMap<ViewId, CameraIntrinsics>,
    poses: BTreeMap<ViewId, Pose3>,
}

impl ViewGeometry for Scene {
    fn camera(&self, view: ViewId) -> Option<&dyn Camera> {
        self.cameras.get(&view).map(|c| c as &dyn Camera)
    }

    fn pose(&self, view: ViewId) -> Option<Pose3> {
        self.poses.get(&view).copied()
    }
}

/// Camera looking from `center` at the origin, y axis pointing down.
fn look_at(center: Point3<f64>) -> Pose3 {
    let forward = (-center.coords).normalize();
    let right = Vector3::new(0.0, -1.0, 0.0).cross(&forward).normalize();
    let down = forward.cross(&right);
    let r = Rotation3::from_basis_unchecked(&[right, down, forward]).transpose();
    Pose3::new(*r.matrix(), center)
}

fn five_view_scene() -> Scene {
    let camera = CameraIntrinsics::pinhole(1600, 1200, 1100.0, Point2::new(800.0, 600.0))
        .with_distortion(Distortion::Radial3 {
            k1: -0.08,
            k2: 0.01,
            k3: 0.0,
        });
    let centers = [
        Point3::new(0.0, 0.0, -8.0),
        Point3::new(3.0, 0.5, -7.5),
        Point3::new(-3.0, -0.5, -7.2),
        Point3::new(1.0, 3.0, -7.8),
        Point3::new(-1.5, -2.8, -8.2),
    ];
    let mut cameras = BTreeMap::new();
    let mut poses = BTreeMap::new();
    for (view, c) in centers.into_iter().enumerate() {
        cameras.insert(view as ViewId, camera);
        poses.insert(view as ViewId, look_at(c));
    }
    Scene { cameras, poses }
}

fn gaussian(rng: &mut StdRng, sigma: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    sigma * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn marker_corners(center: Point3<f64>) -> [Point3<f64>; 4] {
    let h = 0.5 * MARKER_SIZE;
    [(-h, -h), (h, -h), (h, h), (-h, h)]
        .map(|(x, y)| Point3::from((center.coords + Vector3::new(x, y, 0.0)) * RECONSTRUCTION_SCALE))
}

#[test]
fn noisy_five_view_marker_recovers_scale() {
    let scene = five_view_scene();
    let corners = marker_corners(Point3::new(0.5, -0.3, 0.0));
    let mut rng = StdRng::seed_from_u64(2024);

    let mut store = LandmarkStore::new();
    for (&view, pose) in &scene.poses {
        let camera = &scene.cameras[&view];
        let pixels = corners.map(|c| {
            let p = camera.project(&pose.transform_point(&c));
            Point2::new(p.x + gaussian(&mut rng, 0.05), p.y + gaussian(&mut rng, 0.05))
        });
        store.record_marker(view, 42, &pixels);
    }

    let summary = triangulate_landmarks(&mut store, &scene, &TriangulationConfig::default());
    assert_eq!(summary.eligible, 4);
    assert_eq!(summary.triangulated, 4, "{summary:?}");

    let est = estimate_scale(&store, MARKER_SIZE).expect("scale");
    assert_eq!(est.samples.len(), 4);
    let truth = 1.0 / RECONSTRUCTION_SCALE;
    assert!(
        (est.scale - truth).abs() / truth < 0.05,
        "scale {} vs {}",
        est.scale,
        truth
    );
}

#[test]
fn direct_mode_matches_robust_on_clean_data() {
    let scene = five_view_scene();
    let corners = marker_corners(Point3::origin());

    let mut store = LandmarkStore::new();
    for (&view, pose) in &scene.poses {
        let camera = &scene.cameras[&view];
        let pixels = corners.map(|c| camera.project(&pose.transform_point(&c)));
        store.record_marker(view, 3, &pixels);
    }

    let mut direct = store.clone();
    let robust_summary =
        triangulate_landmarks(&mut store, &scene, &TriangulationConfig::default());
    let direct_cfg = TriangulationConfig {
        robust: false,
        ..TriangulationConfig::default()
    };
    let direct_summary = triangulate_landmarks(&mut direct, &scene, &direct_cfg);
    assert_eq!(robust_summary.triangulated, 4);
    assert_eq!(direct_summary.triangulated, 4);

    let a = estimate_scale(&store, MARKER_SIZE).expect("robust scale");
    let b = estimate_scale(&direct, MARKER_SIZE).expect("direct scale");
    assert!((a.scale - b.scale).abs() < 1e-6);
    assert!((a.scale - 1.0 / RECONSTRUCTION_SCALE).abs() < 1e-6);
}
