use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marker_scale::core::{
    triangulate_landmarks, Camera, CameraIntrinsics, LandmarkStore, Pose3, TriangulationConfig,
    ViewGeometry, ViewId,
};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

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

fn look_at(center: Point3<f64>) -> Pose3 {
    let forward = (-center.coords).normalize();
    let right = Vector3::new(0.0, -1.0, 0.0).cross(&forward).normalize();
    let down = forward.cross(&right);
    let r = Rotation3::from_basis_unchecked(&[right, down, forward]).transpose();
    Pose3::new(*r.matrix(), center)
}

fn rig(views: usize) -> Rig {
    let poses = (0..views)
        .map(|i| {
            let a = i as f64 / views as f64 * std::f64::consts::TAU;
            let c = Point3::new(4.0 * a.cos(), 1.5 * a.sin(), -8.0);
            (i as ViewId, look_at(c))
        })
        .collect();
    Rig {
        camera: CameraIntrinsics::pinhole(1920, 1080, 1400.0, Point2::new(960.0, 540.0)),
        poses,
    }
}

/// `markers` markers seen in every view with 0.5 px noise and one outlier
/// observation per landmark.
fn noisy_store(rig: &Rig, markers: u32) -> LandmarkStore {
    let mut rng = StdRng::seed_from_u64(7);
    let mut store = LandmarkStore::new();
    for id in 0..markers {
        let origin = Vector3::new(id as f64 * 0.3 - 1.0, (id % 3) as f64 * 0.2, 0.0);
        let corners = [(0.0, 0.0), (0.2, 0.0), (0.2, 0.2), (0.0, 0.2)]
            .map(|(x, y)| Point3::from(origin + Vector3::new(x, y, 0.0)));
        for (&view, pose) in &rig.poses {
            let outlier = view as u32 == id % rig.poses.len() as u32;
            let pixels = corners.map(|c| {
                let mut p = rig.camera.project(&pose.transform_point(&c));
                p.x += rng.random_range(-0.5..0.5);
                p.y += rng.random_range(-0.5..0.5);
                if outlier {
                    p.x += 40.0;
                }
                p
            });
            store.record_marker(view, id, &pixels);
        }
    }
    store
}

fn bench_triangulation(c: &mut Criterion) {
    let rig = rig(12);
    let store = noisy_store(&rig, 16);

    let mut group = c.benchmark_group("triangulate_landmarks");
    for (name, robust) in [("ransac", true), ("direct", false)] {
        let cfg = TriangulationConfig {
            robust,
            ..TriangulationConfig::default()
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut s = store.clone();
                black_box(triangulate_landmarks(&mut s, &rig, &cfg))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_triangulation);
criterion_main!(benches);
