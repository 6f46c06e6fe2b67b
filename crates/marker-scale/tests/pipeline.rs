mod support;

use marker_scale::core::TriangulationConfig;
use marker_scale::{read_points, run, ScaleConfig, SfmScene};
use nalgebra::{Point2, Point3, Vector3};
use support::{look_at, render_markers, save_png, scene_json, MarkerSprite, SyntheticCamera};

/// Side of the printed markers, in metres.
const MARKER_SIZE: f64 = 0.25;
/// Side of the markers in reconstruction units.
const MARKER_SIDE_WORLD: f64 = 1.0;

fn marker_world_corners(origin: Vector3<f64>) -> [Point3<f64>; 4] {
    let s = MARKER_SIDE_WORLD;
    [(0.0, 0.0), (s, 0.0), (s, s), (0.0, s)]
        .map(|(x, y)| Point3::from(origin + Vector3::new(x, y, 0.0)))
}

/// Two markers on the z = 0 plane, photographed from five positions.
fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let cam = SyntheticCamera {
        width: 640,
        height: 480,
        focal: 480.0,
    };
    let poses: Vec<_> = [
        Point3::new(0.0, 0.0, -6.0),
        Point3::new(1.5, 0.3, -5.8),
        Point3::new(-1.5, -0.3, -5.8),
        Point3::new(0.5, 1.4, -5.8),
        Point3::new(-0.8, -1.3, -6.0),
    ]
    .into_iter()
    .map(look_at)
    .collect();
    let markers = [
        (7u32, marker_world_corners(Vector3::new(-1.6, -0.5, 0.0))),
        (300u32, marker_world_corners(Vector3::new(0.6, -0.5, 0.0))),
    ];

    let images = dir.join("images");
    for (i, pose) in poses.iter().enumerate() {
        let sprites: Vec<MarkerSprite> = markers
            .iter()
            .map(|(id, corners)| MarkerSprite {
                id: *id,
                corners: corners.map(|c| {
                    let p = cam.project(pose, &c);
                    Point2::new(p.x, p.y)
                }),
            })
            .collect();
        let img = render_markers(cam.width as usize, cam.height as usize, &sprites);
        save_png(&img, &images.join(format!("view_{i}.png")));
    }

    let scene_path = dir.join("sfm_data.json");
    let json = scene_json(&images, &cam, &poses);
    std::fs::write(&scene_path, serde_json::to_string_pretty(&json).expect("json"))
        .expect("write scene");
    scene_path
}

#[test]
fn rendered_scene_is_scaled_to_marker_units() {
    let dir = tempfile::tempdir().expect("tmp");
    let scene_path = write_fixture(dir.path());
    let out = dir.path().join("out/sfm_data_scaled.json");

    let cfg = ScaleConfig {
        input_scene: scene_path.clone(),
        output_scene: Some(out.clone()),
        marker_size: MARKER_SIZE,
        save_landmarks: Some(dir.path().join("out/landmarks.ply")),
        save_scaled_landmarks: Some(dir.path().join("out/landmarks_scaled.obj")),
        histogram: Some(dir.path().join("out/hist.svg")),
        report: Some(dir.path().join("out/report.json")),
        save_debug_images: Some(dir.path().join("debug")),
        ..ScaleConfig::default()
    };
    // rendered corners are only accurate to a fraction of a pixel
    let cfg = ScaleConfig {
        triangulation: TriangulationConfig {
            inlier_threshold: 2.0,
            ..cfg.triangulation
        },
        ..cfg
    };
    let report = run(&cfg).expect("run");

    let truth = MARKER_SIZE / MARKER_SIDE_WORLD;
    assert!(
        (report.scale - truth).abs() / truth < 0.05,
        "scale {} vs {truth}",
        report.scale
    );
    assert_eq!(report.views_selected, 5);
    assert_eq!(report.views_with_markers, 5);
    assert_eq!(report.markers, 2);
    assert_eq!(report.landmarks, 8);
    assert_eq!(report.triangulation.triangulated, 8, "{:?}", report.triangulation);
    assert_eq!(report.estimate.samples.len(), 8);

    let before = SfmScene::load(&scene_path).expect("input");
    let after = SfmScene::load(&out).expect("output");
    for (id, pose) in before.poses() {
        let scaled = after.poses()[id];
        assert!((scaled.center.coords - pose.center.coords * report.scale).norm() < 1e-9);
        assert!((scaled.rotation - pose.rotation).norm() < 1e-12);
    }
    assert_eq!(after.to_json()["structure"], before.to_json()["structure"]);

    let raw = read_points(&dir.path().join("out/landmarks.ply")).expect("landmarks");
    let scaled = read_points(&dir.path().join("out/landmarks_scaled.obj")).expect("scaled");
    assert_eq!(raw.len(), report.triangulation.triangulated);
    for (a, b) in raw.iter().zip(&scaled) {
        assert!((b.coords - a.coords * report.scale).norm() < 1e-6);
    }

    assert!(dir.path().join("out/hist.svg").is_file());
    assert!(dir.path().join("debug/view_0.jpg").is_file());
    let report_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("out/report.json")).expect("report"),
    )
    .expect("report json");
    assert_eq!(report_json["markers"], 2);
}

#[test]
fn excluding_views_can_leave_landmarks_unobservable() {
    let dir = tempfile::tempdir().expect("tmp");
    let scene_path = write_fixture(dir.path());
    let exclude = dir.path().join("exclude.txt");
    std::fs::write(&exclude, "view_0.png\nview_1.png\nview_2.png\n").expect("list");

    let cfg = ScaleConfig {
        input_scene: scene_path,
        marker_size: MARKER_SIZE,
        exclude_from: Some(exclude),
        ..ScaleConfig::default()
    };
    let err = run(&cfg).expect_err("two views cannot triangulate");
    assert_eq!(err.exit_code(), 6);
}
