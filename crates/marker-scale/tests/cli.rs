mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use support::scene_without_poses;

fn marker_scale() -> Command {
    Command::cargo_bin("marker-scale").expect("binary")
}

#[test]
fn help_lists_the_main_flags() {
    marker_scale()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--marker-size"))
        .stdout(predicate::str::contains("--detection-method"));
}

#[test]
fn unknown_detection_method_is_a_usage_error() {
    marker_scale()
        .args(["-i", "scene.json", "-s", "0.1", "-m", "charuco"])
        .assert()
        .code(2);
}

#[test]
fn missing_marker_size_is_a_configuration_error() {
    marker_scale()
        .args(["-i", "scene.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("marker size"));
}

#[test]
fn missing_scene_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tmp");
    marker_scale()
        .arg("-i")
        .arg(dir.path().join("nope.json"))
        .args(["-s", "0.1", "-q"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn scene_without_usable_views_exits_with_no_views() {
    let dir = tempfile::tempdir().expect("tmp");
    let scene = dir.path().join("sfm_data.json");
    std::fs::write(&scene, scene_without_poses(dir.path()).to_string()).expect("scene");
    marker_scale()
        .arg("-i")
        .arg(&scene)
        .args(["-s", "0.1", "-q"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no views"));
}

#[test]
fn missing_filter_file_fails_before_processing() {
    let dir = tempfile::tempdir().expect("tmp");
    let scene = dir.path().join("sfm_data.json");
    std::fs::write(&scene, scene_without_poses(dir.path()).to_string()).expect("scene");
    marker_scale()
        .arg("-i")
        .arg(&scene)
        .arg("--include-from")
        .arg(dir.path().join("missing.txt"))
        .args(["-s", "0.1", "-q"])
        .assert()
        .code(2);
}

#[test]
fn write_config_captures_flags() {
    let dir = tempfile::tempdir().expect("tmp");
    let cfg = dir.path().join("cfg.json");
    marker_scale()
        .args(["-i", "scene.json", "-s", "0.05", "-m", "sample-square", "--no-ransac"])
        .arg("--write-config")
        .arg(&cfg)
        .assert()
        .success();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cfg).expect("cfg")).expect("json");
    assert_eq!(written["marker_size"], 0.05);
    assert_eq!(written["detection_method"], "sample-square");
    assert_eq!(written["triangulation"]["robust"], false);

    // flags override the loaded file
    let cfg2 = dir.path().join("cfg2.json");
    marker_scale()
        .arg("--config")
        .arg(&cfg)
        .args(["-s", "0.2"])
        .arg("--write-config")
        .arg(&cfg2)
        .assert()
        .success();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cfg2).expect("cfg")).expect("json");
    assert_eq!(written["marker_size"], 0.2);
    assert_eq!(written["detection_method"], "sample-square");
}

#[test]
fn explicit_scale_rescales_a_ply() {
    let dir = tempfile::tempdir().expect("tmp");
    let input = dir.path().join("in.ply");
    let output = dir.path().join("out/scaled.ply");
    std::fs::write(
        &input,
        "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
         property float z\nend_header\n1 2 3\n",
    )
    .expect("ply");
    marker_scale()
        .arg("--scale-ply")
        .arg(&input)
        .arg(&output)
        .args(["--scale", "0.5"])
        .assert()
        .success();
    let text = std::fs::read_to_string(&output).expect("scaled");
    assert!(text.ends_with("end_header\n0.5 1 1.5\n"), "{text}");
}
