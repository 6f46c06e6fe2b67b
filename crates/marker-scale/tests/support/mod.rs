//! Synthetic marker images and scenes shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;

use marker_scale::aruco::aruco_original;
use marker_scale::core::{homography_from_4pt, GrayImage, Homography, Pose3};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use serde_json::{json, Value};

/// A marker to draw: dictionary id and its outer corners (TL, TR, BR, BL in
/// the marker frame) in image pixels.
pub struct MarkerSprite {
    pub id: u32,
    pub corners: [Point2<f64>; 4],
}

struct Prepared {
    code: u64,
    image_to_cell: Homography,
    min: Point2<f64>,
    max: Point2<f64>,
}

/// White image with black-on-white original ArUco markers, 4x4 supersampled.
pub fn render_markers(width: usize, height: usize, sprites: &[MarkerSprite]) -> GrayImage {
    let dict = aruco_original();
    let unit = [
        Point2::new(0.0f32, 0.0),
        Point2::new(7.0, 0.0),
        Point2::new(7.0, 7.0),
        Point2::new(0.0, 7.0),
    ];
    let prepared: Vec<Prepared> = sprites
        .iter()
        .map(|s| {
            let dst = s.corners.map(|p| Point2::new(p.x as f32, p.y as f32));
            let h = homography_from_4pt(&unit, &dst)
                .and_then(|h| h.inverse())
                .expect("marker homography");
            let min = s
                .corners
                .iter()
                .fold(Point2::new(f64::MAX, f64::MAX), |m, p| Point2::new(m.x.min(p.x), m.y.min(p.y)));
            let max = s
                .corners
                .iter()
                .fold(Point2::new(f64::MIN, f64::MIN), |m, p| Point2::new(m.x.max(p.x), m.y.max(p.y)));
            Prepared {
                code: dict.codes[s.id as usize],
                image_to_cell: h,
                min,
                max,
            }
        })
        .collect();

    GrayImage::from_fn(width, height, |x, y| {
        let (xf, yf) = (x as f64, y as f64);
        let Some(m) = prepared
            .iter()
            .find(|m| xf >= m.min.x - 1.0 && xf <= m.max.x + 1.0 && yf >= m.min.y - 1.0 && yf <= m.max.y + 1.0)
        else {
            return 255;
        };
        let mut dark = 0u32;
        for sy in 0..4 {
            for sx in 0..4 {
                let p = Point2::new(
                    xf - 0.5 + (sx as f64 + 0.5) / 4.0,
                    yf - 0.5 + (sy as f64 + 0.5) / 4.0,
                );
                let c = m.image_to_cell.apply_f64(p);
                if !(0.0..7.0).contains(&c.x) || !(0.0..7.0).contains(&c.y) {
                    continue;
                }
                let (cx, cy) = (c.x as usize, c.y as usize);
                let border = cx == 0 || cy == 0 || cx == 6 || cy == 6;
                if border || (m.code >> ((cy - 1) * 5 + (cx - 1))) & 1 == 1 {
                    dark += 1;
                }
            }
        }
        (255 - dark * 255 / 16) as u8
    })
}

pub fn save_png(img: &GrayImage, path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("image dir");
    }
    ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .expect("buffer size")
        .save(path)
        .expect("save png");
}

/// Camera at `center` looking at the world origin.
pub fn look_at(center: Point3<f64>) -> Pose3 {
    let forward = (-center.coords).normalize();
    let right = Vector3::new(0.0, -1.0, 0.0).cross(&forward).normalize();
    let down = forward.cross(&right);
    let r = Rotation3::from_basis_unchecked(&[right, down, forward]).transpose();
    Pose3::new(*r.matrix(), center)
}

pub struct SyntheticCamera {
    pub width: u32,
    pub height: u32,
    pub focal: f64,
}

impl SyntheticCamera {
    pub fn project(&self, pose: &Pose3, x: &Point3<f64>) -> Point2<f64> {
        let pc = pose.transform_point(x);
        Point2::new(
            self.focal * pc.x / pc.z + self.width as f64 / 2.0,
            self.focal * pc.y / pc.z + self.height as f64 / 2.0,
        )
    }
}

/// OpenMVG scene JSON with one pinhole intrinsic shared by every view.
/// Each pose gets the view index as id; image `view_<i>.png`.
pub fn scene_json(root: &Path, cam: &SyntheticCamera, poses: &[Pose3]) -> Value {
    let views: Vec<Value> = poses
        .iter()
        .enumerate()
        .map(|(i, _)| {
            json!({"key": i, "value": {"polymorphic_id": 1073741824u64, "ptr_wrapper": {
                "id": 2147483649u64 + i as u64, "data": {
                    "local_path": "", "filename": format!("view_{i}.png"),
                    "width": cam.width, "height": cam.height,
                    "id_view": i, "id_intrinsic": 0, "id_pose": i}}}})
        })
        .collect();
    let extrinsics: Vec<Value> = poses
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let r = &p.rotation;
            json!({"key": i, "value": {
                "rotation": [
                    [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                    [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                    [r[(2, 0)], r[(2, 1)], r[(2, 2)]]
                ],
                "center": [p.center.x, p.center.y, p.center.z]}})
        })
        .collect();
    json!({
        "sfm_data_version": "0.3",
        "root_path": root.to_string_lossy(),
        "views": views,
        "intrinsics": [
            {"key": 0, "value": {"polymorphic_id": 2147483649u64, "polymorphic_name": "pinhole",
                "ptr_wrapper": {"id": 2147483700u64, "data": {
                    "width": cam.width, "height": cam.height, "focal_length": cam.focal,
                    "principal_point": [cam.width as f64 / 2.0, cam.height as f64 / 2.0]}}}}
        ],
        "extrinsics": extrinsics,
        "structure": [],
        "control_points": []
    })
}

/// Scene JSON with views but no usable pose for any of them.
pub fn scene_without_poses(root: &Path) -> Value {
    json!({
        "sfm_data_version": "0.3",
        "root_path": root.to_string_lossy(),
        "views": [
            {"key": 0, "value": {"polymorphic_id": 1073741824u64, "ptr_wrapper": {"id": 2147483649u64, "data": {
                "local_path": "", "filename": "a.png", "width": 64, "height": 48,
                "id_view": 0, "id_intrinsic": 4294967295u64, "id_pose": 4294967295u64}}}}
        ],
        "intrinsics": [],
        "extrinsics": []
    })
}
