//! OpenMVG `sfm_data.json` scenes.
//!
//! The document is kept as a raw [`serde_json::Value`] so that saving writes
//! back every key untouched except the camera poses. Views, intrinsics and
//! extrinsics are extracted into typed maps on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use marker_scale_core::{
    Camera, CameraIntrinsics, Distortion, Pose3, Similarity3, ViewGeometry, ViewId,
};
use nalgebra::{Matrix3, Point2, Point3};
use serde_json::{json, Value};

/// Index value OpenMVG uses for "no intrinsic" / "no pose".
pub const UNDEFINED_INDEX: u64 = u32::MAX as u64;

const POLYMORPHIC_NEW_FLAG: u64 = 0x8000_0000;

#[derive(thiserror::Error, Debug)]
pub enum SceneError {
    #[error("failed to read scene {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write scene {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scene {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed scene: {0}")]
    Format(String),
}

impl SceneError {
    pub fn exit_code(&self) -> i32 {
        7
    }
}

fn malformed(msg: impl Into<String>) -> SceneError {
    SceneError::Format(msg.into())
}

#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub id: ViewId,
    /// Image path relative to the scene root, as stored in the scene.
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub intrinsic: Option<u32>,
    pub pose: Option<u32>,
}

/// Camera model of one intrinsic entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Intrinsic {
    /// A pinhole-family model this crate can project and undistort.
    Pinhole(CameraIntrinsics),
    /// Any other model; its views are neither undistorted nor triangulated.
    Unsupported { kind: String },
}

impl Intrinsic {
    pub fn camera(&self) -> Option<&CameraIntrinsics> {
        match self {
            Intrinsic::Pinhole(c) => Some(c),
            Intrinsic::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SfmScene {
    raw: Value,
    root_path: PathBuf,
    views: BTreeMap<ViewId, View>,
    intrinsics: BTreeMap<u32, Intrinsic>,
    poses: BTreeMap<u32, Pose3>,
}

impl SfmScene {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SceneError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&text).map_err(|source| SceneError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(raw)
    }

    pub fn from_json(raw: Value) -> Result<Self, SceneError> {
        let root_path = raw
            .get("root_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_default();
        let views = parse_views(&raw)?;
        let intrinsics = parse_intrinsics(&raw)?;
        let poses = parse_extrinsics(&raw)?;
        Ok(Self {
            raw,
            root_path,
            views,
            intrinsics,
            poses,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let path = path.as_ref();
        let write_err = |source| SceneError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = serde_json::to_string_pretty(&self.raw).map_err(|source| SceneError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(write_err)
    }

    pub fn to_json(&self) -> &Value {
        &self.raw
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn views(&self) -> &BTreeMap<ViewId, View> {
        &self.views
    }

    pub fn intrinsics(&self) -> &BTreeMap<u32, Intrinsic> {
        &self.intrinsics
    }

    pub fn poses(&self) -> &BTreeMap<u32, Pose3> {
        &self.poses
    }

    pub fn intrinsic_of(&self, view: ViewId) -> Option<&Intrinsic> {
        let id = self.views.get(&view)?.intrinsic?;
        self.intrinsics.get(&id)
    }

    pub fn pose_of(&self, view: ViewId) -> Option<Pose3> {
        let id = self.views.get(&view)?.pose?;
        self.poses.get(&id).copied()
    }

    /// Both the pose and the intrinsic of `view` exist.
    pub fn is_pose_and_intrinsic_defined(&self, view: &View) -> bool {
        view.intrinsic.is_some_and(|i| self.intrinsics.contains_key(&i))
            && view.pose.is_some_and(|p| self.poses.contains_key(&p))
    }

    /// Camera models for triangulation.
    ///
    /// With `undistorted` the cameras drop their distortion, matching
    /// observations taken on remapped images.
    pub fn geometry(&self, undistorted: bool) -> SceneGeometry<'_> {
        let cameras = self
            .intrinsics
            .iter()
            .filter_map(|(&id, intr)| {
                let cam = intr.camera()?;
                Some((id, if undistorted { cam.without_distortion() } else { *cam }))
            })
            .collect();
        SceneGeometry {
            scene: self,
            cameras,
        }
    }

    /// Transform every pose; all other content is left as loaded.
    pub fn apply_similarity(&mut self, sim: &Similarity3) {
        for pose in self.poses.values_mut() {
            *pose = sim.apply_pose(pose);
        }
        let Some(entries) = self.raw.get_mut("extrinsics").and_then(Value::as_array_mut) else {
            return;
        };
        for entry in entries {
            let Some(key) = entry.get("key").and_then(Value::as_u64) else {
                continue;
            };
            let Some(pose) = self.poses.get(&(key as u32)) else {
                continue;
            };
            if let Some(value) = entry.get_mut("value").and_then(Value::as_object_mut) {
                value.insert("rotation".to_string(), rotation_to_json(&pose.rotation));
                value.insert(
                    "center".to_string(),
                    json!([pose.center.x, pose.center.y, pose.center.z]),
                );
            }
        }
    }

    pub fn scale(&mut self, scale: f64) {
        self.apply_similarity(&Similarity3::scaling(scale));
    }
}

impl ViewGeometry for SfmScene {
    fn camera(&self, view: ViewId) -> Option<&dyn Camera> {
        self.intrinsic_of(view)?
            .camera()
            .map(|c| c as &dyn Camera)
    }

    fn pose(&self, view: ViewId) -> Option<Pose3> {
        self.pose_of(view)
    }
}

/// A scene with a chosen camera variant per intrinsic.
pub struct SceneGeometry<'a> {
    scene: &'a SfmScene,
    cameras: BTreeMap<u32, CameraIntrinsics>,
}

impl ViewGeometry for SceneGeometry<'_> {
    fn camera(&self, view: ViewId) -> Option<&dyn Camera> {
        let id = self.scene.views.get(&view)?.intrinsic?;
        self.cameras.get(&id).map(|c| c as &dyn Camera)
    }

    fn pose(&self, view: ViewId) -> Option<Pose3> {
        self.scene.pose_of(view)
    }
}

fn entries<'a>(raw: &'a Value, field: &str) -> Result<&'a [Value], SceneError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(malformed(format!("`{field}` must be an array"))),
    }
}

fn entry_key(entry: &Value, field: &str) -> Result<u32, SceneError> {
    entry
        .get("key")
        .and_then(Value::as_u64)
        .and_then(|k| u32::try_from(k).ok())
        .ok_or_else(|| malformed(format!("`{field}` entry without a numeric key")))
}

fn defined_index(data: &Value, field: &str) -> Option<u32> {
    data.get(field)
        .and_then(Value::as_u64)
        .filter(|&i| i != UNDEFINED_INDEX)
        .and_then(|i| u32::try_from(i).ok())
}

fn parse_views(raw: &Value) -> Result<BTreeMap<ViewId, View>, SceneError> {
    let mut out = BTreeMap::new();
    for entry in entries(raw, "views")? {
        let key = entry_key(entry, "views")?;
        let data = entry
            .pointer("/value/ptr_wrapper/data")
            .ok_or_else(|| malformed(format!("view {key} has no data")))?;
        let filename = data
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("view {key} has no filename")))?;
        let local = data.get("local_path").and_then(Value::as_str).unwrap_or("");
        let image_path = if local.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{filename}", local.trim_end_matches('/'))
        };
        let dim = |f: &str| data.get(f).and_then(Value::as_u64).unwrap_or(0) as u32;
        out.insert(
            key,
            View {
                id: key,
                image_path,
                width: dim("width"),
                height: dim("height"),
                intrinsic: defined_index(data, "id_intrinsic"),
                pose: defined_index(data, "id_pose"),
            },
        );
    }
    Ok(out)
}

fn f64_array<const N: usize>(v: Option<&Value>) -> Option<[f64; N]> {
    let arr = v?.as_array()?;
    if arr.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (o, x) in out.iter_mut().zip(arr) {
        *o = x.as_f64()?;
    }
    Some(out)
}

fn parse_intrinsics(raw: &Value) -> Result<BTreeMap<u32, Intrinsic>, SceneError> {
    // cereal names a polymorphic type only on its first occurrence
    let mut type_names: BTreeMap<u64, String> = BTreeMap::new();
    let mut out = BTreeMap::new();

    for entry in entries(raw, "intrinsics")? {
        let key = entry_key(entry, "intrinsics")?;
        let value = entry
            .get("value")
            .ok_or_else(|| malformed(format!("intrinsic {key} has no value")))?;
        let poly_id = value
            .get("polymorphic_id")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let kind = match value.get("polymorphic_name").and_then(Value::as_str) {
            Some(name) => {
                type_names.insert(poly_id & !POLYMORPHIC_NEW_FLAG, name.to_string());
                name.to_string()
            }
            None => type_names
                .get(&(poly_id & !POLYMORPHIC_NEW_FLAG))
                .cloned()
                .ok_or_else(|| malformed(format!("intrinsic {key} has an unknown type")))?,
        };
        let data = value
            .pointer("/ptr_wrapper/data")
            .ok_or_else(|| malformed(format!("intrinsic {key} has no data")))?;

        let intrinsic = match pinhole_from_json(&kind, data) {
            Some(cam) => Intrinsic::Pinhole(cam),
            None => {
                warn!("intrinsic {key}: unsupported camera type `{kind}`");
                Intrinsic::Unsupported { kind }
            }
        };
        out.insert(key, intrinsic);
    }
    Ok(out)
}

fn pinhole_from_json(kind: &str, data: &Value) -> Option<CameraIntrinsics> {
    let distortion = match kind {
        "pinhole" => Distortion::None,
        "pinhole_radial_k1" => {
            let [k1] = f64_array::<1>(data.get("disto_k1"))?;
            Distortion::Radial1 { k1 }
        }
        "pinhole_radial_k3" => {
            let [k1, k2, k3] = f64_array::<3>(data.get("disto_k3"))?;
            Distortion::Radial3 { k1, k2, k3 }
        }
        "pinhole_brown_t2" => {
            let [k1, k2, k3, t1, t2] = f64_array::<5>(data.get("disto_t2"))?;
            Distortion::Brown { k1, k2, k3, t1, t2 }
        }
        "fisheye" => {
            let [k1, k2, k3, k4] = f64_array::<4>(data.get("fisheye"))?;
            Distortion::Fisheye { k1, k2, k3, k4 }
        }
        _ => return None,
    };
    let width = data.get("width")?.as_u64()? as u32;
    let height = data.get("height")?.as_u64()? as u32;
    let focal = data.get("focal_length")?.as_f64()?;
    let [cx, cy] = f64_array::<2>(data.get("principal_point"))?;
    Some(
        CameraIntrinsics::pinhole(width, height, focal, Point2::new(cx, cy))
            .with_distortion(distortion),
    )
}

fn parse_extrinsics(raw: &Value) -> Result<BTreeMap<u32, Pose3>, SceneError> {
    let mut out = BTreeMap::new();
    for entry in entries(raw, "extrinsics")? {
        let key = entry_key(entry, "extrinsics")?;
        let value = entry
            .get("value")
            .ok_or_else(|| malformed(format!("pose {key} has no value")))?;
        let rows = value
            .get("rotation")
            .and_then(Value::as_array)
            .filter(|rows| rows.len() == 3)
            .ok_or_else(|| malformed(format!("pose {key}: rotation must be 3x3")))?;
        let mut r = Matrix3::zeros();
        for (i, row) in rows.iter().enumerate() {
            let [a, b, c] = f64_array::<3>(Some(row))
                .ok_or_else(|| malformed(format!("pose {key}: rotation must be 3x3")))?;
            r[(i, 0)] = a;
            r[(i, 1)] = b;
            r[(i, 2)] = c;
        }
        let [x, y, z] = f64_array::<3>(value.get("center"))
            .ok_or_else(|| malformed(format!("pose {key}: center must have 3 entries")))?;
        out.insert(key, Pose3::new(r, Point3::new(x, y, z)));
    }
    Ok(out)
}

fn rotation_to_json(r: &Matrix3<f64>) -> Value {
    json!([
        [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
        [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
        [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
    ])
}
