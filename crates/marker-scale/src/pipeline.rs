//! The end-to-end scaling run: detect markers in every selected view,
//! triangulate their corners, derive the scale and rescale the scene.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use marker_scale_aruco::{
    builtin_dictionary, ArucoDetectorParams, DetectedMarker, Dictionary, DictionaryError,
};
use marker_scale_core::{
    estimate_scale, triangulate_landmarks, LandmarkStore, ScaleEstimate, TriangulationConfig,
    TriangulationSummary, ViewId, MIN_TRIANGULATION_OBSERVATIONS,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::debug_image::{debug_image_path, save_overlay};
use crate::detect::{build_detector, gray_view, load_gray, DetectionMethod, MarkerDetector};
use crate::filter::ViewFilter;
use crate::histogram::save_histogram;
use crate::mesh::{write_points, MeshFormat};
use crate::scene::{SfmScene, View};
use crate::undistort::undistort_for;
use crate::PipelineError;

pub const DEFAULT_DICTIONARY: &str = "ARUCO_ORIGINAL";

/// Every knob of a scaling run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub input_scene: PathBuf,
    /// Where the scaled scene is written; nothing is written when unset.
    pub output_scene: Option<PathBuf>,
    /// Physical side length of the printed markers.
    pub marker_size: f64,
    pub detection_method: DetectionMethod,
    /// Built-in dictionary name or a JSON dictionary file.
    pub dictionary: String,
    pub detector: ArucoDetectorParams,
    /// Overrides the scene's `root_path` when locating images.
    pub sfm_root: Option<PathBuf>,
    pub include_from: Option<PathBuf>,
    pub exclude_from: Option<PathBuf>,
    pub undistort_images: bool,
    pub triangulation: TriangulationConfig,
    pub save_debug_images: Option<PathBuf>,
    pub save_landmarks: Option<PathBuf>,
    pub save_scaled_landmarks: Option<PathBuf>,
    pub histogram: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub progress: bool,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            input_scene: PathBuf::new(),
            output_scene: None,
            marker_size: 0.0,
            detection_method: DetectionMethod::Markers,
            dictionary: DEFAULT_DICTIONARY.to_string(),
            detector: ArucoDetectorParams::default(),
            sfm_root: None,
            include_from: None,
            exclude_from: None,
            undistort_images: false,
            triangulation: TriangulationConfig::default(),
            save_debug_images: None,
            save_landmarks: None,
            save_scaled_landmarks: None,
            histogram: None,
            report: None,
            progress: false,
        }
    }
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let data = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&data).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|e| PipelineError::io(path, e))
}

impl ScaleConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        load_json_file(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_json_file(path, self)
    }

    /// Reject settings that cannot produce a run, before touching any data.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_scene.as_os_str().is_empty() {
            return Err(PipelineError::Config("no input scene given".into()));
        }
        if !(self.marker_size.is_finite() && self.marker_size > 0.0) {
            return Err(PipelineError::Config(format!(
                "marker size must be positive (got {})",
                self.marker_size
            )));
        }
        if !(self.triangulation.inlier_threshold > 0.0) {
            return Err(PipelineError::Config(format!(
                "inlier threshold must be positive (got {})",
                self.triangulation.inlier_threshold
            )));
        }
        for path in [&self.save_landmarks, &self.save_scaled_landmarks]
            .into_iter()
            .flatten()
        {
            MeshFormat::from_path(path)?;
        }
        Ok(())
    }
}

/// Resolve a dictionary by built-in name, falling back to a JSON file path.
pub fn resolve_dictionary(name: &str) -> Result<Dictionary, DictionaryError> {
    builtin_dictionary(name).or_else(|err| {
        if Path::new(name).is_file() {
            Dictionary::load_json(name)
        } else {
            Err(err)
        }
    })
}

/// Receives per-view progress during marker detection.
pub trait ProgressSink: Send + Sync {
    fn view_done(&self, done: usize, total: usize);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn view_done(&self, _done: usize, _total: usize) {}
}

/// Logs progress at every tenth of the views.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn view_done(&self, done: usize, total: usize) {
        let step = total.div_ceil(10).max(1);
        if done % step == 0 || done == total {
            info!(
                "detecting markers: {done}/{total} views ({:.0}%)",
                100.0 * done as f64 / total.max(1) as f64
            );
        }
    }
}

/// Markers found in one view.
#[derive(Clone, Debug)]
pub struct ViewDetections {
    pub view: ViewId,
    pub markers: Vec<DetectedMarker>,
}

/// Summary of a finished run, written as JSON on request.
#[derive(Clone, Debug, Serialize)]
pub struct ScaleReport {
    pub input_scene: PathBuf,
    pub output_scene: Option<PathBuf>,
    pub marker_size: f64,
    pub views_total: usize,
    pub views_selected: usize,
    pub views_with_markers: usize,
    pub markers: usize,
    pub landmarks: usize,
    pub observations: usize,
    pub triangulation: TriangulationSummary,
    pub scale: f64,
    pub estimate: ScaleEstimate,
}

/// Views with a usable pose and intrinsic that pass the filter, by id.
pub fn select_views<'a>(scene: &'a SfmScene, filter: &ViewFilter) -> Vec<&'a View> {
    scene
        .views()
        .values()
        .filter(|v| scene.is_pose_and_intrinsic_defined(v))
        .filter(|v| filter.accepts(v))
        .collect()
}

struct DetectionContext<'a> {
    scene: &'a SfmScene,
    root: &'a Path,
    detector: &'a dyn MarkerDetector,
    undistort: bool,
    debug_dir: Option<&'a Path>,
    progress: &'a dyn ProgressSink,
    done: AtomicUsize,
    total: usize,
}

impl DetectionContext<'_> {
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(view = view.id)))]
    fn detect_view(&self, view: &View) -> Result<ViewDetections, PipelineError> {
        let path = self.root.join(&view.image_path);
        let gray = load_gray(&path)?;
        let remapped = match (self.undistort, self.scene.intrinsic_of(view.id)) {
            (true, Some(intrinsic)) => undistort_for(&gray_view(&gray), intrinsic),
            _ => None,
        };
        let img = match &remapped {
            Some(r) => r.view(),
            None => gray_view(&gray),
        };

        let markers = self.detector.detect(&img);
        debug!("view {} ({}): {} marker(s)", view.id, view.image_path, markers.len());

        if let Some(dir) = self.debug_dir.filter(|_| !markers.is_empty()) {
            save_overlay(&debug_image_path(dir, &view.image_path), &img, &markers)?;
        }

        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.view_done(done, self.total);
        Ok(ViewDetections {
            view: view.id,
            markers,
        })
    }
}

/// Detect markers in `views`; results come back in the order of `views`.
fn detect_all(
    ctx: &DetectionContext<'_>,
    views: &[&View],
) -> Result<Vec<ViewDetections>, PipelineError> {
    #[cfg(feature = "parallel")]
    {
        views.par_iter().map(|v| ctx.detect_view(v)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        views.iter().map(|v| ctx.detect_view(v)).collect()
    }
}

/// Feed detections into a landmark store in ascending view order.
pub fn collect_landmarks(detections: &[ViewDetections]) -> LandmarkStore {
    let mut sorted: Vec<&ViewDetections> = detections.iter().collect();
    sorted.sort_by_key(|d| d.view);
    let mut store = LandmarkStore::new();
    for det in sorted {
        for m in &det.markers {
            store.record_marker(det.view, m.id, &m.corners.map(|c| c.cast::<f64>()));
        }
    }
    store
}

/// Run with log-based progress if `cfg.progress` is set.
pub fn run(cfg: &ScaleConfig) -> Result<ScaleReport, PipelineError> {
    if cfg.progress {
        run_with_progress(cfg, &LogProgress)
    } else {
        run_with_progress(cfg, &NoProgress)
    }
}

#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn run_with_progress(
    cfg: &ScaleConfig,
    progress: &dyn ProgressSink,
) -> Result<ScaleReport, PipelineError> {
    cfg.validate()?;
    let filter = ViewFilter::from_files(cfg.include_from.as_deref(), cfg.exclude_from.as_deref())?;
    let dictionary = resolve_dictionary(&cfg.dictionary)?;
    let detector = build_detector(cfg.detection_method, dictionary, &cfg.detector)?;

    let mut scene = SfmScene::load(&cfg.input_scene)?;
    info!(
        "Loaded SfM scene: {} views, {} poses, {} intrinsics",
        scene.views().len(),
        scene.poses().len(),
        scene.intrinsics().len()
    );

    let views = select_views(&scene, &filter);
    if views.is_empty() {
        return Err(PipelineError::NoViews);
    }
    info!("{} of {} views selected", views.len(), scene.views().len());

    let root = cfg
        .sfm_root
        .clone()
        .unwrap_or_else(|| scene.root_path().to_path_buf());
    let ctx = DetectionContext {
        scene: &scene,
        root: &root,
        detector: detector.as_ref(),
        undistort: cfg.undistort_images,
        debug_dir: cfg.save_debug_images.as_deref(),
        progress,
        done: AtomicUsize::new(0),
        total: views.len(),
    };
    let detections = detect_all(&ctx, &views)?;
    let views_with_markers = detections.iter().filter(|d| !d.markers.is_empty()).count();
    info!(
        "Detected landmarks in {} of {} views",
        views_with_markers,
        views.len()
    );
    let views_selected = views.len();

    let mut store = collect_landmarks(&detections);
    if store.triangulable_count() == 0 {
        return Err(PipelineError::NoObservableLandmarks {
            min: MIN_TRIANGULATION_OBSERVATIONS,
        });
    }

    let summary = {
        let geometry = scene.geometry(cfg.undistort_images);
        triangulate_landmarks(&mut store, &geometry, &cfg.triangulation)
    };
    info!(
        "Triangulated {} of {} landmarks",
        summary.triangulated,
        store.len()
    );
    if summary.failed > 0 {
        warn!("{} landmark(s) could not be triangulated", summary.failed);
    }

    if let Some(path) = &cfg.save_landmarks {
        if store.marker_count() > 0 {
            write_points(path, &store.triangulated_points())?;
        }
    }

    let estimate = estimate_scale(&store, cfg.marker_size)?;
    let s = &estimate.summary;
    info!(
        "Calculated scale factor: {:.6} from {} samples (median {:.6}, min {:.6}, max {:.6}, std {:.6})",
        estimate.scale, s.count, s.median, s.min, s.max, s.std_dev
    );

    scene.scale(estimate.scale);
    if let Some(path) = &cfg.output_scene {
        scene.save(path)?;
        info!("Saved scaled scene to {}", path.display());
    }

    if let Some(path) = &cfg.save_scaled_landmarks {
        if store.marker_count() > 0 {
            write_points(path, &store.scaled(estimate.scale).triangulated_points())?;
        }
    }

    if let Some(path) = &cfg.histogram {
        save_histogram(path, &estimate.ratios(), estimate.scale)?;
    }

    let report = ScaleReport {
        input_scene: cfg.input_scene.clone(),
        output_scene: cfg.output_scene.clone(),
        marker_size: cfg.marker_size,
        views_total: scene.views().len(),
        views_selected,
        views_with_markers,
        markers: store.marker_count(),
        landmarks: store.len(),
        observations: store.observation_count(),
        triangulation: summary,
        scale: estimate.scale,
        estimate,
    };
    if let Some(path) = &cfg.report {
        write_json_file(path, &report)?;
    }
    Ok(report)
}
