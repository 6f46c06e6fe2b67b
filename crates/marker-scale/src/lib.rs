//! Metric scaling of SfM reconstructions from square fiducial markers.
//!
//! Markers of a known physical size are detected in the scene's images,
//! their corners triangulated with the scene's cameras, and the ratio of the
//! printed size to the reconstructed edge lengths rescales the scene.
//!
//! This crate ties together:
//! - [`marker_scale_core`] (re-exported as [`core`]): geometry, robust
//!   triangulation, landmark bookkeeping and scale aggregation,
//! - [`marker_scale_aruco`] (re-exported as [`aruco`]): marker detection,
//! - OpenMVG scene I/O, view filters, undistortion, mesh/histogram output
//!   and the [`run`] pipeline used by the `marker-scale` binary.
//!
//! ## Quickstart
//!
//! ```no_run
//! use marker_scale::{run, ScaleConfig};
//!
//! let cfg = ScaleConfig {
//!     input_scene: "reconstruction/sfm_data.json".into(),
//!     output_scene: Some("reconstruction/sfm_data_scaled.json".into()),
//!     marker_size: 0.05,
//!     ..ScaleConfig::default()
//! };
//! let report = run(&cfg)?;
//! println!("scale = {}", report.scale);
//! # Ok::<(), marker_scale::PipelineError>(())
//! ```
//!
//! ## Features
//!
//! - `cli` (default): the `marker-scale` binary.
//! - `parallel` (default): per-view detection on the `rayon` pool.
//! - `tracing`: spans on the hot paths and a `tracing-subscriber` logger.

pub use marker_scale_aruco as aruco;
pub use marker_scale_core as core;

pub mod debug_image;
pub mod detect;
mod error;
pub mod filter;
pub mod histogram;
pub mod mesh;
pub mod pipeline;
pub mod scene;
pub mod undistort;

pub use detect::{
    build_detector, gray_view, load_gray, DetectionMethod, MarkerDetector, SampleSquareDetector,
};
pub use error::PipelineError;
pub use filter::{FilterError, ViewFilter};
pub use mesh::{read_points, scale_ply, write_points, MeshError, MeshFormat};
pub use pipeline::{
    collect_landmarks, resolve_dictionary, run, run_with_progress, LogProgress, NoProgress,
    ProgressSink, ScaleConfig, ScaleReport, ViewDetections,
};
pub use scene::{Intrinsic, SceneError, SceneGeometry, SfmScene, View};
