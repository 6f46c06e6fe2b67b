//! Core types and algorithms for marker-based metric scaling.
//!
//! This crate is purely geometric. It does *not* read images or scene files;
//! it only needs observations, cameras and poses:
//! - [`ransac`]: a generic robust-estimation loop over any [`Estimator`],
//! - [`triangulation`]: multi-view point triangulation with a chirality check,
//! - [`LandmarkStore`]: per-corner observations keyed by `(marker, corner)`,
//! - [`estimate_scale`]: edge-length ratios reduced to one scale factor.
//!
//! Image-side helpers ([`GrayImageView`], [`Homography`]) are shared with the
//! marker decoder crate.

mod camera;
mod homography;
mod image;
mod landmark;
mod logger;
mod pose;
pub mod ransac;
mod scale;
pub mod triangulation;

pub use camera::{Camera, CameraIntrinsics, Distortion, UndistortConfig};
pub use homography::{homography_from_4pt, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use landmark::{
    Landmark, LandmarkKey, LandmarkPosition, LandmarkStore, MarkerCorner, Observation, ViewId,
    MIN_TRIANGULATION_OBSERVATIONS,
};
pub use pose::{Pose3, Similarity3};
pub use ransac::{EvalResult, Estimator, Evaluation, RansacOptions, RansacResult, Score};
pub use scale::{
    edge_scale_samples, estimate_scale, ScaleError, ScaleEstimate, ScaleSample, ScaleSummary,
    MIN_RELIABLE_SAMPLES,
};
pub use triangulation::{
    triangulate_landmarks, RayObservation, TriangulationConfig, TriangulationError,
    TriangulationSummary, ViewGeometry,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
