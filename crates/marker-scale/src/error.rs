use std::path::PathBuf;

use marker_scale_aruco::DictionaryError;
use marker_scale_core::ScaleError;

use crate::filter::FilterError;
use crate::mesh::MeshError;
use crate::scene::SceneError;

/// Everything that can stop a scaling run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no views selected")]
    NoViews,

    #[error("no landmark was observed in at least {min} views")]
    NoObservableLandmarks { min: usize },

    #[error("not enough landmarks to estimate scale ({triangulated} triangulated, need 2)")]
    TooFewTriangulated { triangulated: usize },

    #[error("no landmark distances calculated")]
    NoScaleSamples,

    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write JSON to {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Filter(_) | Self::Dictionary(_) => 2,
            Self::NoViews => 3,
            Self::TooFewTriangulated { .. } => 4,
            Self::NoScaleSamples => 5,
            Self::NoObservableLandmarks { .. } => 6,
            Self::Image { .. } | Self::Io { .. } | Self::Json { .. } => 7,
            Self::Scene(e) => e.exit_code(),
            Self::Mesh(e) => e.exit_code(),
        }
    }
}

impl From<ScaleError> for PipelineError {
    fn from(err: ScaleError) -> Self {
        match err {
            ScaleError::InvalidMarkerSize(size) => {
                Self::Config(format!("marker size must be positive (got {size})"))
            }
            ScaleError::TooFewLandmarks { triangulated } => {
                Self::TooFewTriangulated { triangulated }
            }
            ScaleError::NoScaleSamples => Self::NoScaleSamples,
        }
    }
}
