//! Marker detection strategies and image loading helpers.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use marker_scale_aruco::{
    ArucoDetector, ArucoDetectorParams, DetectedMarker, Dictionary, DictionaryError,
};
use marker_scale_core::GrayImageView;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::PipelineError;

/// Anything that turns an image into decoded markers.
pub trait MarkerDetector: Send + Sync {
    fn detect(&self, img: &GrayImageView<'_>) -> Vec<DetectedMarker>;
}

impl MarkerDetector for ArucoDetector {
    fn detect(&self, img: &GrayImageView<'_>) -> Vec<DetectedMarker> {
        ArucoDetector::detect(self, img)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    /// One pass over the whole dictionary.
    #[default]
    Markers,
    /// Two 4-marker boards printed on a sample square.
    SampleSquare,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionMethod::Markers => "markers",
            DetectionMethod::SampleSquare => "sample-square",
        })
    }
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markers" => Ok(DetectionMethod::Markers),
            "sample-square" | "sample_square" => Ok(DetectionMethod::SampleSquare),
            other => Err(format!("unknown detection method `{other}`")),
        }
    }
}

/// Markers per board of the sample square.
pub const SAMPLE_SQUARE_BOARD_SIZE: usize = 4;
/// First dictionary id of each board.
pub const SAMPLE_SQUARE_OFFSETS: [u32; 2] = [0, 512];

/// Detects the two marker boards of a sample square independently.
///
/// Each board is matched against its own four-marker sub-dictionary; a board
/// counts only when at least `min_board_markers` of its markers are found.
/// Ids are reported in the full dictionary's numbering.
pub struct SampleSquareDetector {
    boards: Vec<(u32, ArucoDetector)>,
    min_board_markers: usize,
}

impl SampleSquareDetector {
    pub fn new(dict: &Dictionary, params: &ArucoDetectorParams) -> Result<Self, DictionaryError> {
        let boards = SAMPLE_SQUARE_OFFSETS
            .iter()
            .map(|&offset| {
                let sub = dict.subset(offset as usize, SAMPLE_SQUARE_BOARD_SIZE)?;
                Ok((offset, ArucoDetector::new(sub, params.clone())?))
            })
            .collect::<Result<Vec<_>, DictionaryError>>()?;
        Ok(Self {
            boards,
            min_board_markers: 2,
        })
    }

    pub fn with_min_board_markers(mut self, n: usize) -> Self {
        self.min_board_markers = n;
        self
    }
}

impl MarkerDetector for SampleSquareDetector {
    fn detect(&self, img: &GrayImageView<'_>) -> Vec<DetectedMarker> {
        let mut out = Vec::new();
        for (offset, detector) in &self.boards {
            let found = detector.detect(img);
            if found.len() < self.min_board_markers {
                debug!(
                    "board at id {offset}: {} marker(s), need {}",
                    found.len(),
                    self.min_board_markers
                );
                continue;
            }
            out.extend(found.into_iter().map(|mut m| {
                m.id += offset;
                m
            }));
        }
        out
    }
}

/// Build the detector for `method`.
pub fn build_detector(
    method: DetectionMethod,
    dict: Dictionary,
    params: &ArucoDetectorParams,
) -> Result<Box<dyn MarkerDetector>, DictionaryError> {
    Ok(match method {
        DetectionMethod::Markers => Box::new(ArucoDetector::new(dict, params.clone())?),
        DetectionMethod::SampleSquare => Box::new(SampleSquareDetector::new(&dict, params)?),
    })
}

/// Borrow an `image::GrayImage` as the lightweight view the detectors take.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Read any supported image file as 8-bit grayscale.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(path = %path.display())))]
pub fn load_gray(path: &Path) -> Result<::image::GrayImage, PipelineError> {
    ::image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })
}
