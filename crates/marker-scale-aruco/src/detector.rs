//! End-to-end marker detection on a grayscale image.

use std::collections::BTreeMap;

use log::debug;
use marker_scale_core::{GrayImage, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::decode::{CellDecoder, DecodeConfig};
use crate::quad::{find_quads, QuadParams};
use crate::{Dictionary, DictionaryError, Matcher};

/// Detector tuning. Serialized as part of the pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArucoDetectorParams {
    /// Shortest accepted marker side in pixels.
    pub min_marker_px: f64,
    /// Also look for white-on-black markers.
    pub detect_inverted: bool,
    /// Hamming budget; `None` uses the dictionary's correction capability.
    pub max_hamming: Option<u8>,
    /// Half-size of the local-mean threshold window.
    pub threshold_radius: usize,
    /// How far below the local mean a pixel must be to count as dark.
    pub threshold_offset: f32,
    /// Minimum area ratio between the fitted quad and the blob's convex hull.
    pub min_fill: f64,
    /// Snap corners to the sub-pixel edge.
    pub refine_corners: bool,
    pub decode: DecodeConfig,
}

impl Default for ArucoDetectorParams {
    fn default() -> Self {
        Self {
            min_marker_px: 32.0,
            detect_inverted: false,
            max_hamming: None,
            threshold_radius: 7,
            threshold_offset: 7.0,
            min_fill: 0.85,
            refine_corners: true,
            decode: DecodeConfig::default(),
        }
    }
}

/// One decoded marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Image corners in marker order: top-left, top-right, bottom-right,
    /// bottom-left. Pixel centres are at integer coordinates.
    pub corners: [Point2<f32>; 4],
    pub hamming: u8,
    /// Border quality times Hamming penalty, in `[0, 1]`.
    pub score: f32,
    /// Seen with reversed polarity.
    pub inverted: bool,
}

#[derive(Clone, Debug)]
pub struct ArucoDetector {
    matcher: Matcher,
    params: ArucoDetectorParams,
}

impl ArucoDetector {
    pub fn new(dict: Dictionary, params: ArucoDetectorParams) -> Result<Self, DictionaryError> {
        let max_hamming = params.max_hamming.unwrap_or(dict.max_correction_bits);
        Ok(Self {
            matcher: Matcher::new(dict, max_hamming)?,
            params,
        })
    }

    pub fn dictionary(&self) -> &Dictionary {
        self.matcher.dictionary()
    }

    pub fn params(&self) -> &ArucoDetectorParams {
        &self.params
    }

    /// Detect markers; at most one detection per id, sorted by id.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> Vec<DetectedMarker> {
        let p = &self.params;
        let quad_params = QuadParams {
            threshold_radius: p.threshold_radius.max(1),
            threshold_offset: p.threshold_offset,
            min_side_px: p.min_marker_px.max(4.0),
            min_fill: p.min_fill,
            refine_edges: p.refine_corners,
        };

        // (quad, found on the inverted image)
        let mut quads: Vec<_> = find_quads(img, &quad_params)
            .into_iter()
            .map(|q| (q, false))
            .collect();
        if p.detect_inverted {
            let owned = GrayImage {
                width: img.width,
                height: img.height,
                data: img.data.to_vec(),
            };
            quads.extend(
                find_quads(&owned.inverted().view(), &quad_params)
                    .into_iter()
                    .map(|q| (q, true)),
            );
        }

        let Some(mut decoder) = CellDecoder::new(&p.decode, self.dictionary().marker_size) else {
            return Vec::new();
        };

        let mut best: BTreeMap<u32, DetectedMarker> = BTreeMap::new();
        for (quad, from_inverted) in &quads {
            let Some(dec) = decoder.decode_quad(img, quad, &self.matcher) else {
                continue;
            };
            // decoded polarity must match the pass that found the quad
            if dec.observation.inverted != *from_inverted {
                continue;
            }
            let rot = dec.matched.rotation as usize;
            let det = DetectedMarker {
                id: dec.matched.id,
                corners: std::array::from_fn(|k| quad[(k + rot) % 4].cast::<f32>()),
                hamming: dec.matched.hamming,
                score: dec.score,
                inverted: dec.observation.inverted,
            };
            match best.get(&det.id) {
                Some(prev) if prev.score >= det.score => {}
                _ => {
                    best.insert(det.id, det);
                }
            }
        }

        debug!(
            "{} candidate quad(s), {} marker(s) decoded with `{}`",
            quads.len(),
            best.len(),
            self.dictionary().name
        );
        best.into_values().collect()
    }
}
