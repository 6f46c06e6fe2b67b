//! Reduce triangulated marker edges to one metric scale factor.

use log::warn;
use serde::Serialize;

use crate::{LandmarkKey, LandmarkStore, MarkerCorner};

/// Below this many samples the mean is considered noise-sensitive.
pub const MIN_RELIABLE_SAMPLES: usize = 10;

/// One marker edge measured in the reconstruction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScaleSample {
    pub marker: u32,
    pub from: MarkerCorner,
    pub to: MarkerCorner,
    /// Edge length in reconstruction units.
    pub observed: f64,
    /// `expected / observed`.
    pub ratio: f64,
}

/// Descriptive statistics of the sample ratios.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScaleSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl ScaleSummary {
    pub fn from_ratios(ratios: &[f64]) -> Option<Self> {
        if ratios.is_empty() {
            return None;
        }
        let n = ratios.len() as f64;
        let mean = ratios.iter().sum::<f64>() / n;
        let var = ratios.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;

        let mut sorted = ratios.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            0.5 * (sorted[mid - 1] + sorted[mid])
        } else {
            sorted[mid]
        };

        Some(Self {
            count: ratios.len(),
            mean,
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            std_dev: var.sqrt(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScaleEstimate {
    /// Factor that converts reconstruction units to metric units.
    pub scale: f64,
    pub samples: Vec<ScaleSample>,
    pub summary: ScaleSummary,
}

impl ScaleEstimate {
    pub fn ratios(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.ratio).collect()
    }

    pub fn is_noise_sensitive(&self) -> bool {
        self.samples.len() < MIN_RELIABLE_SAMPLES
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ScaleError {
    #[error("expected marker size must be positive and finite (got {0})")]
    InvalidMarkerSize(f64),
    #[error("only {triangulated} landmark(s) triangulated, need at least 2")]
    TooFewLandmarks { triangulated: usize },
    #[error("no marker edge has both corners triangulated")]
    NoScaleSamples,
}

/// Ratios for every marker edge whose two corners are triangulated.
///
/// Edges run (0,1), (1,2), (2,3), (3,0). Edges with a pending corner are
/// skipped silently; zero-length edges are skipped with a warning.
pub fn edge_scale_samples(store: &LandmarkStore, expected: f64) -> Vec<ScaleSample> {
    let mut out = Vec::new();
    for marker in store.marker_ids() {
        for from in MarkerCorner::ALL {
            let to = from.next();
            let (Some(a), Some(b)) = (
                store.position(&LandmarkKey::new(marker, from)),
                store.position(&LandmarkKey::new(marker, to)),
            ) else {
                continue;
            };
            let observed = (b - a).norm();
            if !observed.is_finite() || observed <= f64::EPSILON {
                warn!(
                    "marker {marker}: edge {}-{} has degenerate length {observed}",
                    from.index(),
                    to.index()
                );
                continue;
            }
            out.push(ScaleSample {
                marker,
                from,
                to,
                observed,
                ratio: expected / observed,
            });
        }
    }
    out
}

/// Mean edge ratio over all measurable marker edges.
pub fn estimate_scale(store: &LandmarkStore, expected: f64) -> Result<ScaleEstimate, ScaleError> {
    if !(expected.is_finite() && expected > 0.0) {
        return Err(ScaleError::InvalidMarkerSize(expected));
    }
    let triangulated = store.triangulated_count();
    if triangulated < 2 {
        return Err(ScaleError::TooFewLandmarks { triangulated });
    }

    let samples = edge_scale_samples(store, expected);
    let ratios: Vec<f64> = samples.iter().map(|s| s.ratio).collect();
    let summary = ScaleSummary::from_ratios(&ratios).ok_or(ScaleError::NoScaleSamples)?;

    if samples.len() < MIN_RELIABLE_SAMPLES {
        warn!(
            "only {} scale sample(s); the estimate is sensitive to noise (recommended: {})",
            samples.len(),
            MIN_RELIABLE_SAMPLES
        );
    }

    Ok(ScaleEstimate {
        scale: summary.mean,
        samples,
        summary,
    })
}
