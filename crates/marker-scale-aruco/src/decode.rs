//! Marker bit reading from an image quad.

use marker_scale_core::{homography_from_4pt, GrayImageView, Homography};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::threshold::otsu_threshold_from_samples;
use crate::{Match, Matcher};

/// Decoder configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Marker border width in cells (OpenCV typically uses 1).
    pub border_bits: usize,
    /// Require border-black ratio >= this.
    pub min_border_score: f32,
    /// Side of one cell in the canonical (rectified) marker frame.
    pub canonical_cell_px: f32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            border_bits: 1,
            min_border_score: 0.85,
            canonical_cell_px: 8.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MarkerObservation {
    /// Observed inner bits (row-major, black=1).
    pub code: u64,
    pub border_score: f32,
    /// Whether the decoder inverted polarity to maximize `border_score`.
    pub inverted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct QuadDecode {
    pub matched: Match,
    pub observation: MarkerObservation,
    pub score: f32,
}

const MIN_SIDE_PX: f32 = 12.0;

struct SampleGrid {
    cells: usize,
    points: Vec<Point2<f32>>, // row-major: cy * cells + cx
    threshold_points: Vec<Point2<f32>>,
}

impl SampleGrid {
    fn new(cfg: &DecodeConfig, bits: usize) -> Option<Self> {
        if bits * bits > 64 {
            return None;
        }
        let cells = bits + 2 * cfg.border_bits;
        let side = cells as f32 * cfg.canonical_cell_px;
        if cells == 0 || side < MIN_SIDE_PX {
            return None;
        }

        let step = cfg.canonical_cell_px;
        let mut points = Vec::with_capacity(cells * cells);
        for cy in 0..cells {
            for cx in 0..cells {
                points.push(Point2::new(
                    (cx as f32 + 0.5) * step,
                    (cy as f32 + 0.5) * step,
                ));
            }
        }

        Some(Self {
            cells,
            points,
            threshold_points: build_threshold_points(side, cells),
        })
    }

    fn side(&self, cfg: &DecodeConfig) -> f32 {
        self.cells as f32 * cfg.canonical_cell_px
    }
}

/// Reusable per-thread decoder for one dictionary bit size.
pub(crate) struct CellDecoder<'a> {
    cfg: &'a DecodeConfig,
    bits: usize,
    grid: SampleGrid,
    scratch_bits: Vec<u8>,
    scratch_thr: Vec<u8>,
}

impl<'a> CellDecoder<'a> {
    pub fn new(cfg: &'a DecodeConfig, bits: usize) -> Option<Self> {
        let grid = SampleGrid::new(cfg, bits)?;
        let scratch_bits = Vec::with_capacity(grid.points.len());
        let scratch_thr = Vec::with_capacity(grid.threshold_points.len());
        Some(Self {
            cfg,
            bits,
            grid,
            scratch_bits,
            scratch_thr,
        })
    }

    /// Read and match the marker bounded by `corners` (clockwise on screen).
    pub fn decode_quad(
        &mut self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f64>; 4],
        matcher: &Matcher,
    ) -> Option<QuadDecode> {
        let s = self.grid.side(self.cfg);
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ];
        let dst = corners.map(|p| Point2::new(p.x as f32, p.y as f32));
        let h = homography_from_4pt(&rect, &dst)?;
        let observation = self.decode_warped(img, &h)?;

        let matched = matcher.match_code(observation.code)?;
        let bits = matcher.dictionary().bit_count().max(1) as f32;
        let ham_pen = 1.0 - (matched.hamming as f32 / bits);
        let score = (observation.border_score * ham_pen).clamp(0.0, 1.0);
        Some(QuadDecode {
            matched,
            observation,
            score,
        })
    }

    fn decode_warped(
        &mut self,
        img: &GrayImageView<'_>,
        h: &Homography,
    ) -> Option<MarkerObservation> {
        self.scratch_bits.clear();
        for p in &self.grid.points {
            let q = h.apply(*p);
            let v = sample_mean_3x3(img, q.x, q.y)?;
            self.scratch_bits.push(v);
        }

        self.scratch_thr.clear();
        for p in &self.grid.threshold_points {
            let q = h.apply(*p);
            if let Some(v) = sample_mean_3x3(img, q.x, q.y) {
                self.scratch_thr.push(v);
            }
        }

        decode_samples(
            &self.scratch_bits,
            &self.scratch_thr,
            self.grid.cells,
            self.bits,
            self.cfg.border_bits,
            self.cfg.min_border_score,
        )
    }
}

fn decode_samples(
    samples: &[u8],
    thr_samples: &[u8],
    cells: usize,
    bits: usize,
    border: usize,
    min_border_score: f32,
) -> Option<MarkerObservation> {
    if samples.len() != cells * cells {
        return None;
    }

    let thr = if thr_samples.is_empty() {
        otsu_threshold_from_samples(samples)
    } else {
        otsu_threshold_from_samples(thr_samples)
    };

    let mut best: Option<MarkerObservation> = None;

    for inverted in [false, true] {
        let mut border_ok = 0u32;
        let mut border_total = 0u32;
        let mut code: u64 = 0;
        let use_border = border > 0;

        for cy in 0..cells {
            for cx in 0..cells {
                let is_black = (samples[cy * cells + cx] < thr) != inverted;

                let is_border = use_border
                    && (cx < border || cy < border || cx + border >= cells || cy + border >= cells);
                if is_border {
                    border_total += 1;
                    if is_black {
                        border_ok += 1;
                    }
                } else if is_black {
                    code |= 1u64 << ((cy - border) * bits + (cx - border));
                }
            }
        }

        let border_score = if use_border {
            border_ok as f32 / border_total.max(1) as f32
        } else {
            1.0
        };
        if border_score < min_border_score {
            continue;
        }

        if best.is_none_or(|b| border_score > b.border_score) {
            best = Some(MarkerObservation {
                code,
                border_score,
                inverted,
            });
        }
    }

    best
}

fn build_threshold_points(side: f32, cells: usize) -> Vec<Point2<f32>> {
    const THRESH_SUBDIV: usize = 3;
    let grid = cells * THRESH_SUBDIV;
    let step = side / grid as f32;
    let mut points = Vec::with_capacity(grid * grid);
    for ty in 0..grid {
        for tx in 0..grid {
            points.push(Point2::new(
                (tx as f32 + 0.5) * step,
                (ty as f32 + 0.5) * step,
            ));
        }
    }
    points
}

/// Mean of the 3x3 neighbourhood of the nearest pixel; `None` near the border.
fn sample_mean_3x3(img: &GrayImageView<'_>, x: f32, y: f32) -> Option<u8> {
    let ix = x.round() as i32;
    let iy = y.round() as i32;
    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += img.get(ix + dx, iy + dy)? as u32;
        }
    }
    Some((sum / 9) as u8)
}
