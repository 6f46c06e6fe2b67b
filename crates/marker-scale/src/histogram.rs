//! SVG histogram of the per-edge scale ratios.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::PipelineError;

pub const HISTOGRAM_BINS: usize = 50;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 50.0;
const TICKS: usize = 5;

/// Bin counts over `[min, max]`; the last bin is closed.
pub fn bin_counts(values: &[f64], bins: usize, min: f64, max: f64) -> Vec<usize> {
    let bins = bins.max(1);
    let mut counts = vec![0; bins];
    let span = max - min;
    for &v in values {
        let idx = if span > 0.0 {
            (((v - min) / span) * bins as f64) as usize
        } else {
            0
        };
        counts[idx.min(bins - 1)] += 1;
    }
    counts
}

/// Render the histogram with axes, ticks and a red line at the mean.
pub fn histogram_svg(values: &[f64], mean: f64) -> String {
    let (mut lo, mut hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        lo = mean - 0.5;
        hi = mean + 0.5;
    }
    if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
        let pad = (hi.abs() * 0.01).max(1e-6);
        lo -= pad;
        hi += pad;
    }

    let counts = bin_counts(values, HISTOGRAM_BINS, lo, hi);
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1);

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let x_of = |v: f64| MARGIN_LEFT + (v - lo) / (hi - lo) * plot_w;
    let y_of = |c: f64| HEIGHT - MARGIN_BOTTOM - c / max_count as f64 * plot_h;
    let base = HEIGHT - MARGIN_BOTTOM;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}">
  <style>
    .label {{ font-family: Arial, sans-serif; font-size: 12px; fill: #333; }}
    .mean {{ font-family: Arial, sans-serif; font-size: 13px; fill: red; }}
  </style>
  <rect width="100%" height="100%" fill="white"/>
"#
    );

    let bin_w = plot_w / counts.len() as f64;
    for (i, &c) in counts.iter().enumerate().filter(|&(_, &c)| c > 0) {
        let top = y_of(c as f64);
        let _ = writeln!(
            svg,
            r##"  <rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="#4c72b0" stroke="white" stroke-width="0.5"/>"##,
            MARGIN_LEFT + i as f64 * bin_w,
            top,
            bin_w,
            base - top
        );
    }

    let _ = writeln!(
        svg,
        r#"  <line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{base}" stroke="black" stroke-width="1"/>"#
    );
    let _ = writeln!(
        svg,
        r#"  <line x1="{MARGIN_LEFT}" y1="{base}" x2="{}" y2="{base}" stroke="black" stroke-width="1"/>"#,
        WIDTH - MARGIN_RIGHT
    );

    for i in 0..=TICKS {
        let t = i as f64 / TICKS as f64;
        let x = MARGIN_LEFT + t * plot_w;
        let _ = writeln!(
            svg,
            r#"  <line x1="{x:.2}" y1="{base}" x2="{x:.2}" y2="{}" stroke="black"/>
  <text x="{x:.2}" y="{}" class="label" text-anchor="middle">{:.4}</text>"#,
            base + 5.0,
            base + 20.0,
            lo + t * (hi - lo)
        );
        let y = base - t * plot_h;
        let _ = writeln!(
            svg,
            r#"  <line x1="{}" y1="{y:.2}" x2="{MARGIN_LEFT}" y2="{y:.2}" stroke="black"/>
  <text x="{}" y="{:.2}" class="label" text-anchor="end">{:.0}</text>"#,
            MARGIN_LEFT - 5.0,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            t * max_count as f64
        );
    }

    let _ = writeln!(
        svg,
        r#"  <text x="{:.2}" y="{}" class="label" text-anchor="middle">scale ratio</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        HEIGHT - 10.0
    );

    let mx = x_of(mean.clamp(lo, hi));
    let _ = writeln!(
        svg,
        r#"  <line x1="{mx:.2}" y1="{MARGIN_TOP}" x2="{mx:.2}" y2="{base}" stroke="red" stroke-width="2"/>
  <text x="{mx:.2}" y="{}" class="mean" text-anchor="middle">mean = {mean:.6}</text>"#,
        MARGIN_TOP - 8.0
    );

    svg.push_str("</svg>\n");
    svg
}

pub fn save_histogram(path: &Path, values: &[f64], mean: f64) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    fs::write(path, histogram_svg(values, mean)).map_err(|e| PipelineError::io(path, e))
}
