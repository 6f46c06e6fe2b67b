//! Candidate quadrilateral extraction.
//!
//! Dark blobs from a local-mean threshold are traced as 8-connected
//! components. Each component's outline is reduced to a convex hull, then to
//! four corners, which are finally snapped to the sub-pixel intensity edge.
//!
//! Pixel centres sit at integer coordinates.

use marker_scale_core::{sample_bilinear, GrayImageView};
use nalgebra::{Point2, Vector2};

use crate::threshold::adaptive_dark_mask;

#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadParams {
    pub threshold_radius: usize,
    pub threshold_offset: f32,
    pub min_side_px: f64,
    pub min_fill: f64,
    pub refine_edges: bool,
}

/// Corners in image order with a positive shoelace sum (clockwise on screen).
pub(crate) type Quad = [Point2<f64>; 4];

const MAX_CORNER_SHIFT_PX: f64 = 3.0;
const EDGE_PROFILE_HALF_PX: f64 = 2.5;
const EDGE_PROFILE_STEP_PX: f64 = 0.25;
const MIN_EDGE_CONTRAST: f32 = 20.0;

pub(crate) fn find_quads(img: &GrayImageView<'_>, params: &QuadParams) -> Vec<Quad> {
    let (w, h) = (img.width, img.height);
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let mask = adaptive_dark_mask(img, params.threshold_radius, params.threshold_offset);
    let mut labels = vec![0u32; w * h];
    let mut next_label = 0u32;
    let mut stack = Vec::new();
    let mut quads = Vec::new();

    for start in 0..w * h {
        if !mask[start] || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        let label = next_label;
        let pixels = flood_fill(&mask, &mut labels, w, h, start, label, &mut stack);

        let (mut x0, mut y0, mut x1, mut y1) = (w, h, 0usize, 0usize);
        for &i in &pixels {
            let (x, y) = (i % w, i / w);
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        if x0 == 0 || y0 == 0 || x1 + 1 == w || y1 + 1 == h {
            continue;
        }
        if ((x1 - x0).max(y1 - y0) as f64) < params.min_side_px {
            continue;
        }

        let boundary: Vec<Point2<f64>> = pixels
            .iter()
            .filter(|&&i| {
                labels[i - 1] != label
                    || labels[i + 1] != label
                    || labels[i - w] != label
                    || labels[i + w] != label
            })
            .map(|&i| Point2::new((i % w) as f64, (i / w) as f64))
            .collect();

        let Some(quad) = quad_from_points(&boundary, params) else {
            continue;
        };
        let quad = if params.refine_edges {
            refine_quad(img, &quad).unwrap_or(quad)
        } else {
            quad
        };
        quads.push(quad);
    }

    quads
}

fn flood_fill(
    mask: &[bool],
    labels: &mut [u32],
    w: usize,
    h: usize,
    start: usize,
    label: u32,
    stack: &mut Vec<usize>,
) -> Vec<usize> {
    let mut pixels = Vec::new();
    stack.clear();
    stack.push(start);
    labels[start] = label;
    while let Some(i) = stack.pop() {
        pixels.push(i);
        let (x, y) = ((i % w) as i64, (i / w) as i64);
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if mask[j] && labels[j] == 0 {
                    labels[j] = label;
                    stack.push(j);
                }
            }
        }
    }
    pixels
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain; collinear points are dropped.
pub(crate) fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(2 * pts.len());
    for p in &pts {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    let lower = hull.len() + 1;
    for p in pts.iter().rev().skip(1) {
        while hull.len() >= lower
            && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

fn polygon_area(poly: &[Point2<f64>]) -> f64 {
    shoelace(poly).abs() * 0.5
}

fn shoelace(poly: &[Point2<f64>]) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| {
            let (a, b) = (poly[i], poly[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Diameter pair of the hull plus the farthest vertex on each side of it.
fn quad_from_points(points: &[Point2<f64>], params: &QuadParams) -> Option<Quad> {
    let hull = convex_hull(points);
    if hull.len() < 4 {
        return None;
    }

    let mut best = (0, 0, 0.0f64);
    for i in 0..hull.len() {
        for j in i + 1..hull.len() {
            let d = (hull[j] - hull[i]).norm_squared();
            if d > best.2 {
                best = (i, j, d);
            }
        }
    }
    let (a, c) = (hull[best.0], hull[best.1]);

    let (mut left, mut right) = ((0.0f64, a), (0.0f64, a));
    for p in &hull {
        let s = cross(&a, &c, p);
        if s > left.0 {
            left = (s, *p);
        }
        if s < right.0 {
            right = (s, *p);
        }
    }
    if left.0 <= f64::EPSILON || right.0 >= -f64::EPSILON {
        return None;
    }

    let mut quad = [a, left.1, c, right.1];
    if shoelace(&quad) < 0.0 {
        quad.swap(1, 3);
    }
    if !quad_is_plausible(&quad, &hull, params) {
        return None;
    }
    Some(quad)
}

fn quad_is_plausible(quad: &Quad, hull: &[Point2<f64>], params: &QuadParams) -> bool {
    for i in 0..4 {
        let (p, q, r) = (quad[i], quad[(i + 1) % 4], quad[(i + 2) % 4]);
        if (q - p).norm() < params.min_side_px || cross(&p, &q, &r) <= 0.0 {
            return false;
        }
    }
    let hull_area = polygon_area(hull);
    hull_area > 0.0 && polygon_area(quad) / hull_area >= params.min_fill
}

/// Total-least-squares line through `points` as (centroid, unit direction).
fn fit_line(points: &[Point2<f64>]) -> Option<(Point2<f64>, Vector2<f64>)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let c = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p.coords - c;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some((Point2::from(c), Vector2::new(theta.cos(), theta.sin())))
}

fn intersect(
    (p, u): (Point2<f64>, Vector2<f64>),
    (q, v): (Point2<f64>, Vector2<f64>),
) -> Option<Point2<f64>> {
    let det = u.x * v.y - u.y * v.x;
    if det.abs() < 1e-9 {
        return None;
    }
    let d = q - p;
    let t = (d.x * v.y - d.y * v.x) / det;
    Some(p + u * t)
}

/// Dark-to-bright crossing along `normal`, relative to `p`.
fn edge_offset(img: &GrayImageView<'_>, p: Point2<f64>, normal: Vector2<f64>) -> Option<f64> {
    let steps = (2.0 * EDGE_PROFILE_HALF_PX / EDGE_PROFILE_STEP_PX) as usize;
    let profile: Vec<(f64, f32)> = (0..=steps)
        .map(|k| {
            let s = -EDGE_PROFILE_HALF_PX + k as f64 * EDGE_PROFILE_STEP_PX;
            let q = p + normal * s;
            (s, sample_bilinear(img, q.x as f32, q.y as f32))
        })
        .collect();

    let (lo, hi) = profile
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &(_, v)| (lo.min(v), hi.max(v)));
    if hi - lo < MIN_EDGE_CONTRAST {
        return None;
    }
    let mid = 0.5 * (lo + hi);
    profile.windows(2).find_map(|win| {
        let ((s0, v0), (s1, v1)) = (win[0], win[1]);
        (v0 < mid && v1 >= mid).then(|| s0 + (s1 - s0) * f64::from((mid - v0) / (v1 - v0)))
    })
}

/// Re-fit every side to sub-pixel edge samples and intersect neighbours.
fn refine_quad(img: &GrayImageView<'_>, quad: &Quad) -> Option<Quad> {
    let mut lines = Vec::with_capacity(4);
    for i in 0..4 {
        let (a, b) = (quad[i], quad[(i + 1) % 4]);
        let len = (b - a).norm();
        let dir = (b - a) / len;
        // clockwise on screen, so the outside is to the left of travel
        let normal = Vector2::new(dir.y, -dir.x);

        let n = ((len / 2.0) as usize).max(8);
        let edge_points: Vec<Point2<f64>> = (0..n)
            .filter_map(|k| {
                let t = 0.15 + 0.7 * (k as f64 + 0.5) / n as f64;
                let p = a + (b - a) * t;
                edge_offset(img, p, normal).map(|s| p + normal * s)
            })
            .collect();
        if edge_points.len() < n / 2 {
            return None;
        }
        lines.push(fit_line(&edge_points)?);
    }

    let mut refined = *quad;
    for (i, corner) in refined.iter_mut().enumerate() {
        let p = intersect(lines[(i + 3) % 4], lines[i])?;
        if (p - quad[i]).norm() > MAX_CORNER_SHIFT_PX {
            return None;
        }
        *corner = p;
    }
    Some(refined)
}
