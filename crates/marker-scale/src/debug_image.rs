//! Detection overlays written next to the input images for inspection.

use std::fs;
use std::path::{Path, PathBuf};

use ::image::{Rgb, RgbImage};
use marker_scale_aruco::DetectedMarker;
use marker_scale_core::GrayImageView;
use nalgebra::Point2;

use crate::PipelineError;

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const FIRST_CORNER: Rgb<u8> = Rgb([255, 0, 0]);

/// Where the overlay for `image_path` (scene-relative) goes under `dir`.
pub fn debug_image_path(dir: &Path, image_path: &str) -> PathBuf {
    dir.join(image_path).with_extension("jpg")
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(img: &mut RgbImage, a: Point2<f32>, b: Point2<f32>, color: Rgb<u8>) {
    let d = b - a;
    let steps = d.x.abs().max(d.y.abs()).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let p = a + d * (i as f32 / steps as f32);
        let (x, y) = (p.x.round() as i64, p.y.round() as i64);
        put(img, x, y, color);
        put(img, x + 1, y, color);
        put(img, x, y + 1, color);
    }
}

/// Grayscale image in colour with marker outlines and the first corner
/// of each marker highlighted.
pub fn render_overlay(img: &GrayImageView<'_>, markers: &[DetectedMarker]) -> RgbImage {
    let mut out = RgbImage::from_fn(img.width as u32, img.height as u32, |x, y| {
        let v = img.data[y as usize * img.width + x as usize];
        Rgb([v, v, v])
    });
    for m in markers {
        for k in 0..4 {
            draw_line(&mut out, m.corners[k], m.corners[(k + 1) % 4], OUTLINE);
        }
        let c = m.corners[0];
        let (cx, cy) = (c.x.round() as i64, c.y.round() as i64);
        for dy in -3..=3 {
            for dx in -3..=3 {
                put(&mut out, cx + dx, cy + dy, FIRST_CORNER);
            }
        }
    }
    out
}

/// Write the overlay as JPEG, creating parent directories.
pub fn save_overlay(
    path: &Path,
    img: &GrayImageView<'_>,
    markers: &[DetectedMarker],
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    render_overlay(img, markers)
        .save(path)
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })
}
