//! Remove lens distortion from a view image before marker detection.
//!
//! The output keeps the input's size and intrinsic matrix, so the ideal
//! pinhole model of the same camera describes the remapped image.

use log::warn;
use marker_scale_core::{sample_bilinear_u8, CameraIntrinsics, GrayImage, GrayImageView};
use nalgebra::Point2;

use crate::scene::Intrinsic;

/// Resample `img` so that straight lines in the scene are straight in the
/// result. Pixels whose source falls outside the image become black.
pub fn undistort_image(img: &GrayImageView<'_>, camera: &CameraIntrinsics) -> GrayImage {
    GrayImage::from_fn(img.width, img.height, |x, y| {
        let src = camera.distort_pixel(&Point2::new(x as f64, y as f64));
        if !(src.x.is_finite() && src.y.is_finite()) {
            return 0;
        }
        sample_bilinear_u8(img, src.x as f32, src.y as f32)
    })
}

/// Undistort according to a scene intrinsic.
///
/// Returns `None` when the image can be used as is: either the model has no
/// distortion or the model is not supported (with a warning).
pub fn undistort_for(img: &GrayImageView<'_>, intrinsic: &Intrinsic) -> Option<GrayImage> {
    match intrinsic {
        Intrinsic::Pinhole(cam) if cam.has_distortion() => Some(undistort_image(img, cam)),
        Intrinsic::Pinhole(_) => None,
        Intrinsic::Unsupported { kind } => {
            warn!("cannot undistort images of camera type `{kind}`; using the image as is");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_scale_core::Distortion;

    fn camera(distortion: Distortion) -> CameraIntrinsics {
        CameraIntrinsics::pinhole(64, 48, 60.0, Point2::new(32.0, 24.0)).with_distortion(distortion)
    }

    #[test]
    fn distortion_free_models_are_left_alone() {
        let img = GrayImage::filled(64, 48, 90);
        assert!(undistort_for(&img.view(), &Intrinsic::Pinhole(camera(Distortion::None))).is_none());
        let unsupported = Intrinsic::Unsupported {
            kind: "spherical".into(),
        };
        assert!(undistort_for(&img.view(), &unsupported).is_none());
    }

    #[test]
    fn remap_moves_content_towards_distorted_position() {
        let cam = camera(Distortion::Radial1 { k1: -0.2 });
        // a bright pixel where the ideal point (56, 24) appears after distortion
        let d = cam.distort_pixel(&Point2::new(56.0, 24.0));
        let (dx, dy) = (d.x.round() as usize, d.y.round() as usize);
        let img = GrayImage::from_fn(64, 48, |x, y| {
            if x.abs_diff(dx) <= 1 && y.abs_diff(dy) <= 1 {
                250
            } else {
                10
            }
        });
        let out = undistort_for(&img.view(), &Intrinsic::Pinhole(cam)).expect("remapped");
        assert_eq!(out.width, 64);
        assert!(out.view().get(56, 24).expect("inside") > 200);
        // principal point is a fixed point of the mapping
        assert_eq!(out.view().get(32, 24), Some(10));
    }
}
