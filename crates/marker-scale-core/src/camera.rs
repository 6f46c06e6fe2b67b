//! Pinhole-family camera models.
//!
//! All residuals produced here are expressed in **pixels**; this is the unit
//! of the triangulation inlier threshold.

use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Minimal camera capability needed for triangulation.
pub trait Camera: Send + Sync {
    /// Unit bearing ray in the camera frame for an observed (distorted) pixel.
    fn bearing(&self, pixel: &Point2<f64>) -> Option<Vector3<f64>>;

    /// Observed pixel minus the projection of a camera-frame point, in pixels.
    fn residual(&self, point_cam: &Point3<f64>, pixel: &Point2<f64>) -> Vector2<f64>;
}

/// Lens distortion models of the pinhole family.
///
/// Coefficients act on normalized image coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Distortion {
    #[default]
    None,
    Radial1 {
        k1: f64,
    },
    Radial3 {
        k1: f64,
        k2: f64,
        k3: f64,
    },
    /// Radial k1..k3 plus tangential t1, t2.
    Brown {
        k1: f64,
        k2: f64,
        k3: f64,
        t1: f64,
        t2: f64,
    },
    /// Equidistant fisheye, `theta_d = theta (1 + k1 theta^2 + ... + k4 theta^8)`.
    Fisheye {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
    },
}

impl Distortion {
    pub fn is_identity(&self) -> bool {
        match *self {
            Distortion::None => true,
            Distortion::Radial1 { k1 } => k1 == 0.0,
            Distortion::Radial3 { k1, k2, k3 } => k1 == 0.0 && k2 == 0.0 && k3 == 0.0,
            Distortion::Brown { k1, k2, k3, t1, t2 } => {
                k1 == 0.0 && k2 == 0.0 && k3 == 0.0 && t1 == 0.0 && t2 == 0.0
            }
            // theta = atan(r) differs from r even with zero coefficients
            Distortion::Fisheye { .. } => false,
        }
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort(&self, p: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        match *self {
            Distortion::None => p,
            Distortion::Radial1 { k1 } => p * (1.0 + k1 * r2),
            Distortion::Radial3 { k1, k2, k3 } => p * radial_factor(k1, k2, k3, r2),
            Distortion::Brown { k1, k2, k3, t1, t2 } => {
                let radial = radial_factor(k1, k2, k3, r2);
                let (tx, ty) = tangential(t1, t2, x, y, r2);
                Vector2::new(x * radial + tx, y * radial + ty)
            }
            Distortion::Fisheye { k1, k2, k3, k4 } => {
                let r = r2.sqrt();
                if r < 1e-12 {
                    return p;
                }
                let theta = r.atan();
                let theta_d = fisheye_theta_d(k1, k2, k3, k4, theta);
                p * (theta_d / r)
            }
        }
    }

    /// Invert [`Distortion::distort`] iteratively.
    pub fn undistort(&self, p: Vector2<f64>, cfg: UndistortConfig) -> Option<Vector2<f64>> {
        match *self {
            Distortion::None => Some(p),
            Distortion::Fisheye { k1, k2, k3, k4 } => {
                let rd = p.norm();
                if rd < 1e-12 {
                    return Some(p);
                }
                // Newton on theta_d(theta) = rd
                let mut theta = rd;
                for _ in 0..cfg.max_iters.max(1) {
                    let t2 = theta * theta;
                    let f = fisheye_theta_d(k1, k2, k3, k4, theta) - rd;
                    let df = 1.0
                        + 3.0 * k1 * t2
                        + 5.0 * k2 * t2 * t2
                        + 7.0 * k3 * t2 * t2 * t2
                        + 9.0 * k4 * t2 * t2 * t2 * t2;
                    if !df.is_finite() || df.abs() < 1e-12 {
                        return None;
                    }
                    let step = f / df;
                    theta -= step;
                    if step.abs() <= cfg.eps {
                        break;
                    }
                }
                if !(0.0..std::f64::consts::FRAC_PI_2).contains(&theta) {
                    return None;
                }
                let out = p * (theta.tan() / rd);
                finite2(out)
            }
            _ => {
                let mut q = p;
                for _ in 0..cfg.max_iters.max(1) {
                    // q <- q + (p - distort(q)), a fixed point of distort(q) = p
                    let err = p - self.distort(q);
                    q += err;
                    if !q.x.is_finite() || !q.y.is_finite() {
                        return None;
                    }
                    if err.norm() <= cfg.eps {
                        break;
                    }
                }
                finite2(q)
            }
        }
    }
}

#[inline]
fn radial_factor(k1: f64, k2: f64, k3: f64, r2: f64) -> f64 {
    1.0 + r2 * (k1 + r2 * (k2 + r2 * k3))
}

#[inline]
fn tangential(t1: f64, t2: f64, x: f64, y: f64, r2: f64) -> (f64, f64) {
    (
        2.0 * t1 * x * y + t2 * (r2 + 2.0 * x * x),
        t1 * (r2 + 2.0 * y * y) + 2.0 * t2 * x * y,
    )
}

#[inline]
fn fisheye_theta_d(k1: f64, k2: f64, k3: f64, k4: f64, theta: f64) -> f64 {
    let t2 = theta * theta;
    theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))))
}

fn finite2(v: Vector2<f64>) -> Option<Vector2<f64>> {
    (v.x.is_finite() && v.y.is_finite()).then_some(v)
}

/// Distortion inversion settings used by iterative undistortion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UndistortConfig {
    /// Maximum iterations.
    pub max_iters: usize,
    /// Stop when the update norm is below this threshold.
    pub eps: f64,
}

impl Default for UndistortConfig {
    fn default() -> Self {
        Self {
            max_iters: 30,
            eps: 1e-12,
        }
    }
}

/// Pinhole intrinsics with a single focal length, as stored by SfM scenes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    /// Focal length in pixels.
    pub focal: f64,
    /// Principal point in pixels.
    pub principal_point: Point2<f64>,
    #[serde(default)]
    pub distortion: Distortion,
}

impl CameraIntrinsics {
    pub fn pinhole(width: u32, height: u32, focal: f64, principal_point: Point2<f64>) -> Self {
        Self {
            width,
            height,
            focal,
            principal_point,
            distortion: Distortion::None,
        }
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// Same projection with distortion removed (for already-undistorted images).
    pub fn without_distortion(&self) -> Self {
        Self {
            distortion: Distortion::None,
            ..*self
        }
    }

    pub fn has_distortion(&self) -> bool {
        !self.distortion.is_identity()
    }

    #[inline]
    pub fn pixel_to_normalized(&self, pixel: &Point2<f64>) -> Vector2<f64> {
        (pixel - self.principal_point) / self.focal
    }

    #[inline]
    pub fn normalized_to_pixel(&self, p: &Vector2<f64>) -> Point2<f64> {
        self.principal_point + p * self.focal
    }

    /// Project a camera-frame point to (distorted) pixel coordinates.
    pub fn project(&self, point_cam: &Point3<f64>) -> Point2<f64> {
        let n = Vector2::new(point_cam.x / point_cam.z, point_cam.y / point_cam.z);
        self.normalized_to_pixel(&self.distortion.distort(n))
    }

    /// Map a distorted image pixel to its ideal pinhole location.
    pub fn undistort_pixel(&self, pixel: &Point2<f64>) -> Option<Point2<f64>> {
        let n = self
            .distortion
            .undistort(self.pixel_to_normalized(pixel), UndistortConfig::default())?;
        Some(self.normalized_to_pixel(&n))
    }

    /// Map an ideal pinhole pixel to where it appears in the distorted image.
    pub fn distort_pixel(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let n = self.distortion.distort(self.pixel_to_normalized(pixel));
        self.normalized_to_pixel(&n)
    }
}

impl Camera for CameraIntrinsics {
    fn bearing(&self, pixel: &Point2<f64>) -> Option<Vector3<f64>> {
        if !(self.focal.is_finite() && self.focal.abs() > 1e-12) {
            return None;
        }
        let n = self
            .distortion
            .undistort(self.pixel_to_normalized(pixel), UndistortConfig::default())?;
        Some(Vector3::new(n.x, n.y, 1.0).normalize())
    }

    fn residual(&self, point_cam: &Point3<f64>, pixel: &Point2<f64>) -> Vector2<f64> {
        pixel - self.project(point_cam)
    }
}
