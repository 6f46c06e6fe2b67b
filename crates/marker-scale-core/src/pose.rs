//! World-to-camera poses and the similarity used to rescale a scene.

use nalgebra::{Matrix3, Matrix3x4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// World-to-camera pose stored as rotation plus camera centre:
/// `x_cam = R (X - C)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose3 {
    pub rotation: Matrix3<f64>,
    pub center: Point3<f64>,
}

impl Default for Pose3 {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            center: Point3::origin(),
        }
    }
}

impl Pose3 {
    pub fn new(rotation: Matrix3<f64>, center: Point3<f64>) -> Self {
        Self { rotation, center }
    }

    /// Translation `t = -R C` of the `[R | t]` form.
    pub fn translation(&self) -> Vector3<f64> {
        -(self.rotation * self.center.coords)
    }

    /// Map a world point into the camera frame.
    #[inline]
    pub fn transform_point(&self, x: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (x - self.center))
    }

    /// The 3x4 projection matrix `[R | -R C]` acting on homogeneous points.
    pub fn as_matrix(&self) -> Matrix3x4<f64> {
        let mut p = Matrix3x4::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        p.set_column(3, &self.translation());
        p
    }
}

/// `X' = s R X + t`, applied to world points and therefore to poses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Similarity3 {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Similarity3 {
    /// Uniform scaling about the world origin.
    pub fn scaling(scale: f64) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            scale,
        }
    }

    pub fn apply_point(&self, x: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.scale * (self.rotation * x.coords) + self.translation)
    }

    /// Re-express a pose in the transformed world: the centre moves with the
    /// world and the orientation absorbs the similarity rotation.
    pub fn apply_pose(&self, pose: &Pose3) -> Pose3 {
        Pose3 {
            rotation: pose.rotation * self.rotation.transpose(),
            center: self.apply_point(&pose.center),
        }
    }

    pub fn inverse(&self) -> Self {
        let rt = self.rotation.transpose();
        let inv_scale = 1.0 / self.scale;
        Self {
            rotation: rt,
            translation: -(rt * self.translation) * inv_scale,
            scale: inv_scale,
        }
    }
}
