use crate::math::{Iso3, Mat34, Pt3, Ray, Real, Vec2, Vec3};
use crate::models::{BrownConrady5, Intrinsics};
use serde::{Deserialize, Serialize};

/// Complete per-camera calibration: intrinsics, distortion, and the
/// world→camera rigid pose.
///
/// All operations are pure given the current parameters. The pose is always
/// rigid by construction (`Iso3`), and K is upper-triangular by
/// construction ([`Intrinsics`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Sensor width in pixels.
    pub width: u32,
    /// Sensor height in pixels.
    pub height: u32,
    pub intrinsics: Intrinsics,
    pub distortion: BrownConrady5,
    /// World→camera rigid transform.
    pub pose: Iso3,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            intrinsics: Intrinsics::default(),
            distortion: BrownConrady5::default(),
            pose: Iso3::identity(),
        }
    }
}

impl Calibration {
    /// Project a world point to pixel coordinates.
    ///
    /// Returns `None` when the point is at or behind the camera plane
    /// (camera-space depth ≤ 0).
    pub fn project(&self, pw: &Pt3) -> Option<Vec2> {
        let pc = self.pose * pw;
        if pc.z <= 0.0 {
            return None;
        }
        let sensor = Vec2::new(pc.x / pc.z, pc.y / pc.z);
        let distorted = self.distortion.distort(&sensor);
        Some(self.intrinsics.sensor_to_pixel(&distorted))
    }

    /// Back-project a pixel into a unit-direction world ray from the camera
    /// centre.
    ///
    /// Distortion is inverted with the fixed-iteration scheme of
    /// [`BrownConrady5::undistort`].
    pub fn unproject(&self, pixel: &Vec2) -> Ray {
        let sensor = self.intrinsics.pixel_to_sensor(pixel);
        let undistorted = self.distortion.undistort(&sensor);
        let dir_cam = Vec3::new(undistorted.x, undistorted.y, 1.0);
        let dir_world = self.pose.inverse_transform_vector(&dir_cam).normalize();
        Ray::new(self.camera_centre(), dir_world)
    }

    /// The camera's position in world coordinates (`L⁻¹ · origin`).
    pub fn camera_centre(&self) -> Pt3 {
        self.pose.inverse_transform_point(&Pt3::origin())
    }

    /// The 3×4 projection matrix `K [R | t]` (distortion not included).
    pub fn projection_matrix(&self) -> Mat34 {
        let k = self.intrinsics.k_matrix();
        let r = self.pose.rotation.to_rotation_matrix();
        let t = self.pose.translation.vector;
        let mut rt = Mat34::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r.matrix());
        rt.set_column(3, &t);
        k * rt
    }

    /// Camera-space depth of a world point (positive in front of the camera).
    pub fn depth_of(&self, pw: &Pt3) -> Real {
        (self.pose * pw).z
    }
}
