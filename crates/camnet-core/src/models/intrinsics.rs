use crate::math::{Mat3, Real, Vec2};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics parameterized as focal length, aspect ratio,
/// principal point, and skew.
///
/// The pixel focal lengths are `fx = f` and `fy = aspect * f`. This is the
/// parameterization used by the bundle-adjustment layer, where parameters
/// are freed in the order `f, cx, cy, aspect, skew`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length in pixels along X.
    pub f: Real,
    /// Pixel aspect ratio (`fy / fx`).
    pub aspect: Real,
    /// Principal point X coordinate in pixels.
    pub cx: Real,
    /// Principal point Y coordinate in pixels.
    pub cy: Real,
    /// Skew term (typically 0).
    pub skew: Real,
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self {
            f: 1.0,
            aspect: 1.0,
            cx: 0.0,
            cy: 0.0,
            skew: 0.0,
        }
    }
}

impl Intrinsics {
    /// Focal length in pixels along X.
    pub fn fx(&self) -> Real {
        self.f
    }

    /// Focal length in pixels along Y.
    pub fn fy(&self) -> Real {
        self.aspect * self.f
    }

    /// The 3×3 upper-triangular camera matrix K.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx(),
            self.skew,
            self.cx,
            0.0,
            self.fy(),
            self.cy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Recover intrinsics from an upper-triangular K matrix.
    ///
    /// Fails if K is not normalized (`K[2][2] != 1`) or not upper-triangular.
    pub fn from_k_matrix(k: &Mat3) -> Result<Self> {
        ensure!(
            (k[(2, 2)] - 1.0).abs() < 1e-9,
            "K matrix not normalized: K[2][2] = {}",
            k[(2, 2)]
        );
        for (r, c) in [(1, 0), (2, 0), (2, 1)] {
            ensure!(
                k[(r, c)].abs() < 1e-9,
                "K matrix not upper-triangular at ({r}, {c})"
            );
        }
        ensure!(k[(0, 0)].abs() > Real::EPSILON, "zero focal length in K");
        Ok(Self {
            f: k[(0, 0)],
            aspect: k[(1, 1)] / k[(0, 0)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        })
    }

    /// Convert sensor-plane (normalized) coordinates into pixel coordinates.
    pub fn sensor_to_pixel(&self, sensor: &Vec2) -> Vec2 {
        Vec2::new(
            self.fx() * sensor.x + self.skew * sensor.y + self.cx,
            self.fy() * sensor.y + self.cy,
        )
    }

    /// Convert pixel coordinates into sensor-plane (normalized) coordinates.
    pub fn pixel_to_sensor(&self, pixel: &Vec2) -> Vec2 {
        let sy = (pixel.y - self.cy) / self.fy();
        let sx = (pixel.x - self.cx - self.skew * sy) / self.fx();
        Vec2::new(sx, sy)
    }
}
