//! Ray-geometry primitives.
//!
//! The intersection routine implements the least-squares method of
//! Slabaugh, Schafer and Livingston: every ray contributes a rank-2
//! constraint `(I - d dᵀ)(x - o) = 0` and the stacked normal equations are
//! solved as a single 3×3 system.

use super::{Mat3, Pt3, Real, Vec3};
use anyhow::{anyhow, ensure, Result};

/// A 3D ray with an origin and a direction.
///
/// The direction is not required to be unit length; routines that care
/// normalize internally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Pt3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Pt3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    /// Point at parameter `t` along the ray.
    pub fn point_at(&self, t: Real) -> Pt3 {
        self.origin + self.dir * t
    }
}

/// Least-squares intersection of two or more rays.
///
/// Directions are re-normalized internally. There is no explicit failure
/// path for near-parallel configurations: the result is whatever the SVD
/// solve yields, and callers are expected to sanity-check it (for example
/// with [`point_ray_distance`]).
pub fn intersect_rays(rays: &[Ray]) -> Result<Pt3> {
    ensure!(rays.len() >= 2, "need at least 2 rays, got {}", rays.len());

    let mut a = Mat3::zeros();
    let mut b = Vec3::zeros();

    for ray in rays {
        let d = ray
            .dir
            .try_normalize(Real::EPSILON)
            .ok_or_else(|| anyhow!("ray direction has zero length"))?;
        // (I - d d^T) x = (I - d d^T) o
        let m = Mat3::identity() - d * d.transpose();
        a += m;
        b += m * ray.origin.coords;
    }

    let svd = a.svd(true, true);
    let x = svd
        .solve(&b, 1e-12)
        .map_err(|e| anyhow!("svd solve failed in intersect_rays: {e}"))?;
    Ok(Pt3::from(x))
}

/// Perpendicular distance from a point to a ray's supporting line.
pub fn point_ray_distance(p: &Pt3, ray: &Ray) -> Real {
    let d = match ray.dir.try_normalize(Real::EPSILON) {
        Some(d) => d,
        None => return (p - ray.origin).norm(),
    };
    let v = p - ray.origin;
    (v - d * v.dot(&d)).norm()
}

/// Minimum distance between the supporting lines of two rays.
///
/// Parallel rays fall back to the point-to-line distance.
pub fn distance_between_rays(a: &Ray, b: &Ray) -> Real {
    let n = a.dir.cross(&b.dir);
    let n_norm = n.norm();
    if n_norm < 1e-12 {
        return point_ray_distance(&b.origin, a);
    }
    ((b.origin - a.origin).dot(&n) / n_norm).abs()
}

/// Intersection of a ray with the plane `n · x = d`.
///
/// Returns `None` when the ray is parallel to the plane.
pub fn intersect_ray_plane(ray: &Ray, n: &Vec3, d: Real) -> Option<Pt3> {
    let denom = n.dot(&ray.dir);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = (d - n.dot(&ray.origin.coords)) / denom;
    Some(ray.point_at(t))
}
