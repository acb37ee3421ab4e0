//! Planar (Z=0) pose estimation from a homography.
//!
//! This is the classic decomposition of a plane-induced homography
//! `H = K [r1 r2 t]` into a rigid transform, used to place each grid
//! observation relative to a camera with known intrinsics.

use crate::homography::dlt_homography;
use anyhow::{anyhow, Context, Result};
use camnet_core::{Iso3, Mat3, Pt2, Real};
use nalgebra::{Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Decompose a homography into the pose of the plane relative to the camera,
/// given intrinsics `K`.
///
/// Returns the transform mapping plane coordinates (Z=0) into camera
/// coordinates.
pub fn pose_from_homography(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3> {
    let k_inv = kmtx
        .try_inverse()
        .ok_or_else(|| anyhow!("intrinsics matrix is not invertible"))?;

    let k_inv_h1 = k_inv * hmtx.column(0);
    let k_inv_h2 = k_inv * hmtx.column(1);
    let h3 = hmtx.column(2).into_owned();

    // Scale factor: normalize the first two columns (averaged for symmetry).
    let norm1 = k_inv_h1.norm();
    let norm2 = k_inv_h2.norm();
    if norm1 < Real::EPSILON || norm2 < Real::EPSILON {
        return Err(anyhow!("degenerate homography: zero-length column"));
    }
    let lambda = 1.0 / ((norm1 + norm2) * 0.5);

    let r1 = (lambda * k_inv_h1).into_owned();
    let r2 = (lambda * k_inv_h2).into_owned();
    let r3 = r1.cross(&r2);

    let mut r_mat = Matrix3::<Real>::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    // Project onto SO(3) via polar decomposition.
    let svd = r_mat.svd(true, true);
    let mut u = svd.u.ok_or_else(|| anyhow!("svd failed in pose_from_homography"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow!("svd failed in pose_from_homography"))?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r_orth = u * v_t;

    let t_vec: Vector3<Real> = lambda * (k_inv * h3);
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Ok(Iso3::from_parts(Translation3::from(t_vec), rot))
}

/// Estimate the pose of a planar target directly from plane-to-image point
/// correspondences.
///
/// `plane` are target coordinates on the Z=0 plane, `image` the observed
/// pixel positions (distortion already removed). Returns the plane→camera
/// transform.
pub fn estimate_planar_pose(plane: &[Pt2], image: &[Pt2], kmtx: &Mat3) -> Result<Iso3> {
    let h = dlt_homography(plane, image).context("homography estimation failed")?;
    pose_from_homography(kmtx, &h)
}
