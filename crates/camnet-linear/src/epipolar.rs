//! Two-view epipolar geometry: fundamental and essential matrices and
//! relative pose recovery.
//!
//! This is the fallback path used when a camera cannot be placed from known
//! 3D points: estimate F from auxiliary matches, lift to E with the two
//! cameras' intrinsics, and pick the cheirality-consistent decomposition.

use crate::triangulation::triangulate_point_linear;
use anyhow::{anyhow, bail, Result};
use camnet_core::{Iso3, Mat3, Mat34, Real, Vec2, Vec3};
use nalgebra::{DMatrix, Rotation3, SMatrix, Translation3, UnitQuaternion};

/// Hartley normalization: translate to the centroid, scale mean distance to
/// sqrt(2). Returns the transform and the normalized points.
fn normalize_points(pts: &[Vec2]) -> (Mat3, Vec<Vec2>) {
    let n = pts.len() as Real;
    let mut centroid = Vec2::zeros();
    for p in pts {
        centroid += p;
    }
    centroid /= n;

    let mean_dist = pts.iter().map(|p| (p - centroid).norm()).sum::<Real>() / n;
    let s = if mean_dist > Real::EPSILON {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    let t = Mat3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| (p - centroid) * s).collect();
    (t, normalized)
}

/// Normalized 8-point algorithm for the fundamental matrix.
///
/// The returned matrix is rank-2 and satisfies `x2ᵀ F x1 = 0` up to
/// numerical error, with `x1`/`x2` in pixel coordinates.
pub fn fundamental_8point(pts1: &[Vec2], pts2: &[Vec2]) -> Result<Mat3> {
    let n = pts1.len();
    if n < 8 || pts2.len() != n {
        bail!("need at least 8 correspondences, got {}", n);
    }

    let (t1, pts1_n) = normalize_points(pts1);
    let (t2, pts2_n) = normalize_points(pts2);

    // Design matrix for x2ᵀ F x1 = 0, one row per correspondence.
    let mut a = DMatrix::<Real>::zeros(n.max(9), 9);
    for (i, (p1, p2)) in pts1_n.iter().zip(pts2_n.iter()).enumerate() {
        let (x, y) = (p1.x, p1.y);
        let (xp, yp) = (p2.x, p2.y);
        a[(i, 0)] = xp * x;
        a[(i, 1)] = xp * y;
        a[(i, 2)] = xp;
        a[(i, 3)] = yp * x;
        a[(i, 4)] = yp * y;
        a[(i, 5)] = yp;
        a[(i, 6)] = x;
        a[(i, 7)] = y;
        a[(i, 8)] = 1.0;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| anyhow!("svd failed in 8-point"))?;
    let f_vec = v_t.row(v_t.nrows() - 1);

    let mut f = Mat3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            f[(r, c)] = f_vec[3 * r + c];
        }
    }

    // Enforce rank 2.
    let svd_f = f.svd(true, true);
    let u = svd_f.u.ok_or_else(|| anyhow!("svd failed in 8-point"))?;
    let v_t = svd_f.v_t.ok_or_else(|| anyhow!("svd failed in 8-point"))?;
    let mut s = svd_f.singular_values;
    s[2] = 0.0;
    f = u * SMatrix::<Real, 3, 3>::from_diagonal(&s) * v_t;

    // Denormalize.
    Ok(t2.transpose() * f * t1)
}

/// Lift a fundamental matrix to an essential matrix: `E = K2ᵀ F K1`, with
/// the essential singular-value constraint re-imposed.
pub fn essential_from_fundamental(f: &Mat3, k1: &Mat3, k2: &Mat3) -> Result<Mat3> {
    enforce_essential_constraints(&(k2.transpose() * f * k1))
}

/// Project a 3×3 matrix onto the essential manifold: singular values
/// `(σ, σ, 0)` with `σ` the mean of the first two.
fn enforce_essential_constraints(e: &Mat3) -> Result<Mat3> {
    let svd = e.svd(true, true);
    let u = svd.u.ok_or_else(|| anyhow!("svd failed"))?;
    let v_t = svd.v_t.ok_or_else(|| anyhow!("svd failed"))?;
    let s = 0.5 * (svd.singular_values[0] + svd.singular_values[1]);
    Ok(u * SMatrix::<Real, 3, 3>::from_diagonal(&Vec3::new(s, s, 0.0)) * v_t)
}

/// Decompose an essential matrix into the four candidate `(R, t)` pairs.
///
/// The translation is unit length (direction only); the correct candidate
/// must be selected by cheirality, see [`recover_pose`].
pub fn decompose_essential(e: &Mat3) -> Result<Vec<(Mat3, Vec3)>> {
    let e = enforce_essential_constraints(e)?;
    let svd = e.svd(true, true);
    let mut u = svd.u.ok_or_else(|| anyhow!("svd failed"))?;
    let mut v_t = svd.v_t.ok_or_else(|| anyhow!("svd failed"))?;

    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).normalize();

    let mut solutions = vec![
        (r1, t.into_owned()),
        (r1, (-t).into_owned()),
        (r2, t.into_owned()),
        (r2, (-t).into_owned()),
    ];
    for (r, t) in solutions.iter_mut() {
        if r.determinant() < 0.0 {
            *r = -*r;
            *t = -*t;
        }
    }
    Ok(solutions)
}

fn projection(k: &Mat3, r: &Mat3, t: &Vec3) -> Mat34 {
    let mut rt = Mat34::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    rt.set_column(3, t);
    k * rt
}

/// Recover the relative pose of camera 2 with respect to camera 1 from an
/// essential matrix, resolving the four-fold ambiguity by triangulating the
/// given pixel correspondences and voting on positive depth in both views.
///
/// The returned transform maps camera-1 coordinates to camera-2 coordinates;
/// its translation is unit length (scale is not observable from E).
pub fn recover_pose(
    e: &Mat3,
    k1: &Mat3,
    k2: &Mat3,
    pts1: &[Vec2],
    pts2: &[Vec2],
) -> Result<Iso3> {
    let n = pts1.len();
    if n == 0 || pts2.len() != n {
        bail!("need matched point lists to disambiguate pose, got {} / {}", n, pts2.len());
    }

    let p1 = projection(k1, &Mat3::identity(), &Vec3::zeros());

    let mut best: Option<(usize, Mat3, Vec3)> = None;
    for (r, t) in decompose_essential(e)? {
        let p2 = projection(k2, &r, &t);
        let mut front = 0usize;
        for (x1, x2) in pts1.iter().zip(pts2.iter()) {
            let Ok(x) = triangulate_point_linear(&[p1, p2], &[*x1, *x2]) else {
                continue;
            };
            let depth1 = x.z;
            let depth2 = (r * x.coords + t).z;
            if depth1 > 0.0 && depth2 > 0.0 {
                front += 1;
            }
        }
        if best.as_ref().is_none_or(|(b, _, _)| front > *b) {
            best = Some((front, r, t));
        }
    }

    let (front, r, t) = best.ok_or_else(|| anyhow!("essential decomposition failed"))?;
    if front == 0 {
        bail!("no candidate pose places any point in front of both cameras");
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
