//! Linear (DLT) triangulation from two or more views.

use anyhow::{anyhow, bail, Result};
use camnet_core::{Mat34, Pt3, Real, Vec2};
use nalgebra::DMatrix;

/// Triangulate a single 3D point from its projections.
///
/// `projections[i]` is the 3×4 projection matrix of view `i` and `points[i]`
/// the corresponding pixel observation. Needs at least two views.
pub fn triangulate_point_linear(projections: &[Mat34], points: &[Vec2]) -> Result<Pt3> {
    let n = projections.len();
    if n < 2 || points.len() != n {
        bail!("need at least 2 views to triangulate, got {}", n);
    }

    // Two rows per view: x * P_3 - P_1 and y * P_3 - P_2.
    let mut a = DMatrix::<Real>::zeros(2 * n, 4);
    for (i, (p, uv)) in projections.iter().zip(points.iter()).enumerate() {
        for c in 0..4 {
            a[(2 * i, c)] = uv.x * p[(2, c)] - p[(0, c)];
            a[(2 * i + 1, c)] = uv.y * p[(2, c)] - p[(1, c)];
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow!("svd failed in triangulation"))?;
    let x = v_t.row(v_t.nrows() - 1);

    let w = x[3];
    if w.abs() < 1e-12 {
        bail!("triangulated point at infinity");
    }
    Ok(Pt3::new(x[0] / w, x[1] / w, x[2] / w))
}
