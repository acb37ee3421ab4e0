//! Backend-independent reprojection residual models.

use nalgebra::{DVector, DVectorView, Quaternion, RealField, SVector, UnitQuaternion, Vector3};

/// Apply Brown-Conrady distortion to sensor-plane coordinates (generic for autodiff).
///
/// Coefficients are ordered `[k1, k2, p1, p2, k3]` with radial terms k1, k2,
/// k3 and tangential terms p1, p2.
fn distort_brown_conrady_generic<T: RealField>(
    x: T,
    y: T,
    k1: T,
    k2: T,
    p1: T,
    p2: T,
    k3: T,
) -> (T, T) {
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();

    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

    let two = T::one() + T::one();
    let x2 = x.clone() * x.clone();
    let y2 = y.clone() * y.clone();
    let xy = x.clone() * y.clone();

    let x_tan =
        two.clone() * p1.clone() * xy.clone() + p2.clone() * (r2.clone() + two.clone() * x2);
    let y_tan = p1 * (r2 + two.clone() * y2) + two * p2 * xy;

    (x.clone() * radial.clone() + x_tan, y * radial + y_tan)
}

/// Compute a 2D reprojection residual with the 3D point as a parameter block.
///
/// The residual is scaled by `sqrt(w)` and ordered `[u_residual, v_residual]`.
///
/// # Parameters
/// - `intr`: Intrinsics vector `[f, cx, cy, aspect, skew]` (fx = f, fy = aspect * f)
/// - `dist`: Distortion vector `[k1, k2, p1, p2, k3]`
/// - `pose`: World-to-camera SE3 `[qx, qy, qz, qw, tx, ty, tz]`
/// - `point`: 3D world point `[x, y, z]`
/// - `uv`: 2D measured pixel coordinates
/// - `w`: Weight for this observation
pub(crate) fn reproj_residual_intr5_dist5_se3_point_generic<T: RealField>(
    intr: DVectorView<'_, T>,
    dist: DVectorView<'_, T>,
    pose: DVectorView<'_, T>,
    point: DVectorView<'_, T>,
    uv: [f64; 2],
    w: f64,
) -> SVector<T, 2> {
    debug_assert!(intr.len() == 5, "intrinsics must have 5 params");
    debug_assert!(dist.len() == 5, "distortion must have 5 params");
    debug_assert!(pose.len() == 7, "pose must have 7 params");
    debug_assert!(point.len() == 3, "point must have 3 params");

    let f = intr[0].clone();
    let cx = intr[1].clone();
    let cy = intr[2].clone();
    let aspect = intr[3].clone();
    let skew = intr[4].clone();

    let k1 = dist[0].clone();
    let k2 = dist[1].clone();
    let p1 = dist[2].clone();
    let p2 = dist[3].clone();
    let k3 = dist[4].clone();

    let qx = pose[0].clone();
    let qy = pose[1].clone();
    let qz = pose[2].clone();
    let qw = pose[3].clone();
    let tx = pose[4].clone();
    let ty = pose[5].clone();
    let tz = pose[6].clone();

    let quat = Quaternion::new(qw, qx, qy, qz);
    let rot = UnitQuaternion::from_quaternion(quat);
    let t = Vector3::new(tx, ty, tz);

    // Transform to camera frame
    let pw = Vector3::new(point[0].clone(), point[1].clone(), point[2].clone());
    let pc = rot.transform_vector(&pw) + t;

    // Project to sensor-plane coordinates
    let eps = T::from_f64(1e-12).unwrap();
    let z_safe = if pc.z.clone() > eps.clone() {
        pc.z.clone()
    } else {
        eps
    };
    let x_norm = pc.x.clone() / z_safe.clone();
    let y_norm = pc.y.clone() / z_safe;

    // Apply distortion
    let (x_dist, y_dist) = distort_brown_conrady_generic(x_norm, y_norm, k1, k2, p1, p2, k3);

    // Apply intrinsics
    let u_proj = f.clone() * x_dist + skew * y_dist.clone() + cx;
    let v_proj = aspect * f * y_dist + cy;

    // Compute weighted residual
    let sqrt_w = T::from_f64(w.sqrt()).unwrap();
    let u_meas = T::from_f64(uv[0]).unwrap();
    let v_meas = T::from_f64(uv[1]).unwrap();

    let ru = (u_meas - u_proj) * sqrt_w.clone();
    let rv = (v_meas - v_proj) * sqrt_w;

    SVector::<T, 2>::new(ru, rv)
}

/// Concrete f64 entry point used by tests and diagnostics.
pub fn reproj_residual_intr5_dist5_se3_point(
    intr: &DVector<f64>,
    dist: &DVector<f64>,
    pose: &DVector<f64>,
    point: &DVector<f64>,
    uv: [f64; 2],
    w: f64,
) -> SVector<f64, 2> {
    reproj_residual_intr5_dist5_se3_point_generic(
        intr.as_view(),
        dist.as_view(),
        pose.as_view(),
        point.as_view(),
        uv,
        w,
    )
}
