//! Camera pose from 3D-2D correspondences (PnP).
//!
//! A normalized DLT solve on homogeneous equations with the rotation
//! projected onto SO(3), plus a RANSAC wrapper over the generic engine for
//! the outlier-contaminated correspondence sets the incremental network
//! produces. Image points are expected distortion-free.

use anyhow::{anyhow, bail, Result};
use camnet_core::{ransac, Estimator, Intrinsics, Iso3, Mat34, Mat4, Pt3, RansacOptions, Real, Vec2};
use nalgebra::{DMatrix, Isometry3, Rotation3, Translation3, UnitQuaternion, Vector3};

fn mat34_from_row(v_t: &DMatrix<Real>, row: usize) -> Mat34 {
    let r = v_t.row(row);
    let mut m = Mat34::zeros();
    for i in 0..3 {
        for j in 0..4 {
            m[(i, j)] = r[4 * i + j];
        }
    }
    m
}

/// Direct linear PnP on all input points.
///
/// `world` are 3D points in world coordinates and `image` their pixel
/// positions. Returns the world→camera transform.
pub fn pnp_dlt(world: &[Pt3], image: &[Vec2], k: &Intrinsics) -> Result<Iso3> {
    let n = world.len();
    if n < 6 || image.len() != n {
        bail!("need at least 6 point correspondences, got {}", n);
    }

    let kmtx = k.k_matrix();
    let k_inv = kmtx
        .try_inverse()
        .ok_or_else(|| anyhow!("intrinsics matrix is not invertible"))?;

    // Normalize the 3D points: zero centroid, mean distance sqrt(3).
    let mut centroid = Vector3::<Real>::zeros();
    for p in world {
        centroid += p.coords;
    }
    centroid /= n as Real;

    let mean_dist =
        world.iter().map(|p| (p.coords - centroid).norm()).sum::<Real>() / n as Real;
    if mean_dist <= Real::EPSILON {
        bail!("degenerate 3d point configuration for normalization");
    }
    let scale = (3.0_f64).sqrt() / mean_dist;
    let t_world = Mat4::new(
        scale, 0.0, 0.0, -scale * centroid.x, //
        0.0, scale, 0.0, -scale * centroid.y, //
        0.0, 0.0, scale, -scale * centroid.z, //
        0.0, 0.0, 0.0, 1.0,
    );

    // 2n x 12 DLT system for P = [R | t] in K-normalized image coordinates.
    let mut a = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
        let q = scale * (pw.coords - centroid);

        let v_img = k_inv * Vector3::new(pi.x, pi.y, 1.0);
        let u = v_img.x / v_img.z;
        let v = v_img.y / v_img.z;

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = q.x;
        a[(r0, 1)] = q.y;
        a[(r0, 2)] = q.z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * q.x;
        a[(r0, 9)] = -u * q.y;
        a[(r0, 10)] = -u * q.z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = q.x;
        a[(r1, 5)] = q.y;
        a[(r1, 6)] = q.z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * q.x;
        a[(r1, 9)] = -v * q.y;
        a[(r1, 10)] = -v * q.z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow!("svd failed in pnp_dlt"))?;
    // De-normalize: P = P_norm * T_world.
    let p_mtx = mat34_from_row(&v_t, v_t.nrows() - 1) * t_world;

    let m = p_mtx.fixed_view::<3, 3>(0, 0).into_owned();
    let mut r_approx = m;

    // Scale from the average row norm, sign from the determinant.
    let mut s =
        (r_approx.row(0).norm() + r_approx.row(1).norm() + r_approx.row(2).norm()) / 3.0;
    if r_approx.determinant() < 0.0 {
        s = -s;
    }
    if s.abs() > 0.0 {
        r_approx /= s;
    }

    // Project onto SO(3).
    let svd = r_approx.svd(true, true);
    let u = svd.u.ok_or_else(|| anyhow!("svd failed in pnp_dlt"))?;
    let v_t = svd.v_t.ok_or_else(|| anyhow!("svd failed in pnp_dlt"))?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let mut t = p_mtx.column(3).into_owned();
    if s.abs() > 0.0 {
        t /= s;
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Ok(Isometry3::from_parts(Translation3::from(t), rot))
}

struct PnpEstimator;

struct PnpDatum {
    pw: Pt3,
    uv: Vec2,
}

impl PnpEstimator {
    fn reproj_error(k: &Intrinsics, pose: &Iso3, d: &PnpDatum) -> Real {
        let pc = pose * d.pw;
        if pc.z <= 0.0 {
            return Real::INFINITY;
        }
        let uv = k.sensor_to_pixel(&Vec2::new(pc.x / pc.z, pc.y / pc.z));
        (uv - d.uv).norm()
    }
}

impl Estimator for PnpEstimator {
    type Datum = (PnpDatum, Intrinsics);
    type Model = Iso3;

    const MIN_SAMPLES: usize = 6;

    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let k = data[sample_indices[0]].1;
        let world: Vec<Pt3> = sample_indices.iter().map(|&i| data[i].0.pw).collect();
        let image: Vec<Vec2> = sample_indices.iter().map(|&i| data[i].0.uv).collect();
        pnp_dlt(&world, &image, &k).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        Self::reproj_error(&datum.1, model, &datum.0)
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        if inliers.len() < Self::MIN_SAMPLES {
            return None;
        }
        let k = data[inliers[0]].1;
        let world: Vec<Pt3> = inliers.iter().map(|&i| data[i].0.pw).collect();
        let image: Vec<Vec2> = inliers.iter().map(|&i| data[i].0.uv).collect();
        pnp_dlt(&world, &image, &k).ok()
    }
}

/// PnP with RANSAC outlier rejection.
///
/// Returns the world→camera transform and the inlier indices.
pub fn pnp_dlt_ransac(
    world: &[Pt3],
    image: &[Vec2],
    k: &Intrinsics,
    opts: &RansacOptions,
) -> Result<(Iso3, Vec<usize>)> {
    let n = world.len();
    if n < 6 || image.len() != n {
        bail!("need at least 6 point correspondences, got {}", n);
    }
    let data: Vec<(PnpDatum, Intrinsics)> = world
        .iter()
        .zip(image.iter())
        .map(|(pw, uv)| (PnpDatum { pw: *pw, uv: *uv }, *k))
        .collect();

    let res = ransac::<PnpEstimator>(&data, opts);
    if !res.success {
        bail!(
            "PnP RANSAC found no consensus over {} correspondences",
            n
        );
    }
    let model = res
        .model
        .ok_or_else(|| anyhow!("RANSAC success without a model"))?;
    Ok((model, res.inliers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_k() -> Intrinsics {
        Intrinsics {
            f: 800.0,
            aspect: 0.975,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
    }

    fn synthetic_scene(k: &Intrinsics, pose: &Iso3) -> (Vec<Pt3>, Vec<Vec2>) {
        let mut world = Vec::new();
        let mut image = Vec::new();
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    let pw =
                        Pt3::new(x as Real * 0.1, y as Real * 0.1, 0.5 + z as Real * 0.1);
                    let pc = pose * pw;
                    let uv = k.sensor_to_pixel(&Vec2::new(pc.x / pc.z, pc.y / pc.z));
                    world.push(pw);
                    image.push(uv);
                }
            }
        }
        (world, image)
    }

    fn pose_close(a: &Iso3, b: &Iso3, tol: Real) -> bool {
        let dt = (a.translation.vector - b.translation.vector).norm();
        let r_diff =
            a.rotation.to_rotation_matrix().matrix().transpose() * b.rotation.to_rotation_matrix().matrix();
        let ang = ((r_diff.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos();
        dt < tol && ang < tol
    }

    #[test]
    fn dlt_recovers_pose_on_exact_data() {
        let k = make_k();
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let pose_gt = Isometry3::from_parts(Translation3::new(0.1, -0.05, 1.0), rot.into());

        let (world, image) = synthetic_scene(&k, &pose_gt);
        let est = pnp_dlt(&world, &image, &k).unwrap();
        assert!(pose_close(&est, &pose_gt, 1e-3));
    }

    #[test]
    fn ransac_rejects_gross_outliers() {
        let k = make_k();
        let rot = Rotation3::from_euler_angles(-0.05, 0.1, 0.0);
        let pose_gt = Isometry3::from_parts(Translation3::new(0.0, 0.1, 1.2), rot.into());

        let (mut world, mut image) = synthetic_scene(&k, &pose_gt);
        let n_inliers = world.len();
        // Corrupt three observations.
        world.push(Pt3::new(0.2, 0.2, 0.7));
        image.push(Vec2::new(10.0, 10.0));
        world.push(Pt3::new(0.0, 0.3, 0.6));
        image.push(Vec2::new(1200.0, 40.0));
        world.push(Pt3::new(0.3, 0.0, 0.8));
        image.push(Vec2::new(300.0, 700.0));

        let opts = RansacOptions {
            thresh: 1.0,
            min_inliers: n_inliers - 2,
            ..RansacOptions::default()
        };
        let (est, inliers) = pnp_dlt_ransac(&world, &image, &k, &opts).unwrap();
        assert!(pose_close(&est, &pose_gt, 1e-3));
        assert!(inliers.len() >= n_inliers - 2);
        assert!(inliers.len() < world.len());
    }

    #[test]
    fn too_few_correspondences() {
        let k = make_k();
        let world = vec![Pt3::origin(); 4];
        let image = vec![Vec2::zeros(); 4];
        assert!(pnp_dlt(&world, &image, &k).is_err());
        assert!(pnp_dlt_ransac(&world, &image, &k, &RansacOptions::default()).is_err());
    }
}
