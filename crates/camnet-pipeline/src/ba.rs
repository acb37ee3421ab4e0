//! Bundle-adjustment layer over the camera network.
//!
//! Translates the current [`NetworkState`] into a [`NetworkBaDataset`] over
//! the active (fixed plus candidate) cameras, runs the solver, and writes
//! the refined values back. A solver failure leaves the state bitwise
//! unchanged and is reported as `Ok(false)`, not as an error.

use anyhow::{ensure, Result};
use camnet_core::{CamId, Pt3};
use camnet_optim::{
    optimize_network_ba, BaMode, NetworkBaDataset, NetworkBaInit,
    NetworkBaObservation, NetworkBaOptions, NetworkBaResult, SolverOptions,
    VALID_DISTORTION_COUNTS, VALID_INTRINSICS_COUNTS,
};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::state::NetworkState;

/// Refine the active part of the network.
///
/// `fixed` cameras anchor the gauge and never move; `vari` cameras move in
/// the camera modes. Observations are the raw detected pixels; the residual
/// model applies distortion itself. Returns `Ok(true)` when the state was
/// updated, `Ok(false)` when there was nothing to solve or the solver did
/// not converge.
pub fn bundle_adjust(
    state: &mut NetworkState,
    cfg: &NetworkConfig,
    mode: BaMode,
    fixed: &[CamId],
    vari: &[CamId],
    num_intrinsics_to_solve: usize,
    num_distortion_to_solve: usize,
) -> Result<bool> {
    ensure!(
        VALID_INTRINSICS_COUNTS.contains(&num_intrinsics_to_solve),
        "invalid intrinsics release count {num_intrinsics_to_solve}"
    );
    ensure!(
        VALID_DISTORTION_COUNTS.contains(&num_distortion_to_solve),
        "invalid distortion release count {num_distortion_to_solve}"
    );

    // Active cameras, fixed first so local anchor indices are stable.
    let mut active: Vec<CamId> = Vec::new();
    for &cam in fixed.iter().chain(vari.iter()) {
        if state.is_cam_set(cam) && !active.contains(&cam) {
            active.push(cam);
        }
    }
    if active.len() < 2 {
        debug!(active = active.len(), "too few active cameras, skipping bundle adjustment");
        return Ok(false);
    }
    let local_cam = |cam: CamId| active.iter().position(|&c| c == cam);
    let fix_cameras: Vec<usize> = active
        .iter()
        .enumerate()
        .filter(|(_, c)| fixed.contains(c))
        .map(|(i, _)| i)
        .collect();

    // Points: triangulated grid corners first, then aux matches.
    let num_world = state.world_points.len();
    let aux_indices: Vec<usize> = state
        .matches
        .iter()
        .enumerate()
        .filter(|(_, m)| m.p3d.is_some())
        .map(|(i, _)| i)
        .collect();
    let mut points: Vec<Pt3> = state.world_points.iter().map(|wp| wp.p).collect();
    for &mi in &aux_indices {
        if let Some(p) = state.matches[mi].p3d {
            points.push(p);
        }
    }

    let mut observations = Vec::new();
    for (local, &cam) in active.iter().enumerate() {
        for g in state.grids.grid_ids() {
            if !state.is_grid_set(g) {
                continue;
            }
            for gp in state.grids.view(cam, g) {
                if let Some(pi) = state.world_point_index(g, gp.row, gp.col) {
                    observations.push(NetworkBaObservation {
                        cam: local,
                        point: pi,
                        uv: gp.pi,
                        w: 1.0,
                    });
                }
            }
        }
    }
    for (k, &mi) in aux_indices.iter().enumerate() {
        for (&cam, px) in &state.matches[mi].p2d {
            if let Some(local) = local_cam(cam) {
                observations.push(NetworkBaObservation {
                    cam: local,
                    point: num_world + k,
                    uv: *px,
                    w: 1.0,
                });
            }
        }
    }
    if observations.is_empty() {
        debug!("no observations for active cameras, skipping bundle adjustment");
        return Ok(false);
    }

    let dataset = NetworkBaDataset::new(observations, active.len(), points.len())?;
    let initial = NetworkBaInit {
        cameras: active.iter().map(|&c| state.calibs[c.0].clone()).collect(),
        points,
    };
    let opts = NetworkBaOptions {
        mode,
        num_intrinsics_to_solve,
        num_distortion_to_solve,
        fix_cameras,
        ..NetworkBaOptions::default()
    };
    let backend_opts = SolverOptions {
        max_iters: cfg.max_ba_iters,
        ..SolverOptions::default()
    };

    let result = match optimize_network_ba(&dataset, &initial, &opts, &backend_opts) {
        Ok(result) => result,
        Err(err) => {
            warn!(%err, ?mode, "bundle adjustment did not converge, state unchanged");
            return Ok(false);
        }
    };
    if !solution_is_finite(&result) {
        warn!(?mode, "bundle adjustment produced non-finite values, state unchanged");
        return Ok(false);
    }

    for (local, &cam) in active.iter().enumerate() {
        state.calibs[cam.0] = result.cameras[local].clone();
    }
    for (i, wp) in state.world_points.iter_mut().enumerate() {
        wp.p = result.points[i];
    }
    for (k, &mi) in aux_indices.iter().enumerate() {
        state.matches[mi].p3d = Some(result.points[num_world + k]);
    }

    info!(
        ?mode,
        cameras = active.len(),
        points = result.points.len(),
        cost = result.final_cost,
        "bundle adjustment converged"
    );
    Ok(true)
}

/// Whether every refined parameter is a finite number.
///
/// Degenerate observations can drive the solver to NaN or infinity while
/// still reporting success; such a solution must be discarded.
fn solution_is_finite(result: &NetworkBaResult) -> bool {
    let cams_ok = result.cameras.iter().all(|c| {
        let intr = [
            c.intrinsics.f,
            c.intrinsics.aspect,
            c.intrinsics.cx,
            c.intrinsics.cy,
            c.intrinsics.skew,
        ];
        intr.iter().all(|v| v.is_finite())
            && c.distortion.coeffs().iter().all(|v| v.is_finite())
            && c.pose.translation.vector.iter().all(|v| v.is_finite())
            && c.pose.rotation.quaternion().coords.iter().all(|v| v.is_finite())
    });
    cams_ok && result.points.iter().all(|p| p.coords.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camnet_core::{Calibration, GridPoint, GridStore, Iso3, PointMatch, Real, Vec2, WorldPoint};
    use camnet_core::GridId;
    use nalgebra::Vector3;

    fn look_from(x: Real) -> Iso3 {
        Iso3::new(Vector3::new(-x, 0.0, 600.0), Vector3::zeros())
    }

    /// Two cameras observing one grid of 3x3 corners at z = 0, plus the
    /// synthetic detections from exact projection.
    fn exact_two_camera_state() -> (NetworkState, Vec<CamId>, Vec<CamId>) {
        let calibs = vec![
            Calibration {
                pose: look_from(0.0),
                ..Calibration::default()
            },
            Calibration {
                pose: look_from(80.0),
                ..Calibration::default()
            },
        ];
        let corners: Vec<(i32, i32, Pt3)> = (0..3)
            .flat_map(|r| {
                (0..3).map(move |c| {
                    (r, c, Pt3::new(c as Real * 50.0, r as Real * 50.0, 0.0))
                })
            })
            .collect();
        let tables: Vec<Vec<Vec<GridPoint>>> = calibs
            .iter()
            .map(|calib| {
                vec![corners
                    .iter()
                    .map(|&(r, c, p)| {
                        let px = calib.project(&p).unwrap();
                        GridPoint::new(r, c, Vec2::new(px.x, px.y))
                    })
                    .collect()]
            })
            .collect();
        let mut state = NetworkState::new(calibs, GridStore::from_tables(tables), Vec::new());
        state.is_set_cam[0] = true;
        state.is_set_cam[1] = true;
        state.is_set_grid[0] = true;
        for &(r, c, p) in &corners {
            state.add_world_point(WorldPoint {
                p,
                grid: GridId(0),
                row: r,
                col: c,
            });
        }
        (state, vec![CamId(0)], vec![CamId(1)])
    }

    #[test]
    fn converged_solve_keeps_exact_geometry() {
        let (mut state, fixed, vari) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        let before = state.calibs[1].pose;
        let ok = bundle_adjust(
            &mut state,
            &cfg,
            BaMode::CamerasAndPoints,
            &fixed,
            &vari,
            0,
            0,
        )
        .unwrap();
        assert!(ok);
        // Exact data: the solution must stay where it started.
        let after = state.calibs[1].pose;
        assert!((after.translation.vector - before.translation.vector).norm() < 1e-6);
        assert!(after.rotation.angle_to(&before.rotation) < 1e-8);
    }

    #[test]
    fn points_only_leaves_cameras_untouched() {
        let (mut state, fixed, vari) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        // Perturb one point; cameras must come back bitwise identical.
        state.world_points[4].p += Vector3::new(0.5, -0.5, 0.5);
        let cams_before = state.calibs.clone();
        let ok = bundle_adjust(&mut state, &cfg, BaMode::PointsOnly, &fixed, &vari, 0, 0).unwrap();
        assert!(ok);
        for (after, before) in state.calibs.iter().zip(&cams_before) {
            assert_eq!(after.intrinsics, before.intrinsics);
            assert_eq!(after.distortion, before.distortion);
            let dt = (after.pose.translation.vector - before.pose.translation.vector).norm();
            assert!(dt < 1e-12, "fixed camera moved by {dt}");
            assert!(after.pose.rotation.angle_to(&before.pose.rotation) < 1e-12);
        }
        let wp = &state.world_points[4];
        let truth = Pt3::new(wp.col as Real * 50.0, wp.row as Real * 50.0, 0.0);
        assert!((wp.p - truth).norm() < 1e-3, "point not recovered: {:?}", wp.p);
    }

    #[test]
    fn single_active_camera_is_a_no_op() {
        let (mut state, fixed, _) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        let ok = bundle_adjust(&mut state, &cfg, BaMode::PointsOnly, &fixed, &[], 0, 0).unwrap();
        assert!(!ok);
    }

    #[test]
    fn illegal_release_counts_are_fatal() {
        let (mut state, fixed, vari) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        assert!(
            bundle_adjust(&mut state, &cfg, BaMode::CamerasAndPoints, &fixed, &vari, 2, 0).is_err()
        );
        assert!(
            bundle_adjust(&mut state, &cfg, BaMode::CamerasAndPoints, &fixed, &vari, 0, 3).is_err()
        );
    }

    #[test]
    fn failed_solve_leaves_state_untouched() {
        let (mut state, fixed, vari) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        // A NaN detection poisons every residual it touches; the solve must
        // be rejected without writing anything back.
        let mut view = state.grids.view(CamId(1), GridId(0)).to_vec();
        view[0].pi = Vec2::new(Real::NAN, Real::NAN);
        state.grids.set_view(CamId(1), GridId(0), view);

        let calibs_before = state.calibs.clone();
        let points_before = state.world_points.clone();
        let ok = bundle_adjust(
            &mut state,
            &cfg,
            BaMode::CamerasAndPoints,
            &fixed,
            &vari,
            0,
            0,
        )
        .unwrap();
        assert!(!ok);
        assert_eq!(state.calibs, calibs_before);
        assert_eq!(state.world_points, points_before);
    }

    #[test]
    fn non_finite_solutions_are_rejected() {
        let (state, _, _) = exact_two_camera_state();
        let good = NetworkBaResult {
            cameras: state.calibs.clone(),
            points: state.world_points.iter().map(|wp| wp.p).collect(),
            final_cost: 0.0,
        };
        assert!(solution_is_finite(&good));

        let mut bad = good.clone();
        bad.points[0] = Pt3::new(Real::NAN, 0.0, 0.0);
        assert!(!solution_is_finite(&bad));

        let mut bad = good;
        bad.cameras[1].intrinsics.f = Real::INFINITY;
        assert!(!solution_is_finite(&bad));
    }

    #[test]
    fn aux_matches_enter_the_problem() {
        let (mut state, fixed, vari) = exact_two_camera_state();
        let cfg = NetworkConfig::default();
        let target = Pt3::new(120.0, 30.0, 10.0);
        let mut m = PointMatch::new(0);
        for (i, calib) in state.calibs.iter().enumerate() {
            m.p2d.insert(CamId(i), calib.project(&target).unwrap());
        }
        m.p3d = Some(target + Vector3::new(0.4, 0.0, -0.4));
        state.matches.push(m);

        let ok = bundle_adjust(&mut state, &cfg, BaMode::PointsOnly, &fixed, &vari, 0, 0).unwrap();
        assert!(ok);
        let refined = state.matches[0].p3d.unwrap();
        assert!((refined - target).norm() < 1e-3, "aux point not refined: {refined:?}");
    }
}
