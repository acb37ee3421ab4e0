//! End-to-end calibration of a synthetic three-camera network from exact,
//! noise-free detections.

use camnet_core::{CamId, Calibration, GridPoint, GridStore, Intrinsics, Iso3, Pt3, Real};
use camnet_pipeline::{calibrate, NetworkConfig, NetworkState};
use nalgebra::Vector3;

const SPACING: Real = 50.0;

/// World-to-camera poses of the three rig cameras. The first camera is the
/// world origin, matching the root camera convention.
fn rig_poses() -> Vec<Iso3> {
    vec![
        Iso3::identity(),
        Iso3::new(Vector3::new(120.0, 5.0, 15.0), Vector3::new(0.0, 0.08, 0.0)),
        Iso3::new(Vector3::new(-110.0, -10.0, 20.0), Vector3::new(0.05, -0.06, 0.0)),
    ]
}

/// Grid-to-world poses: six target placements spread through the shared
/// viewing volume, tilted so the combined corner cloud is non-planar.
fn grid_poses() -> Vec<Iso3> {
    (0..6)
        .map(|k| {
            let k = k as Real;
            Iso3::new(
                Vector3::new(-90.0 + 40.0 * k, -60.0 + 25.0 * k, 750.0 + 60.0 * k),
                Vector3::new(0.06 * k - 0.15, 0.2 - 0.07 * k, 0.03 * k),
            )
        })
        .collect()
}

fn synthetic_state() -> NetworkState {
    let truth: Vec<Calibration> = rig_poses()
        .into_iter()
        .map(|pose| Calibration {
            width: 1280,
            height: 1024,
            intrinsics: Intrinsics {
                f: 1200.0,
                aspect: 1.0,
                cx: 640.0,
                cy: 512.0,
                skew: 0.0,
            },
            pose,
            ..Calibration::default()
        })
        .collect();

    // 4x4 corners per grid, projected exactly into every camera.
    let mut tables = vec![Vec::new(); truth.len()];
    for g_pose in grid_poses() {
        for (cam, calib) in truth.iter().enumerate() {
            let mut view = Vec::new();
            for r in 0..4 {
                for c in 0..4 {
                    let local = Pt3::new(c as Real * SPACING, r as Real * SPACING, 0.0);
                    let world = g_pose * local;
                    if let Some(px) = calib.project(&world) {
                        view.push(GridPoint::new(r, c, px));
                    }
                }
            }
            tables[cam].push(view);
        }
    }

    // The pipeline starts from unknown extrinsics; only intrinsics are known.
    let initial: Vec<Calibration> = truth
        .iter()
        .map(|c| Calibration {
            pose: Iso3::identity(),
            ..c.clone()
        })
        .collect();
    NetworkState::new(initial, GridStore::from_tables(tables), Vec::new())
}

#[test]
fn recovers_three_camera_rig_from_exact_detections() {
    let mut state = synthetic_state();
    let cfg = NetworkConfig {
        root_cam: Some(0),
        min_shared_grids: 5,
        ..NetworkConfig::default()
    };

    let report = calibrate(&mut state, &cfg).unwrap();

    assert!(state.is_cam_set(CamId(0)));
    assert!(state.is_cam_set(CamId(1)));
    assert!(state.is_cam_set(CamId(2)));
    assert_eq!(state.world_points.len(), 6 * 16);

    let truth = rig_poses();
    for (cam, t_pose) in truth.iter().enumerate() {
        let got = &state.calibs[cam].pose;
        let dt = (got.translation.vector - t_pose.translation.vector).norm();
        let dr = got.rotation.angle_to(&t_pose.rotation);
        assert!(dt < 1e-3, "cam{cam} translation off by {dt}");
        assert!(dr < 1e-5, "cam{cam} rotation off by {dr} rad");
    }

    assert_eq!(report.len(), 3);
    for e in &report {
        assert!(e.count > 0);
        assert!(e.max < 1e-3, "{}: max reprojection {}", e.cam, e.max);
    }
}

// The solver accumulates residual blocks in hash-map order, so two runs can
// differ by a few ulps even with seeded RANSAC. Repeated runs must still agree
// to well below any tolerance the pipeline itself cares about.
#[test]
fn repeated_runs_agree_to_solver_precision() {
    const TOL: Real = 1e-9;

    let cfg = NetworkConfig {
        root_cam: Some(0),
        min_shared_grids: 5,
        ..NetworkConfig::default()
    };
    let mut a = synthetic_state();
    let mut b = synthetic_state();
    calibrate(&mut a, &cfg).unwrap();
    calibrate(&mut b, &cfg).unwrap();
    for (cam, (ca, cb)) in a.calibs.iter().zip(&b.calibs).enumerate() {
        let df = (ca.intrinsics.f - cb.intrinsics.f).abs();
        let dt = (ca.pose.translation.vector - cb.pose.translation.vector).norm();
        let dr = ca.pose.rotation.angle_to(&cb.pose.rotation);
        assert!(df < TOL, "cam{cam} focal differs by {df}");
        assert!(dt < TOL, "cam{cam} translation differs by {dt}");
        assert!(dr < TOL, "cam{cam} rotation differs by {dr} rad");
    }
    for (i, (wa, wb)) in a.world_points.iter().zip(&b.world_points).enumerate() {
        let d = (wa.p - wb.p).norm();
        assert!(d < TOL, "world point {i} differs by {d}");
    }
}
