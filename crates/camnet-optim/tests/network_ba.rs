//! Integration tests for the camera-network bundle adjustment.
//!
//! These tests validate:
//! 1. Points-only refinement converges back to ground truth with fixed cameras
//! 2. Joint camera-and-point refinement recovers a perturbed camera pose
//! 3. Solve failures surface as errors without producing a result

use camnet_core::{BrownConrady5, Calibration, Intrinsics, Iso3, Pt3, Real};
use camnet_optim::{
    optimize_network_ba, BaMode, NetworkBaDataset, NetworkBaInit,
    NetworkBaObservation, NetworkBaOptions, RobustLoss, SolverOptions,
};
use nalgebra::{Rotation3, Translation3, UnitQuaternion};

fn ground_truth_network() -> (Vec<Calibration>, Vec<Pt3>) {
    let intr = Intrinsics {
        f: 800.0,
        aspect: 0.98,
        cx: 640.0,
        cy: 360.0,
        skew: 0.0,
    };
    let base = Calibration {
        width: 1280,
        height: 720,
        intrinsics: intr,
        distortion: BrownConrady5 {
            k1: -0.2,
            k2: 0.05,
            p1: 0.0005,
            p2: -0.0005,
            k3: 0.0,
        },
        pose: Iso3::identity(),
    };

    let poses = [
        Iso3::identity(),
        Iso3::from_parts(
            Translation3::new(-0.6, 0.0, 0.05),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_euler_angles(0.0, -0.12, 0.0)),
        ),
        Iso3::from_parts(
            Translation3::new(0.1, -0.5, 0.1),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_euler_angles(0.1, 0.02, 0.0)),
        ),
    ];
    let cameras = poses
        .iter()
        .map(|p| Calibration {
            pose: *p,
            ..base.clone()
        })
        .collect();

    let mut points = Vec::new();
    for z in 0..2 {
        for y in 0..4 {
            for x in 0..5 {
                points.push(Pt3::new(
                    (x as Real - 2.0) * 0.3,
                    (y as Real - 1.5) * 0.3,
                    2.5 + z as Real * 0.6,
                ));
            }
        }
    }
    (cameras, points)
}

fn observe_all(cameras: &[Calibration], points: &[Pt3]) -> NetworkBaDataset {
    let mut observations = Vec::new();
    for (pt_idx, p) in points.iter().enumerate() {
        for (cam_idx, cam) in cameras.iter().enumerate() {
            if let Some(uv) = cam.project(p) {
                observations.push(NetworkBaObservation {
                    cam: cam_idx,
                    point: pt_idx,
                    uv,
                    w: 1.0,
                });
            }
        }
    }
    NetworkBaDataset::new(observations, cameras.len(), points.len()).unwrap()
}

#[test]
fn points_only_refinement_recovers_perturbed_points() {
    let (cameras, points_gt) = ground_truth_network();
    let dataset = observe_all(&cameras, &points_gt);

    let mut points = points_gt.clone();
    for (i, p) in points.iter_mut().enumerate() {
        let s = 0.01 * ((i % 5) as Real - 2.0);
        *p += camnet_core::Vec3::new(s, -s, 0.5 * s);
    }

    let init = NetworkBaInit { cameras, points };
    let opts = NetworkBaOptions {
        mode: BaMode::PointsOnly,
        robust_loss: RobustLoss::None,
        ..NetworkBaOptions::default()
    };

    let result =
        optimize_network_ba(&dataset, &init, &opts, &SolverOptions::default()).unwrap();

    for (est, gt) in result.points.iter().zip(points_gt.iter()) {
        let err = (est - gt).norm();
        assert!(err < 1e-4, "point error {err}");
    }
    assert!(result.final_cost < 1e-6, "final cost {}", result.final_cost);
    // Cameras must come back untouched in points-only mode.
    assert_eq!(result.cameras[1].pose, init.cameras[1].pose);
}

#[test]
fn joint_refinement_recovers_perturbed_camera_pose() {
    let (cameras_gt, points_gt) = ground_truth_network();
    let dataset = observe_all(&cameras_gt, &points_gt);

    let mut cameras = cameras_gt.clone();
    let nudge = Iso3::from_parts(
        Translation3::new(0.02, -0.015, 0.01),
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_euler_angles(0.01, -0.008, 0.005)),
    );
    cameras[1].pose = nudge * cameras[1].pose;

    let init = NetworkBaInit {
        cameras,
        points: points_gt.clone(),
    };
    // Camera 0 anchors the gauge; points stay at ground truth.
    let opts = NetworkBaOptions {
        mode: BaMode::CamerasOnly,
        robust_loss: RobustLoss::None,
        fix_cameras: vec![0, 2],
        ..NetworkBaOptions::default()
    };

    let result =
        optimize_network_ba(&dataset, &init, &opts, &SolverOptions::default()).unwrap();

    let est = &result.cameras[1].pose;
    let gt = &cameras_gt[1].pose;
    let t_err = (est.translation.vector - gt.translation.vector).norm();
    let r_err = est.rotation.angle_to(&gt.rotation);
    assert!(t_err < 1e-4, "translation error {t_err}");
    assert!(r_err < 1e-5, "rotation error {r_err}");
}

#[test]
fn missing_observations_fail_cleanly() {
    assert!(NetworkBaDataset::new(Vec::new(), 2, 4).is_err());
}
