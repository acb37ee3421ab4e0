//! Camera-network bundle adjustment.
//!
//! Optimizes per-camera intrinsics, distortion, and world-to-camera poses
//! together with the shared 3D point cloud. Cameras and points can be held
//! fixed in groups (solve mode) or per index, and camera parameters can be
//! progressively released with prefix truncation.

use crate::backend::{solve_ir, SolverOptions};
use crate::ir::{FactorKind, FixedMask, ManifoldKind, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::{
    distortion_from_dvec, distortion_to_dvec, intrinsics_from_dvec, intrinsics_to_dvec,
    iso3_to_se3_dvec, se3_dvec_to_iso3,
};
use anyhow::{anyhow, ensure, Result};
use camnet_core::{Calibration, Pt3, Vec2};
use nalgebra::DVector;
use std::collections::{HashMap, HashSet};

/// Intrinsics release counts that keep coupled parameters together.
///
/// Freeing two would release `cx` without `cy`.
pub const VALID_INTRINSICS_COUNTS: [usize; 5] = [0, 1, 3, 4, 5];

/// Distortion release counts that keep the tangential pair together.
pub const VALID_DISTORTION_COUNTS: [usize; 5] = [0, 1, 2, 4, 5];

/// One pixel observation of one point by one camera.
#[derive(Debug, Clone, Copy)]
pub struct NetworkBaObservation {
    pub cam: usize,
    pub point: usize,
    pub uv: Vec2,
    pub w: f64,
}

/// Complete network bundle-adjustment dataset.
#[derive(Debug, Clone)]
pub struct NetworkBaDataset {
    pub observations: Vec<NetworkBaObservation>,
    pub num_cameras: usize,
    pub num_points: usize,
}

impl NetworkBaDataset {
    /// Create a dataset, checking observation indices.
    pub fn new(
        observations: Vec<NetworkBaObservation>,
        num_cameras: usize,
        num_points: usize,
    ) -> Result<Self> {
        ensure!(!observations.is_empty(), "need at least one observation");
        for (idx, obs) in observations.iter().enumerate() {
            ensure!(
                obs.cam < num_cameras,
                "observation {} references camera {} of {}",
                idx,
                obs.cam,
                num_cameras
            );
            ensure!(
                obs.point < num_points,
                "observation {} references point {} of {}",
                idx,
                obs.point,
                num_points
            );
        }
        Ok(Self {
            observations,
            num_cameras,
            num_points,
        })
    }

    /// Number of distinct cameras observing each point.
    fn observer_counts(&self) -> Vec<usize> {
        let mut observers: Vec<HashSet<usize>> = vec![HashSet::new(); self.num_points];
        for obs in &self.observations {
            observers[obs.point].insert(obs.cam);
        }
        observers.into_iter().map(|s| s.len()).collect()
    }
}

/// Initial values for the network bundle adjustment.
#[derive(Debug, Clone)]
pub struct NetworkBaInit {
    pub cameras: Vec<Calibration>,
    pub points: Vec<Pt3>,
}

/// Which parameter groups the solve releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaMode {
    /// Only the 3D points move; all camera parameters stay fixed.
    PointsOnly,
    /// Only camera parameters move; all 3D points stay fixed.
    CamerasOnly,
    /// Cameras and points are adjusted together.
    CamerasAndPoints,
}

/// Solve options for the network bundle adjustment.
#[derive(Debug, Clone)]
pub struct NetworkBaOptions {
    pub mode: BaMode,
    /// How many intrinsics to release per camera, in the order
    /// `f, cx, cy, aspect, skew`. Must be one of 0, 1, 3, 4, 5.
    pub num_intrinsics_to_solve: usize,
    /// How many distortion coefficients to release per camera, in the order
    /// `k1, k2, p1, p2, k3`. Must be one of 0, 1, 2, 4, 5.
    pub num_distortion_to_solve: usize,
    pub robust_loss: RobustLoss,
    /// Cameras held fully fixed regardless of mode (the anchored set).
    pub fix_cameras: Vec<usize>,
    /// Points held fixed regardless of mode.
    pub fix_points: Vec<usize>,
}

impl Default for NetworkBaOptions {
    fn default() -> Self {
        Self {
            mode: BaMode::CamerasAndPoints,
            num_intrinsics_to_solve: 0,
            num_distortion_to_solve: 0,
            robust_loss: RobustLoss::Huber { scale: 2.0 },
            fix_cameras: Vec::new(),
            fix_points: Vec::new(),
        }
    }
}

/// Result of the network bundle adjustment.
#[derive(Debug, Clone)]
pub struct NetworkBaResult {
    pub cameras: Vec<Calibration>,
    pub points: Vec<Pt3>,
    pub final_cost: f64,
}

fn intr_key(cam: usize) -> String {
    format!("intr/{cam}")
}

fn dist_key(cam: usize) -> String {
    format!("dist/{cam}")
}

fn pose_key(cam: usize) -> String {
    format!("pose/{cam}")
}

fn point_key(point: usize) -> String {
    format!("pt/{point}")
}

/// Build the IR for a network bundle adjustment.
pub fn build_network_ba_ir(
    dataset: &NetworkBaDataset,
    initial: &NetworkBaInit,
    opts: &NetworkBaOptions,
) -> Result<(ProblemIR, HashMap<String, DVector<f64>>)> {
    ensure!(
        initial.cameras.len() == dataset.num_cameras,
        "camera count {} != dataset {}",
        initial.cameras.len(),
        dataset.num_cameras
    );
    ensure!(
        initial.points.len() == dataset.num_points,
        "point count {} != dataset {}",
        initial.points.len(),
        dataset.num_points
    );
    ensure!(
        VALID_INTRINSICS_COUNTS.contains(&opts.num_intrinsics_to_solve),
        "invalid intrinsics release count {}; must be one of {:?}",
        opts.num_intrinsics_to_solve,
        VALID_INTRINSICS_COUNTS
    );
    ensure!(
        VALID_DISTORTION_COUNTS.contains(&opts.num_distortion_to_solve),
        "invalid distortion release count {}; must be one of {:?}",
        opts.num_distortion_to_solve,
        VALID_DISTORTION_COUNTS
    );

    let mut ir = ProblemIR::new();
    let mut initial_map = HashMap::new();

    let cameras_move = opts.mode != BaMode::PointsOnly;
    let points_move = opts.mode != BaMode::CamerasOnly;

    let mut intr_ids = Vec::with_capacity(dataset.num_cameras);
    let mut dist_ids = Vec::with_capacity(dataset.num_cameras);
    let mut pose_ids = Vec::with_capacity(dataset.num_cameras);

    for (cam_idx, calib) in initial.cameras.iter().enumerate() {
        let cam_free = cameras_move && !opts.fix_cameras.contains(&cam_idx);

        let intr_fixed = if cam_free {
            FixedMask::fix_tail(opts.num_intrinsics_to_solve, 5)
        } else {
            FixedMask::all_fixed(5)
        };
        let dist_fixed = if cam_free {
            FixedMask::fix_tail(opts.num_distortion_to_solve, 5)
        } else {
            FixedMask::all_fixed(5)
        };
        let pose_fixed = if cam_free {
            FixedMask::all_free()
        } else {
            FixedMask::all_fixed(7)
        };

        let key = intr_key(cam_idx);
        intr_ids.push(ir.add_param_block(&key, 5, ManifoldKind::Euclidean, intr_fixed, None));
        initial_map.insert(key, intrinsics_to_dvec(&calib.intrinsics));

        let key = dist_key(cam_idx);
        dist_ids.push(ir.add_param_block(&key, 5, ManifoldKind::Euclidean, dist_fixed, None));
        initial_map.insert(key, distortion_to_dvec(&calib.distortion));

        let key = pose_key(cam_idx);
        pose_ids.push(ir.add_param_block(&key, 7, ManifoldKind::SE3, pose_fixed, None));
        initial_map.insert(key, iso3_to_se3_dvec(&calib.pose));
    }

    // Points seen by a single camera are unconstrained along the ray and are
    // kept at their triangulated positions.
    let observer_counts = dataset.observer_counts();
    let mut point_ids = Vec::with_capacity(dataset.num_points);
    for (pt_idx, p) in initial.points.iter().enumerate() {
        let free = points_move && !opts.fix_points.contains(&pt_idx) && observer_counts[pt_idx] >= 2;
        let fixed = if free {
            FixedMask::all_free()
        } else {
            FixedMask::all_fixed(3)
        };
        let key = point_key(pt_idx);
        point_ids.push(ir.add_param_block(&key, 3, ManifoldKind::Euclidean, fixed, None));
        initial_map.insert(key, nalgebra::dvector![p.x, p.y, p.z]);
    }

    for obs in &dataset.observations {
        ir.add_residual_block(ResidualBlock {
            params: vec![
                intr_ids[obs.cam],
                dist_ids[obs.cam],
                pose_ids[obs.cam],
                point_ids[obs.point],
            ],
            loss: opts.robust_loss,
            factor: FactorKind::ReprojIntr5Dist5Se3Point {
                uv: [obs.uv.x, obs.uv.y],
                w: obs.w,
            },
            residual_dim: 2,
        });
    }

    ir.validate()?;
    Ok((ir, initial_map))
}

/// Run the network bundle adjustment with the tiny-solver backend.
///
/// On failure the caller's state is untouched: results are returned by
/// value and nothing is written back.
pub fn optimize_network_ba(
    dataset: &NetworkBaDataset,
    initial: &NetworkBaInit,
    opts: &NetworkBaOptions,
    backend_opts: &SolverOptions,
) -> Result<NetworkBaResult> {
    let (ir, initial_map) = build_network_ba_ir(dataset, initial, opts)?;
    let solution = solve_ir(&ir, &initial_map, backend_opts)?;

    let get = |key: &str| {
        solution
            .params
            .get(key)
            .ok_or_else(|| anyhow!("solution missing parameter {key}"))
    };

    let mut cameras = initial.cameras.clone();
    for (cam_idx, calib) in cameras.iter_mut().enumerate() {
        calib.intrinsics = intrinsics_from_dvec(get(&intr_key(cam_idx))?.as_view())?;
        calib.distortion = distortion_from_dvec(get(&dist_key(cam_idx))?.as_view())?;
        calib.pose = se3_dvec_to_iso3(get(&pose_key(cam_idx))?.as_view())?;
    }

    let mut points = initial.points.clone();
    for (pt_idx, p) in points.iter_mut().enumerate() {
        let v = get(&point_key(pt_idx))?;
        ensure!(v.len() == 3, "point {} has dimension {}", pt_idx, v.len());
        *p = Pt3::new(v[0], v[1], v[2]);
    }

    Ok(NetworkBaResult {
        cameras,
        points,
        final_cost: solution.final_cost,
    })
}
