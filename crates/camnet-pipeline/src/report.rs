//! Reconstruction-error reporting.

use camnet_core::{CamId, GridId, Real};
use serde::Serialize;
use tracing::info;

use crate::state::NetworkState;

/// Reprojection-error summary for one set camera, over every world point
/// and triangulated aux match it observes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CamReconError {
    pub cam: CamId,
    pub count: usize,
    pub min: Real,
    pub mean: Real,
    pub median: Real,
    pub max: Real,
}

fn summarize(cam: CamId, mut errors: Vec<Real>) -> CamReconError {
    errors.sort_by(|a, b| a.total_cmp(b));
    let count = errors.len();
    if count == 0 {
        return CamReconError {
            cam,
            count,
            min: 0.0,
            mean: 0.0,
            median: 0.0,
            max: 0.0,
        };
    }
    CamReconError {
        cam,
        count,
        min: errors[0],
        mean: errors.iter().sum::<Real>() / count as Real,
        median: errors[count / 2],
        max: errors[count - 1],
    }
}

/// Residuals of one camera against the current reconstruction.
///
/// Points that project behind the camera are skipped rather than counted
/// as infinite errors.
fn camera_errors(state: &NetworkState, cam: CamId) -> Vec<Real> {
    let calib = &state.calibs[cam.0];
    let mut errors = Vec::new();
    for g in state.grids.grid_ids() {
        if !state.is_grid_set(g) {
            continue;
        }
        for gp in state.grids.view(cam, g) {
            if let Some(wp) = state.world_point(g, gp.row, gp.col) {
                if let Some(px) = calib.project(&wp.p) {
                    errors.push((px - gp.pi).norm());
                }
            }
        }
    }
    for m in &state.matches {
        if let (Some(p3), Some(obs)) = (m.p3d, m.observation(cam)) {
            if let Some(px) = calib.project(&p3) {
                errors.push((px - obs).norm());
            }
        }
    }
    errors
}

/// Per-camera reprojection-error statistics, sorted worst mean first.
pub fn calc_recon_error(state: &NetworkState) -> Vec<CamReconError> {
    let mut report: Vec<CamReconError> = state
        .set_cams()
        .into_iter()
        .map(|cam| summarize(cam, camera_errors(state, cam)))
        .collect();
    report.sort_by(|a, b| b.mean.total_cmp(&a.mean));
    for e in &report {
        info!(
            cam = %e.cam,
            count = e.count,
            min = e.min,
            mean = e.mean,
            median = e.median,
            max = e.max,
            "reconstruction error"
        );
    }
    report
}

/// Mean reprojection error per (grid, camera) pair, for the diagnostic
/// error file. Only set grids and set cameras appear.
pub fn grid_errors(state: &NetworkState) -> Vec<(GridId, CamId, Real)> {
    let mut out = Vec::new();
    for g in state.grids.grid_ids() {
        if !state.is_grid_set(g) {
            continue;
        }
        for cam in state.set_cams() {
            let calib = &state.calibs[cam.0];
            let mut sum = 0.0;
            let mut n = 0usize;
            for gp in state.grids.view(cam, g) {
                if let Some(wp) = state.world_point(g, gp.row, gp.col) {
                    if let Some(px) = calib.project(&wp.p) {
                        sum += (px - gp.pi).norm();
                        n += 1;
                    }
                }
            }
            if n > 0 {
                out.push((g, cam, sum / n as Real));
            }
        }
    }
    out
}
