//! The incremental calibration driver.
//!
//! Grows the network outwards from a root camera: each round solves the
//! grids visible to the anchored cameras, triangulates auxiliary matches,
//! places the round's candidate cameras, and refines everything jointly
//! before asking for the next candidates. A final sweep re-optimizes with
//! progressively more intrinsic parameters released.

use anyhow::{ensure, Result};
use camnet_core::{CamId, Iso3};
use camnet_optim::{BaMode, VALID_DISTORTION_COUNTS, VALID_INTRINSICS_COUNTS};
use tracing::info;

use crate::ba::bundle_adjust;
use crate::config::NetworkConfig;
use crate::report::{calc_recon_error, CamReconError};
use crate::state::NetworkState;
use crate::steps::{
    bootstrap_intrinsics, check_and_fix_scale, filter_matches_with_calib, initialise_aux_matches,
    initialise_cams, initialise_grids, pick_cameras,
};

/// Run the full incremental calibration and return the per-camera
/// reconstruction-error report.
pub fn calibrate(state: &mut NetworkState, cfg: &NetworkConfig) -> Result<Vec<CamReconError>> {
    if !cfg.use_existing_intrinsics {
        let n = bootstrap_intrinsics(state, cfg)?;
        info!(cameras = n, "intrinsics bootstrapped from grid views");
    }
    if cfg.intrinsics_only {
        for calib in &mut state.calibs {
            calib.pose = Iso3::identity();
        }
        return Ok(Vec::new());
    }

    let mut fixed: Vec<CamId> = Vec::new();
    let mut vari: Vec<CamId> = Vec::new();

    let mut done = pick_cameras(state, cfg, &mut fixed, &mut vari)?;
    let mut first_iter = true;
    let mut round = 0usize;
    while !done {
        round += 1;
        info!(round, ?fixed, ?vari, "calibration round");

        initialise_grids(state, cfg, &vari);
        filter_matches_with_calib(state, cfg);
        if initialise_aux_matches(state) > 0 {
            bundle_adjust(state, cfg, BaMode::PointsOnly, &fixed, &vari, 0, 0)?;
        }

        let targets: Vec<CamId> = fixed.iter().chain(vari.iter()).copied().collect();
        initialise_cams(state, cfg, &targets);

        // The first round has a single anchored camera and freshly solved
        // grids; a joint solve there only locks in the bootstrap error.
        if !first_iter {
            bundle_adjust(state, cfg, BaMode::CamerasAndPoints, &fixed, &vari, 0, 0)?;
            check_and_fix_scale(state, cfg);
        }
        first_iter = false;

        done = pick_cameras(state, cfg, &mut fixed, &mut vari)?;
    }

    ensure!(!fixed.is_empty(), "calibration finished without a root camera");
    final_sweep(state, cfg, fixed[0])?;

    Ok(calc_recon_error(state))
}

/// Joint refinements over every placed camera, anchored on the root.
///
/// Starts with extrinsics plus focal length, then, when intrinsic solving
/// is enabled, walks the legal release counts from none to all, rescaling
/// after every pass.
fn final_sweep(state: &mut NetworkState, cfg: &NetworkConfig, root: CamId) -> Result<()> {
    let anchor = [root];
    let movers: Vec<CamId> = state
        .set_cams()
        .into_iter()
        .filter(|&c| c != root)
        .collect();
    if movers.is_empty() {
        return Ok(());
    }

    bundle_adjust(state, cfg, BaMode::CamerasAndPoints, &anchor, &movers, 1, 0)?;
    check_and_fix_scale(state, cfg);

    if cfg.solve_intrinsics {
        for &num_intr in &VALID_INTRINSICS_COUNTS {
            for &num_dist in &VALID_DISTORTION_COUNTS {
                bundle_adjust(
                    state,
                    cfg,
                    BaMode::CamerasAndPoints,
                    &anchor,
                    &movers,
                    num_intr,
                    num_dist,
                )?;
                check_and_fix_scale(state, cfg);
            }
        }
    }
    Ok(())
}
