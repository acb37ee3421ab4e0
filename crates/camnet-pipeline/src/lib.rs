//! Incremental camera-network calibration pipeline.
//!
//! The pipeline grows the set of cameras and grids with known 3D geometry
//! iteration by iteration: solve grid poses from already-placed cameras,
//! triangulate auxiliary matches, place new cameras from the accumulated
//! 3D correspondences, refine with bundle adjustment, correct scale drift,
//! and pick the next cameras to add. Each stage is an explicit step function
//! over a [`NetworkState`] value so the monotonic-growth and discard-on-
//! failure behaviors are directly testable.

pub mod ba;
pub mod calibrate;
pub mod config;
pub mod io;
pub mod report;
pub mod state;
pub mod steps;

pub use ba::bundle_adjust;
pub use calibrate::calibrate;
pub use config::NetworkConfig;
pub use report::{calc_recon_error, CamReconError};
pub use state::NetworkState;
pub use steps::{
    bootstrap_intrinsics, check_and_fix_scale, compute_sharing, estimate_cam_pos,
    estimate_cam_pos_from_f, estimate_grid_pose, filter_matches_with_calib,
    initialise_aux_matches, initialise_cams, initialise_grids, pick_cameras, EstimationResult,
};
