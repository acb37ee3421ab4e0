//! Closed-form geometric estimators used to bootstrap the camera network:
//! DLT homography, planar pose, Zhang intrinsics, PnP (+RANSAC), epipolar
//! geometry, and linear triangulation.

pub mod epipolar;
pub mod homography;
pub mod intrinsics;
pub mod planar_pose;
pub mod pnp;
pub mod triangulation;

pub use epipolar::{
    decompose_essential, essential_from_fundamental, fundamental_8point, recover_pose,
};
pub use homography::{dlt_homography, HomographyError};
pub use intrinsics::{intrinsics_from_homographies, IntrinsicsError};
pub use planar_pose::{estimate_planar_pose, pose_from_homography};
pub use pnp::{pnp_dlt, pnp_dlt_ransac};
pub use triangulation::triangulate_point_linear;
