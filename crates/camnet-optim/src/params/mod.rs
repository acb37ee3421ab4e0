//! Parameter-block conversions between core types and solver vectors.

mod camera;
mod pose_se3;

pub use camera::{
    distortion_from_dvec, distortion_to_dvec, intrinsics_from_dvec, intrinsics_to_dvec,
};
pub use pose_se3::{iso3_to_se3_dvec, se3_dvec_to_iso3};
