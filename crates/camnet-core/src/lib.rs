//! Core primitives for the `camnet` camera-network calibration toolkit.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - ray-geometry primitives (least-squares ray intersection, ray distances),
//! - the camera model ([`Calibration`] = intrinsics + distortion + pose),
//! - the observation data model (grid points, auxiliary matches, world points),
//! - a generic RANSAC engine (`ransac`, [`Estimator`]).

/// Linear algebra type aliases and ray geometry.
pub mod math;
/// Camera model: intrinsics, distortion, calibration.
pub mod models;
/// Grid observations, auxiliary matches, world points.
pub mod observations;
/// Generic RANSAC engine and traits.
pub mod ransac;

pub use math::*;
pub use models::*;
pub use observations::*;
pub use ransac::*;
