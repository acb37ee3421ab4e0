//! Camera model: intrinsics, Brown-Conrady distortion, and the combined
//! per-camera [`Calibration`].

pub mod calibration;
pub mod distortion;
pub mod intrinsics;

pub use calibration::Calibration;
pub use distortion::{BrownConrady5, UNDISTORT_ITERS};
pub use intrinsics::Intrinsics;
