//! Residual factor models shared by backend adapters.

pub mod reprojection_model;
