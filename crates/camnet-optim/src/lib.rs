//! Non-linear optimization for camera networks built on tiny-solver.
//!
//! The crate is split into a solver-agnostic problem IR, residual factor
//! models, parameter-block conversions, and the network bundle-adjustment
//! problem builder. The backend module compiles the IR into a tiny-solver
//! problem and runs it.

pub mod backend;
pub mod factors;
pub mod ir;
pub mod params;
pub mod problems;

pub use backend::{solve_ir, LinearSolverKind, SolveResult, SolverOptions};
pub use ir::{FactorKind, FixedMask, ManifoldKind, ParamId, ProblemIR, ResidualBlock, RobustLoss};
pub use problems::network::{
    build_network_ba_ir, optimize_network_ba, BaMode, NetworkBaDataset, NetworkBaInit,
    NetworkBaObservation, NetworkBaOptions, NetworkBaResult, VALID_DISTORTION_COUNTS,
    VALID_INTRINSICS_COUNTS,
};
