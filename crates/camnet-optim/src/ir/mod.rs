//! Backend-agnostic optimization problem representation.

mod types;

pub use types::{
    Bound, FactorKind, FixedMask, ManifoldKind, ParamBlock, ParamId, ProblemIR, ResidualBlock,
    RobustLoss,
};
