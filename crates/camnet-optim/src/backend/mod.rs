//! Solver layer: turns a validated [`ProblemIR`](crate::ir::ProblemIR) into
//! a tiny-solver problem and runs Levenberg-Marquardt on it.
//!
//! The IR stays solver-agnostic; everything tiny-solver-specific (manifold
//! registration, per-index fixing, loss construction) lives in the adapter
//! behind [`solve_ir`].

mod tiny_solver_backend;

pub use tiny_solver_backend::solve_ir;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Termination and verbosity settings for one solve.
///
/// The decrease thresholds are deliberately tight: point-settling rounds
/// start close to the optimum, where per-iteration cost decreases are tiny
/// long before the residual itself is small. Loose thresholds make those
/// solves stop early with points visibly off their rays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Iteration cap for the Levenberg-Marquardt loop.
    pub max_iters: usize,
    /// tiny-solver verbosity level.
    pub verbosity: usize,
    /// Linear solver for the normal equations.
    pub linear_solver: LinearSolverKind,
    /// Stop when the absolute cost decrease falls below this.
    pub min_abs_decrease: f64,
    /// Stop when the relative cost decrease falls below this.
    pub min_rel_decrease: f64,
    /// Stop when the cost itself falls below this.
    pub min_error: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            verbosity: 0,
            linear_solver: LinearSolverKind::SparseCholesky,
            min_abs_decrease: 1e-12,
            min_rel_decrease: 1e-12,
            min_error: 1e-16,
        }
    }
}

/// Linear solver for the inner normal-equation solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    SparseCholesky,
    SparseQR,
}

/// Optimized parameters keyed by IR block name, plus the final cost.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub params: HashMap<String, DVector<f64>>,
    /// Unrobustified half sum of squared residuals at the solution.
    pub final_cost: f64,
}
