//! tiny-solver adapter: IR compilation and the Levenberg-Marquardt run.

use crate::backend::{LinearSolverKind, SolveResult, SolverOptions};
use crate::factors::reprojection_model::reproj_residual_intr5_dist5_se3_point_generic;
use crate::ir::{FactorKind, ManifoldKind, ProblemIR, RobustLoss};
use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{ArctanLoss, CauchyLoss, HuberLoss, Loss};
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

/// Solve a validated IR with tiny-solver Levenberg-Marquardt.
///
/// Errors on a malformed IR or missing initial values; a solver run that
/// produces no solution comes back as an error too, so callers can treat
/// "did not converge" uniformly.
pub fn solve_ir(
    ir: &ProblemIR,
    initial: &HashMap<String, DVector<f64>>,
    opts: &SolverOptions,
) -> Result<SolveResult> {
    let problem = compile(ir, initial)?;
    let optimizer = LevenbergMarquardtOptimizer::default();
    let solution = optimizer
        .optimize(&problem, initial, Some(to_optimizer_options(opts)))
        .ok_or_else(|| anyhow!("tiny-solver failed to converge"))?;

    let param_blocks = problem.initialize_parameter_blocks(&solution);
    let residuals = problem.compute_residuals(&param_blocks, true);
    let final_cost = 0.5 * residuals.as_ref().squared_norm_l2();

    Ok(SolveResult {
        params: solution,
        final_cost,
    })
}

/// Build the tiny-solver problem: residual blocks, manifolds, fixed
/// indices, and bounds.
///
/// SE(3) blocks get the quaternion manifold unless fully fixed; tiny-solver
/// cannot partially fix a manifold block, so a partial SE(3) mask is an
/// error rather than a silent Euclidean fallback.
fn compile(ir: &ProblemIR, initial: &HashMap<String, DVector<f64>>) -> Result<Problem> {
    ir.validate()?;

    let mut problem = Problem::new();

    for param in &ir.params {
        let init = initial.get(&param.name).ok_or_else(|| {
            anyhow!(
                "initial values missing parameter {} (id {:?})",
                param.name,
                param.id
            )
        })?;
        ensure!(
            init.len() == param.dim,
            "initial dimension mismatch for {}: expected {}, got {}",
            param.name,
            param.dim,
            init.len()
        );

        match param.manifold {
            ManifoldKind::Euclidean => {}
            ManifoldKind::SE3 => {
                if param.fixed.is_empty() {
                    problem.set_variable_manifold(&param.name, Arc::new(SE3Manifold));
                } else if !param.fixed.is_all_fixed(param.dim) {
                    return Err(anyhow!(
                        "tiny-solver cannot partially fix SE3 manifold {}",
                        param.name
                    ));
                }
            }
        }

        for idx in param.fixed.iter() {
            problem.fix_variable(&param.name, idx);
        }

        if let Some(bounds) = &param.bounds {
            for bound in bounds {
                problem.set_variable_bounds(&param.name, bound.idx, bound.lower, bound.upper);
            }
        }
    }

    for residual in &ir.residuals {
        let (factor, loss) = compile_factor(residual)?;
        let param_names: Vec<String> = residual
            .params
            .iter()
            .map(|id| ir.params[id.0].name.clone())
            .collect();
        let param_refs: Vec<&str> = param_names.iter().map(|s| s.as_str()).collect();
        problem.add_residual_block(residual.residual_dim, &param_refs, factor, loss);
    }

    Ok(problem)
}

fn to_optimizer_options(opts: &SolverOptions) -> OptimizerOptions {
    OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        linear_solver_type: match opts.linear_solver {
            LinearSolverKind::SparseCholesky => LinearSolverType::SparseCholesky,
            LinearSolverKind::SparseQR => LinearSolverType::SparseQR,
        },
        min_abs_error_decrease_threshold: opts.min_abs_decrease,
        min_rel_error_decrease_threshold: opts.min_rel_decrease,
        min_error_threshold: opts.min_error,
        ..OptimizerOptions::default()
    }
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
        RobustLoss::Arctan { scale } => {
            ensure!(scale > 0.0, "Arctan scale must be positive");
            Ok(Some(Box::new(ArctanLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn compile_factor(residual: &crate::ir::ResidualBlock) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    match &residual.factor {
        FactorKind::ReprojIntr5Dist5Se3Point { uv, w } => {
            let factor = TinyReprojPointFactor { uv: *uv, w: *w };
            Ok((Box::new(factor), loss))
        }
    }
}

#[derive(Debug, Clone)]
struct TinyReprojPointFactor {
    uv: [f64; 2],
    w: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyReprojPointFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(
            params.len(),
            4,
            "expected [intr, dist, pose, point] parameter blocks"
        );
        let r = reproj_residual_intr5_dist5_se3_point_generic(
            params[0].as_view(), // intrinsics
            params[1].as_view(), // distortion
            params[2].as_view(), // pose
            params[3].as_view(), // point
            self.uv,
            self.w,
        );
        DVector::from_row_slice(r.as_slice())
    }
}
