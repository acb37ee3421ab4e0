use anyhow::{ensure, Result};
use std::collections::HashSet;

/// Identifier for a parameter block in the IR.
///
/// This is stable within a `ProblemIR` instance and is used by residual blocks
/// to reference their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Supported manifold types for parameter blocks.
///
/// Each variant implies an expected ambient parameter dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifoldKind {
    /// Standard Euclidean vector space.
    Euclidean,
    /// SE(3) pose stored as `[qx, qy, qz, qw, tx, ty, tz]`.
    SE3,
}

impl ManifoldKind {
    /// Returns `true` if the given ambient dimension matches the manifold storage.
    pub fn compatible_dim(self, dim: usize) -> bool {
        match self {
            ManifoldKind::Euclidean => true,
            ManifoldKind::SE3 => dim == 7,
        }
    }
}

/// Bounds for a single parameter index.
///
/// Bounds are applied after each update in backends that support them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub idx: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Fixed parameter mask for a block.
///
/// Backends interpret this as per-index fixing for Euclidean blocks. SE3
/// blocks may only be fully free or fully fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    /// Creates a mask with no fixed indices.
    pub fn all_free() -> Self {
        Self {
            fixed_indices: HashSet::new(),
        }
    }

    /// Creates a mask with all indices fixed.
    pub fn all_fixed(dim: usize) -> Self {
        Self {
            fixed_indices: (0..dim).collect(),
        }
    }

    /// Creates a mask from an explicit list of indices.
    pub fn fix_indices(indices: &[usize]) -> Self {
        Self {
            fixed_indices: indices.iter().copied().collect(),
        }
    }

    /// Creates a mask fixing every index from `first_free` onward.
    ///
    /// A camera parameter block freed "up to" its first `first_free` entries
    /// keeps the trailing indices fixed; `first_free == 0` fixes the whole
    /// block and `first_free >= dim` leaves it fully free.
    pub fn fix_tail(first_free: usize, dim: usize) -> Self {
        Self {
            fixed_indices: (first_free.min(dim)..dim).collect(),
        }
    }

    /// Returns `true` if the index is fixed.
    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_indices.contains(&idx)
    }

    /// Returns `true` if all indices `[0, dim)` are fixed.
    pub fn is_all_fixed(&self, dim: usize) -> bool {
        self.fixed_indices.len() == dim
    }

    /// Iterates over fixed indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }

    /// Returns `true` if no indices are fixed.
    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }
}

/// Robust loss applied to a residual block.
///
/// Each residual block has its own loss; per-point robustification is achieved
/// by using one residual block per observation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
    Arctan {
        scale: f64,
    },
}

/// Backend-agnostic factor kinds.
///
/// Each factor kind implies its parameter layout and residual dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Reprojection residual with a 3D point as an optimizable parameter.
    ///
    /// Parameters: [intrinsics, distortion, pose, point]
    /// - intrinsics: `[f, cx, cy, aspect, skew]` (5D Euclidean)
    /// - distortion: `[k1, k2, p1, p2, k3]` (5D Euclidean)
    /// - pose: world-to-camera SE3 `[qx, qy, qz, qw, tx, ty, tz]`
    /// - point: world point `[x, y, z]` (3D Euclidean)
    ReprojIntr5Dist5Se3Point { uv: [f64; 2], w: f64 },
}

impl FactorKind {
    /// Residual dimension implied by the factor.
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::ReprojIntr5Dist5Se3Point { .. } => 2,
        }
    }
}

/// Parameter block definition in the IR.
///
/// This describes the storage layout and constraints for a single variable.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub manifold: ManifoldKind,
    pub fixed: FixedMask,
    pub bounds: Option<Vec<Bound>>,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

/// Backend-agnostic optimization problem representation.
///
/// Backends compile this IR into solver-specific problems.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    /// Creates an empty IR.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        manifold: ManifoldKind,
        fixed: FixedMask,
        bounds: Option<Vec<Bound>>,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            manifold,
            fixed,
            bounds,
        });
        id
    }

    /// Adds a residual block to the IR.
    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Finds a parameter by name.
    pub fn param_by_name(&self, name: &str) -> Option<ParamId> {
        self.params.iter().find(|p| p.name == name).map(|p| p.id)
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                param.manifold.compatible_dim(param.dim),
                "param {} manifold {:?} incompatible with dim {}",
                param.name,
                param.manifold,
                param.dim
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    ensure!(
                        bound.idx < param.dim,
                        "param {} bound index {} out of range",
                        param.name,
                        bound.idx
                    );
                    ensure!(
                        bound.lower <= bound.upper,
                        "param {} bound lower {} > upper {}",
                        param.name,
                        bound.lower,
                        bound.upper
                    );
                }
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }

            match &residual.factor {
                FactorKind::ReprojIntr5Dist5Se3Point { .. } => {
                    ensure!(
                        residual.params.len() == 4,
                        "reprojection factor requires 4 params [intr, dist, pose, point]"
                    );
                    let intr = &self.params[residual.params[0].0];
                    let dist = &self.params[residual.params[1].0];
                    let pose = &self.params[residual.params[2].0];
                    let point = &self.params[residual.params[3].0];
                    ensure!(
                        intr.dim == 5 && intr.manifold == ManifoldKind::Euclidean,
                        "reprojection expects 5D Euclidean intrinsics, got dim={} manifold={:?}",
                        intr.dim,
                        intr.manifold
                    );
                    ensure!(
                        dist.dim == 5 && dist.manifold == ManifoldKind::Euclidean,
                        "reprojection expects 5D Euclidean distortion, got dim={} manifold={:?}",
                        dist.dim,
                        dist.manifold
                    );
                    ensure!(
                        pose.dim == 7 && pose.manifold == ManifoldKind::SE3,
                        "reprojection expects 7D SE3 pose, got dim={} manifold={:?}",
                        pose.dim,
                        pose.manifold
                    );
                    ensure!(
                        point.dim == 3 && point.manifold == ManifoldKind::Euclidean,
                        "reprojection expects 3D Euclidean point, got dim={} manifold={:?}",
                        point.dim,
                        point.manifold
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_tail_masks_trailing_indices() {
        let mask = FixedMask::fix_tail(3, 5);
        assert!(!mask.is_fixed(0));
        assert!(!mask.is_fixed(2));
        assert!(mask.is_fixed(3));
        assert!(mask.is_fixed(4));

        assert!(FixedMask::fix_tail(0, 5).is_all_fixed(5));
        assert!(FixedMask::fix_tail(5, 5).is_empty());
        assert!(FixedMask::fix_tail(9, 5).is_empty());
    }

    #[test]
    fn validate_rejects_wrong_block_shapes() {
        let mut ir = ProblemIR::new();
        let intr = ir.add_param_block(
            "intr/0",
            5,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        let dist = ir.add_param_block(
            "dist/0",
            5,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        // Wrong: pose declared Euclidean.
        let pose = ir.add_param_block(
            "pose/0",
            7,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        let point = ir.add_param_block(
            "pt/0",
            3,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        ir.add_residual_block(ResidualBlock {
            params: vec![intr, dist, pose, point],
            loss: RobustLoss::None,
            factor: FactorKind::ReprojIntr5Dist5Se3Point {
                uv: [0.0, 0.0],
                w: 1.0,
            },
            residual_dim: 2,
        });
        assert!(ir.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_problem() {
        let mut ir = ProblemIR::new();
        let intr = ir.add_param_block(
            "intr/0",
            5,
            ManifoldKind::Euclidean,
            FixedMask::fix_tail(1, 5),
            None,
        );
        let dist = ir.add_param_block(
            "dist/0",
            5,
            ManifoldKind::Euclidean,
            FixedMask::all_fixed(5),
            None,
        );
        let pose = ir.add_param_block("pose/0", 7, ManifoldKind::SE3, FixedMask::all_free(), None);
        let point = ir.add_param_block(
            "pt/0",
            3,
            ManifoldKind::Euclidean,
            FixedMask::all_free(),
            None,
        );
        ir.add_residual_block(ResidualBlock {
            params: vec![intr, dist, pose, point],
            loss: RobustLoss::Huber { scale: 2.0 },
            factor: FactorKind::ReprojIntr5Dist5Se3Point {
                uv: [100.0, 200.0],
                w: 1.0,
            },
            residual_dim: 2,
        });
        ir.validate().unwrap();
        assert_eq!(ir.param_by_name("pose/0"), Some(pose));
    }
}
