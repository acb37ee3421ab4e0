use crate::math::{Real, Vec2};
use serde::{Deserialize, Serialize};

/// Number of fixed-point iterations used by [`BrownConrady5::undistort`].
///
/// The inversion is a fixed-cost approximation, not a convergence-checked
/// solve; callers must tolerate residual error at high distortion.
pub const UNDISTORT_ITERS: usize = 20;

/// Brown-Conrady distortion with radial (`k1 r²`, `k2 r⁴`, `k3 r⁶`) and
/// tangential (`p1`, `p2`) terms, applied to normalized sensor coordinates.
///
/// Coefficient storage follows OpenCV order: `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub p1: Real,
    pub p2: Real,
    pub k3: Real,
}

impl BrownConrady5 {
    /// Coefficients in storage order `(k1, k2, p1, p2, k3)`.
    pub fn coeffs(&self) -> [Real; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Build from coefficients in storage order.
    pub fn from_coeffs(c: [Real; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    /// Apply distortion to normalized sensor coordinates.
    pub fn distort(&self, p: &Vec2) -> Vec2 {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vec2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert distortion by fixed-point iteration.
    ///
    /// Always runs exactly [`UNDISTORT_ITERS`] iterations regardless of
    /// convergence.
    pub fn undistort(&self, p: &Vec2) -> Vec2 {
        let mut q = *p;
        for _ in 0..UNDISTORT_ITERS {
            let d = self.distort(&q);
            q += p - d;
        }
        q
    }

    /// True when all five coefficients are zero.
    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|c| *c == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distortion_is_identity() {
        let d = BrownConrady5::default();
        let p = Vec2::new(0.31, -0.17);
        assert_eq!(d.distort(&p), p);
        assert_eq!(d.undistort(&p), p);
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = BrownConrady5 {
            k1: -0.28,
            k2: 0.07,
            p1: 1e-4,
            p2: -2e-4,
            k3: 0.0,
        };
        let p = Vec2::new(0.25, -0.2);
        let dist = d.distort(&p);
        let back = d.undistort(&dist);
        assert!(
            (back - p).norm() < 1e-8,
            "fixed-point inversion residual too large: {}",
            (back - p).norm()
        );
    }

    #[test]
    fn coeff_roundtrip() {
        let d = BrownConrady5 {
            k1: 0.1,
            k2: -0.2,
            p1: 0.3,
            p2: -0.4,
            k3: 0.5,
        };
        assert_eq!(BrownConrady5::from_coeffs(d.coeffs()), d);
    }
}
