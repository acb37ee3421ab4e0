//! Intrinsics and distortion block conversions.
//!
//! The vector orders here define the order in which parameters are freed
//! when a camera is only partially refined: intrinsics `[f, cx, cy, aspect,
//! skew]` and distortion `[k1, k2, p1, p2, k3]`.

use anyhow::{ensure, Result};
use camnet_core::{BrownConrady5, Intrinsics};
use nalgebra::{DVector, DVectorView};

/// Pack intrinsics into a 5D block `[f, cx, cy, aspect, skew]`.
pub fn intrinsics_to_dvec(intr: &Intrinsics) -> DVector<f64> {
    nalgebra::dvector![intr.f, intr.cx, intr.cy, intr.aspect, intr.skew]
}

/// Unpack a 5D intrinsics block.
pub fn intrinsics_from_dvec(v: DVectorView<'_, f64>) -> Result<Intrinsics> {
    ensure!(
        v.len() == 5,
        "expected intrinsics vector of length 5, got {}",
        v.len()
    );
    Ok(Intrinsics {
        f: v[0],
        cx: v[1],
        cy: v[2],
        aspect: v[3],
        skew: v[4],
    })
}

/// Pack distortion into a 5D block `[k1, k2, p1, p2, k3]`.
pub fn distortion_to_dvec(dist: &BrownConrady5) -> DVector<f64> {
    DVector::from_row_slice(&dist.coeffs())
}

/// Unpack a 5D distortion block.
pub fn distortion_from_dvec(v: DVectorView<'_, f64>) -> Result<BrownConrady5> {
    ensure!(
        v.len() == 5,
        "expected distortion vector of length 5, got {}",
        v.len()
    );
    Ok(BrownConrady5::from_coeffs([v[0], v[1], v[2], v[3], v[4]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_block_roundtrip() {
        let intr = Intrinsics {
            f: 850.0,
            aspect: 1.01,
            cx: 512.0,
            cy: 384.0,
            skew: 0.25,
        };
        let back = intrinsics_from_dvec(intrinsics_to_dvec(&intr).as_view()).unwrap();
        assert_eq!(back, intr);
    }

    #[test]
    fn distortion_block_roundtrip() {
        let dist = BrownConrady5 {
            k1: -0.3,
            k2: 0.1,
            p1: 1e-3,
            p2: -2e-3,
            k3: 0.01,
        };
        let back = distortion_from_dvec(distortion_to_dvec(&dist).as_view()).unwrap();
        assert_eq!(back, dist);
    }
}
