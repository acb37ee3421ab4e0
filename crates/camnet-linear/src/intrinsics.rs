use camnet_core::{Intrinsics, Mat3, Real};
use nalgebra::{DMatrix, SVector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntrinsicsError {
    #[error("need at least 3 homographies, got {0}")]
    NotEnoughHomographies(usize),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate homography set")]
    Degenerate,
}

/// The 6-vector v_ij built from columns i and j of a plane homography,
/// expressing h_i^T B h_j in terms of the packed symmetric B = K^-T K^-1.
fn v_ij(h: &Mat3, i: usize, j: usize) -> SVector<Real, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<Real, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Estimate camera intrinsics from plane-to-image homographies with Zhang's
/// closed-form method.
///
/// Each homography contributes the two constraints v_12^T b = 0 and
/// (v_11 - v_22)^T b = 0 on the packed image of the absolute conic; the
/// stacked system is solved by SVD and K is extracted in closed form.
/// Needs at least three homographies with distinct plane orientations.
pub fn intrinsics_from_homographies(hs: &[Mat3]) -> Result<Intrinsics, IntrinsicsError> {
    if hs.len() < 3 {
        return Err(IntrinsicsError::NotEnoughHomographies(hs.len()));
    }

    let mut vmtx = DMatrix::<Real>::zeros(2 * hs.len(), 6);
    for (k, h) in hs.iter().enumerate() {
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        let v12 = v_ij(h, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(IntrinsicsError::SvdFailed)?;
    let b = v_t.row(v_t.nrows() - 1);

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    if denom_norm <= 0.0 || denom.abs() / denom_norm <= 1e-6 {
        return Err(IntrinsicsError::Degenerate);
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return Err(IntrinsicsError::Degenerate);
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(Intrinsics {
        f: alpha,
        aspect: beta / alpha,
        cx: u0,
        cy: v0,
        skew: gamma,
    })
}
