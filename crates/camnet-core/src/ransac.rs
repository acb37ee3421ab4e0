//! Generic, model-agnostic RANSAC engine.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The engine never
//! panics: when no consensus is found it returns a [`RansacResult`] with
//! `success == false` and `model == None`.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Configuration for the RANSAC engine.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Inlier residual threshold (same units as [`Estimator::residual`]).
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired confidence in `[0, 1]` for finding a good model.
    pub confidence: f64,
    /// RNG seed, for reproducibility.
    pub seed: u64,
    /// Refit the model on the full inlier set before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            thresh: 2.0,
            min_inliers: 4,
            confidence: 0.99,
            seed: 20_2020,
            refit_on_inliers: true,
        }
    }
}

/// Output of a RANSAC run. Check `success` before using the model.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Indices of inlier data points.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Iterations actually performed.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// Model estimator for the RANSAC engine.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal sample size needed to fit a model.
    const MIN_SAMPLES: usize;

    /// Fit a model from the given sample indices; `None` when degenerate.
    fn fit(data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual for a single datum.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Optional degeneracy check on a sample subset.
    fn is_degenerate(_data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Optional refit over the full inlier set.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

/// Dynamic iteration bound from the current inlier ratio.
fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powf(min_samples as f64)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n.clamp(iters_so_far, max_iters)
}

fn collect_inliers<E: Estimator>(
    data: &[E::Datum],
    model: &E::Model,
    thresh: f64,
    inliers: &mut Vec<usize>,
    residuals: &mut Vec<f64>,
) {
    inliers.clear();
    residuals.clear();
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
}

/// Run the RANSAC loop for a given [`Estimator`].
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();
    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; E::MIN_SAMPLES];
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut inliers = Vec::new();
    let mut residuals = Vec::new();

    let mut dynamic_max = opts.max_iters;
    let mut iters = 0;
    while iters < dynamic_max {
        iters += 1;
        all_indices
            .as_slice()
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .enumerate()
            .for_each(|(k, &idx)| sample[k] = idx);

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        collect_inliers::<E>(data, &model, opts.thresh, &mut inliers, &mut residuals);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut final_model = model;
        if opts.refit_on_inliers {
            if let Some(refit) = E::refit(data, &inliers) {
                final_model = refit;
                collect_inliers::<E>(
                    data,
                    &final_model,
                    opts.thresh,
                    &mut inliers,
                    &mut residuals,
                );
            }
        }

        let score = rms(&residuals);
        let better = !best.success
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && score < best.inlier_rms);
        if better {
            best.success = true;
            best.model = Some(final_model);
            best.inliers = inliers.clone();
            best.inlier_rms = score;
            best.iters = iters;
        }

        let ratio = inliers.len() as f64 / data.len() as f64;
        dynamic_max = adaptive_iterations(
            opts.confidence,
            ratio,
            E::MIN_SAMPLES,
            iters,
            opts.max_iters,
        );
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fit the mean of 1D samples; residual is the absolute deviation.
    struct MeanEstimator;

    impl Estimator for MeanEstimator {
        type Datum = f64;
        type Model = f64;

        const MIN_SAMPLES: usize = 1;

        fn fit(data: &[f64], sample_indices: &[usize]) -> Option<f64> {
            Some(data[sample_indices[0]])
        }

        fn residual(model: &f64, datum: &f64) -> f64 {
            (datum - model).abs()
        }

        fn refit(data: &[f64], inliers: &[usize]) -> Option<f64> {
            if inliers.is_empty() {
                return None;
            }
            Some(inliers.iter().map(|&i| data[i]).sum::<f64>() / inliers.len() as f64)
        }
    }

    #[test]
    fn finds_consensus_despite_outliers() {
        let mut data: Vec<f64> = (0..20).map(|i| 5.0 + 0.01 * (i % 3) as f64).collect();
        data.extend_from_slice(&[-40.0, 120.0, 77.0]);

        let opts = RansacOptions {
            thresh: 0.05,
            min_inliers: 15,
            ..RansacOptions::default()
        };
        let res = ransac::<MeanEstimator>(&data, &opts);
        assert!(res.success);
        let m = res.model.unwrap();
        assert!((m - 5.01).abs() < 0.05, "mean off: {m}");
        assert_eq!(res.inliers.len(), 20);
    }

    #[test]
    fn insufficient_data_fails_cleanly() {
        let res = ransac::<MeanEstimator>(&[], &RansacOptions::default());
        assert!(!res.success);
        assert!(res.model.is_none());
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let data: Vec<f64> = (0..30).map(|i| if i % 5 == 0 { 50.0 } else { 1.0 }).collect();
        let opts = RansacOptions {
            thresh: 0.5,
            min_inliers: 10,
            ..RansacOptions::default()
        };
        let a = ransac::<MeanEstimator>(&data, &opts);
        let b = ransac::<MeanEstimator>(&data, &opts);
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iters, b.iters);
    }
}
