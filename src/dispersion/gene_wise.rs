//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use statrs::function::gamma::digamma;

use crate::data::DESeqDataSet;
use crate::dispersion::DispersionParams;
use crate::error::{AnalysisError, Result};
use crate::glm::linalg::{invert_spd, log_det_spd, solve_spd, weighted_gram};
use crate::glm::{create_design_matrix, nb_log_likelihood, nb_weight, MIN_MU};

/// Log likelihood of log(alpha) for one gene, Cox-Reid adjusted, with an
/// optional normal prior on log(alpha)
pub(crate) struct DispersionObjective<'a> {
    pub counts: ArrayView1<'a, f64>,
    pub mu: ArrayView1<'a, f64>,
    pub design: &'a Array2<f64>,
    /// (prior mean of log alpha, prior variance)
    pub prior: Option<(f64, f64)>,
}

impl DispersionObjective<'_> {
    fn weights(&self, alpha: f64) -> Vec<f64> {
        self.mu.iter().map(|&m| nb_weight(m, alpha)).collect()
    }

    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let ll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| nb_log_likelihood(y, m, alpha))
            .sum();
        let cr = -0.5 * log_det_spd(&weighted_gram(self.design, &self.weights(alpha)));
        let prior = match self.prior {
            Some((mean, var)) => -(log_alpha - mean).powi(2) / (2.0 * var),
            None => 0.0,
        };
        ll + cr + prior
    }

    /// Derivative of `log_posterior` with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let r = 1.0 / alpha;

        let d_ll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                let d_r = digamma(y + r) - digamma(r) + (r / (r + m)).ln() + 1.0 - (r + y) / (r + m);
                -r * d_r
            })
            .sum();

        let w = self.weights(alpha);
        let gram_inv = invert_spd(&weighted_gram(self.design, &w));
        let d_cr: f64 = self
            .design
            .rows()
            .into_iter()
            .zip(w.iter())
            .map(|(x, &wj)| wj * wj * x.dot(&gram_inv.dot(&x)))
            .sum::<f64>()
            * 0.5
            * alpha;

        let d_prior = match self.prior {
            Some((mean, var)) => -(log_alpha - mean) / var,
            None => 0.0,
        };
        d_ll + d_cr + d_prior
    }
}

/// Armijo line search over log(alpha)
///
/// Returns the final log(alpha) and whether the search converged before
/// `params.maxit` iterations.
pub(crate) fn line_search(
    objective: &DispersionObjective<'_>,
    start_log_alpha: f64,
    params: &DispersionParams,
) -> (f64, bool) {
    const EPSILON: f64 = 1e-4;
    let min_log_alpha = (params.min_disp / 10.0).ln();

    let mut a = start_log_alpha;
    let mut lp = objective.log_posterior(a);
    let mut dlp = objective.d_log_posterior(a);
    let mut kappa = params.kappa_0;
    let mut accepted = 0usize;

    for _ in 0..params.maxit {
        if !lp.is_finite() || !dlp.is_finite() {
            return (a, false);
        }

        let proposed = a + kappa * dlp;
        if proposed < -30.0 {
            kappa = (-30.0 - a) / dlp;
        }
        if proposed > 10.0 {
            kappa = (10.0 - a) / dlp;
        }

        let theta_kappa = -objective.log_posterior(a + kappa * dlp);
        let theta_hat_kappa = -lp - kappa * EPSILON * dlp * dlp;

        if theta_kappa <= theta_hat_kappa {
            accepted += 1;
            a += kappa * dlp;
            let lp_new = objective.log_posterior(a);
            let change = lp_new - lp;
            lp = lp_new;
            if change < params.disp_tol || a < min_log_alpha {
                return (a, true);
            }
            dlp = objective.d_log_posterior(a);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }
    (a, false)
}

/// Coarse then fine grid over [log(min_disp), log(max_disp)]
pub(crate) fn grid_search(objective: &DispersionObjective<'_>, min_disp: f64, max_disp: f64) -> f64 {
    const POINTS: usize = 20;
    let argmax = |lo: f64, hi: f64| -> (f64, f64) {
        let step = (hi - lo) / (POINTS - 1) as f64;
        (0..POINTS)
            .map(|k| lo + step * k as f64)
            .map(|a| (a, objective.log_posterior(a)))
            .filter(|(_, lp)| lp.is_finite())
            .fold((lo, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
    };

    let (lo, hi) = (min_disp.ln(), max_disp.ln());
    let delta = (hi - lo) / (POINTS - 1) as f64;
    let (coarse, _) = argmax(lo, hi);
    argmax(coarse - delta, coarse + delta).0
}

/// Upper dispersion bound for `n_samples` samples
pub fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Fitted means from least squares on normalized counts, floored at `MIN_MU`
///
/// For a design whose rows are group indicators this is the group mean of
/// the normalized counts, scaled back by each sample's size factor.
pub(crate) fn linear_model_mu(
    normalized: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
) -> Array1<f64> {
    let gram = weighted_gram(design, &vec![1.0; design.nrows()]);
    let beta = solve_spd(&gram, &design.t().dot(&normalized));
    let fitted = design.dot(&beta);
    fitted
        .iter()
        .zip(size_factors.iter())
        .map(|(&f, &s)| (f * s).max(MIN_MU))
        .collect()
}

/// Starting value: the smaller of the residual-based and moments estimates
fn initial_dispersion(normalized: ArrayView1<f64>, design: &Array2<f64>, xim: f64) -> f64 {
    let (m, p) = design.dim();

    let gram = weighted_gram(design, &vec![1.0; m]);
    let fitted = design.dot(&solve_spd(&gram, &design.t().dot(&normalized)));
    let rough = if m > p {
        let est: f64 = normalized
            .iter()
            .zip(fitted.iter())
            .map(|(&y, &f)| {
                let mu = f.max(1.0);
                ((y - mu).powi(2) - mu) / (mu * mu)
            })
            .sum::<f64>()
            / (m - p) as f64;
        est.max(0.0)
    } else {
        f64::INFINITY
    };

    let mean = normalized.mean().unwrap_or(0.0);
    let var = normalized.var(1.0);
    let moments = (var - xim * mean) / (mean * mean);

    rough.min(moments)
}

/// Cox-Reid dispersion estimate for one gene
///
/// Returns NaN for genes without any reads.
pub fn estimate_dispersion_gene<'a>(
    counts: ArrayView1<'a, f64>,
    mu: ArrayView1<'a, f64>,
    normalized: ArrayView1<f64>,
    design: &'a Array2<f64>,
    xim: f64,
    params: &DispersionParams,
) -> f64 {
    if counts.iter().all(|&c| c == 0.0) {
        return f64::NAN;
    }
    let max_disp = max_dispersion(counts.len());

    let init = initial_dispersion(normalized, design, xim);
    let init = if init.is_finite() { init } else { params.min_disp };
    let start = init.clamp(params.min_disp, max_disp).ln();

    let objective = DispersionObjective {
        counts,
        mu,
        design,
        prior: None,
    };

    let (mut log_alpha, converged) = line_search(&objective, start, params);
    if !converged {
        log_alpha = grid_search(&objective, params.min_disp, max_disp);
    }
    log_alpha.exp().clamp(params.min_disp, max_disp)
}

/// Design used for dispersion estimation: the one already attached to the
/// dataset (intercept-only for blind transforms), else built from metadata
pub(crate) fn dispersion_design(dds: &mut DESeqDataSet) -> Result<Array2<f64>> {
    if let Some(design) = dds.design_matrix() {
        return Ok(design.clone());
    }
    let reference = dds.reference_level()?;
    let (design, info) = create_design_matrix(dds.sample_metadata(), dds.design_variable(), &reference)?;
    dds.set_design_matrix(design.clone(), info.coef_names)?;
    Ok(design)
}

/// Estimate gene-wise dispersions and store them with the fitted means
pub fn estimate_gene_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    let design = dispersion_design(dds)?;
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| AnalysisError::DispersionEstimationFailed {
            reason: "Size factors must be estimated first".to_string(),
        })?
        .clone();
    let normalized = dds
        .normalized_counts()
        .ok_or_else(|| AnalysisError::DispersionEstimationFailed {
            reason: "Normalized counts are missing".to_string(),
        })?
        .clone();

    if design.nrows() <= design.ncols() {
        return Err(AnalysisError::DispersionEstimationFailed {
            reason: "the design has as many coefficients as samples; no replicates for dispersion estimation"
                .to_string(),
        });
    }

    let n_genes = dds.n_genes();
    let n_samples = dds.n_samples();
    let xim = size_factors.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;
    let counts = dds.counts().counts();

    log::info!("Estimating gene-wise dispersions for {} genes", n_genes);

    let results: Vec<(f64, Array1<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let mu = linear_model_mu(normalized.row(i), &design, size_factors.view());
            let disp = estimate_dispersion_gene(counts.row(i), mu.view(), normalized.row(i), &design, xim, params);
            (disp, mu)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (d, m)) in results.into_iter().enumerate() {
        dispersions[i] = d;
        mu.row_mut(i).assign(&m);
    }

    log::debug!(
        "Gene-wise dispersions: median {:.4}",
        crate::stats::median(dispersions.as_slice().unwrap_or(&[]))
    );

    dds.set_gene_dispersions(dispersions)?;
    dds.set_mu(mu)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group_design() -> Array2<f64> {
        array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ]
    }

    #[test]
    fn test_linear_model_mu_is_group_mean() {
        let design = two_group_design();
        let norm = array![10.0, 20.0, 30.0, 100.0, 110.0, 120.0];
        let sf = array![1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let mu = linear_model_mu(norm.view(), &design, sf.view());
        assert!((mu[0] - 20.0).abs() < 1e-9);
        assert!((mu[5] - 220.0).abs() < 1e-9);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let design = two_group_design();
        let counts = array![12.0, 30.0, 18.0, 140.0, 90.0, 110.0];
        let mu = array![20.0, 20.0, 20.0, 113.3, 113.3, 113.3];
        let objective = DispersionObjective {
            counts: counts.view(),
            mu: mu.view(),
            design: &design,
            prior: Some((-2.0, 0.5)),
        };
        let a = -1.5;
        let h = 1e-5;
        let numeric = (objective.log_posterior(a + h) - objective.log_posterior(a - h)) / (2.0 * h);
        let analytic = objective.d_log_posterior(a);
        assert!((numeric - analytic).abs() < 1e-4, "{} vs {}", numeric, analytic);
    }

    #[test]
    fn test_more_variable_gene_gets_larger_dispersion() {
        let design = two_group_design();
        let sf = Array1::from_elem(6, 1.0);
        let params = DispersionParams::default();

        let tight = array![100.0, 102.0, 98.0, 200.0, 198.0, 202.0];
        let noisy = array![40.0, 180.0, 80.0, 90.0, 400.0, 110.0];
        let estimate = |c: &Array1<f64>| {
            let mu = linear_model_mu(c.view(), &design, sf.view());
            estimate_dispersion_gene(c.view(), mu.view(), c.view(), &design, 1.0, &params)
        };
        let d_tight = estimate(&tight);
        let d_noisy = estimate(&noisy);
        assert!(d_tight < d_noisy);
        assert!(d_noisy > 0.1 && d_noisy < 10.0);
        assert!(d_tight >= params.min_disp);
    }

    #[test]
    fn test_zero_gene_is_nan() {
        let design = two_group_design();
        let zeros = Array1::zeros(6);
        let mu = Array1::from_elem(6, MIN_MU);
        let d = estimate_dispersion_gene(zeros.view(), mu.view(), zeros.view(), &design, 1.0, &DispersionParams::default());
        assert!(d.is_nan());
    }

    #[test]
    fn test_max_dispersion() {
        assert_eq!(max_dispersion(4), 10.0);
        assert_eq!(max_dispersion(24), 24.0);
    }
}
