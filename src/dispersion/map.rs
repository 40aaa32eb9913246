//! MAP (Maximum A Posteriori) dispersion estimation
//!
//! Empirical Bayes shrinkage of the gene-wise estimates toward the fitted
//! trend, with a log-normal prior whose width is estimated from the spread of
//! the gene-wise estimates around the trend.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use super::gene_wise::{grid_search, line_search, max_dispersion, DispersionObjective};
use crate::data::DESeqDataSet;
use crate::dispersion::DispersionParams;
use crate::error::{AnalysisError, Result};
use crate::stats::{mad_squared, trigamma};

/// Lower bound on the prior variance of log dispersion
const MIN_PRIOR_VAR: f64 = 0.25;

/// Shrink gene-wise dispersions toward the trend
///
/// Reuses the fitted means stored during gene-wise estimation. Upper outliers
/// (gene-wise estimate more than `outlier_sd` standard deviations above the
/// trend on the log scale) keep their gene-wise value.
pub fn estimate_map_dispersions(dds: &mut DESeqDataSet, params: &DispersionParams) -> Result<()> {
    let missing = |what: &str| AnalysisError::DispersionEstimationFailed {
        reason: format!("{} required for MAP estimation", what),
    };
    let gene_dispersions = dds.gene_dispersions().ok_or_else(|| missing("Gene-wise dispersions"))?.clone();
    let trended = dds.trended_dispersions().ok_or_else(|| missing("Trended dispersions"))?.clone();
    let mu = dds.mu().ok_or_else(|| missing("Fitted means"))?.clone();
    let design = dds.design_matrix().ok_or_else(|| missing("Design matrix"))?.clone();

    let (n_samples, n_coef) = design.dim();
    let (prior_var, var_log_disp_ests) = estimate_prior_variance(
        gene_dispersions.view(),
        trended.view(),
        n_samples,
        n_coef,
        params.min_disp,
    );
    log::debug!(
        "MAP prior variance {:.4} (varLogDispEsts {:.4})",
        prior_var,
        var_log_disp_ests
    );

    let counts = dds.counts().counts();
    let max_disp = max_dispersion(n_samples);
    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();

    let map: Vec<(f64, bool)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let (g, t) = (gene_dispersions[i], trended[i]);
            if is_upper_outlier(g, t, threshold) {
                return (g, true);
            }
            let d = fit_map_dispersion(counts.row(i), mu.row(i), &design, g, t, prior_var, max_disp, params);
            (d, false)
        })
        .collect();

    let n_outliers = map.iter().filter(|(_, o)| *o).count();
    log::info!(
        "Shrank dispersions toward the trend ({} upper outliers kept gene-wise)",
        n_outliers
    );

    dds.set_dispersion_prior_var(prior_var);
    dds.set_map_dispersions(map.into_iter().map(|(d, _)| d).collect::<Array1<f64>>())?;
    Ok(())
}

fn is_upper_outlier(gene: f64, trend: f64, threshold: f64) -> bool {
    gene.is_finite()
        && trend.is_finite()
        && gene > 0.0
        && trend > 0.0
        && gene.ln() - trend.ln() > threshold
}

/// Prior variance of log dispersion and the observed variance of the log
/// residuals, `(dispPriorVar, varLogDispEsts)`
///
/// Only genes whose gene-wise estimate is clear of the lower bound enter the
/// residuals. The expected sampling variance, trigamma((m - p) / 2), is
/// subtracted from the observed MAD^2.
pub fn estimate_prior_variance(
    gene_dispersions: ArrayView1<f64>,
    trended: ArrayView1<f64>,
    n_samples: usize,
    n_coef: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended.iter())
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coef {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }
    let expected = trigamma((n_samples - n_coef) as f64 / 2.0);
    ((var_log_disp_ests - expected).max(MIN_PRIOR_VAR), var_log_disp_ests)
}

/// Posterior mode of the dispersion for one gene
///
/// Starts from the gene-wise estimate unless it sits below a tenth of the
/// trend. Genes without a defined trend (no reads) stay NaN.
#[allow(clippy::too_many_arguments)]
pub fn fit_map_dispersion<'a>(
    counts: ArrayView1<'a, f64>,
    mu: ArrayView1<'a, f64>,
    design: &'a Array2<f64>,
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    if !(trend_disp.is_finite() && trend_disp > 0.0) || counts.iter().all(|&c| c == 0.0) {
        return f64::NAN;
    }

    let init = if gene_disp.is_finite() && gene_disp > 0.1 * trend_disp {
        gene_disp
    } else {
        trend_disp
    };

    let objective = DispersionObjective {
        counts,
        mu,
        design,
        prior: Some((trend_disp.ln(), prior_var)),
    };

    let start = init.clamp(params.min_disp, max_disp).ln();
    let (mut log_alpha, converged) = line_search(&objective, start, params);
    if !converged {
        log_alpha = grid_search(&objective, params.min_disp, max_disp);
    }
    log_alpha.exp().clamp(params.min_disp, max_disp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn design() -> Array2<f64> {
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
    fn test_map_lies_between_gene_and_trend() {
        let counts = array![60.0, 150.0, 90.0, 120.0, 260.0, 180.0];
        let mu = array![100.0, 100.0, 100.0, 186.7, 186.7, 186.7];
        let params = DispersionParams::default();
        let design = design();

        let unshrunk = {
            let objective = DispersionObjective {
                counts: counts.view(),
                mu: mu.view(),
                design: &design,
                prior: None,
            };
            line_search(&objective, (0.1_f64).ln(), &params).0.exp()
        };
        let trend = 0.01;
        let map = fit_map_dispersion(counts.view(), mu.view(), &design, unshrunk, trend, 0.5, 10.0, &params);
        assert!(map < unshrunk, "map {} gene {}", map, unshrunk);
        assert!(map > trend, "map {} trend {}", map, trend);
    }

    #[test]
    fn test_narrow_prior_pins_to_trend() {
        let counts = array![60.0, 150.0, 90.0, 120.0, 260.0, 180.0];
        let mu = array![100.0, 100.0, 100.0, 186.7, 186.7, 186.7];
        let params = DispersionParams::default();
        let map = fit_map_dispersion(counts.view(), mu.view(), &design(), 0.2, 0.05, 1e-4, 10.0, &params);
        assert!((map.ln() - 0.05_f64.ln()).abs() < 0.1);
    }

    #[test]
    fn test_prior_variance_floor() {
        let gene = array![0.1, 0.11, 0.09, 0.1, 0.1, 1e-8];
        let trend = array![0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let (prior_var, observed) = estimate_prior_variance(gene.view(), trend.view(), 6, 2, 1e-8);
        assert_eq!(prior_var, MIN_PRIOR_VAR);
        assert!(observed < 0.05);
    }

    #[test]
    fn test_prior_variance_subtracts_sampling_variance() {
        let gene: Array1<f64> = (0..50).map(|i| 0.1 * ((i as f64 - 25.0) / 8.0).exp()).collect();
        let trend = Array1::from_elem(50, 0.1);
        let (prior_var, observed) = estimate_prior_variance(gene.view(), trend.view(), 20, 2, 1e-8);
        let expected = trigamma(9.0);
        assert!((prior_var - (observed - expected)).abs() < 1e-12);
    }

    #[test]
    fn test_upper_outlier() {
        assert!(is_upper_outlier(2.0, 0.1, 1.0));
        assert!(!is_upper_outlier(0.15, 0.1, 1.0));
        assert!(!is_upper_outlier(f64::NAN, 0.1, 1.0));
    }
}
