//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array1, Array2, Array3, ArrayView1};
use rayon::prelude::*;

use super::design::{create_design_matrix, DesignInfo};
use super::linalg::{invert_spd, solve_spd, weighted_gram};
use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};

/// Ridge penalty on the natural-log scale (1e-6 on the log2 scale)
fn ridge_lambda() -> f64 {
    let ln2 = std::f64::consts::LN_2;
    1e-6 / (ln2 * ln2)
}

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change treated as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Fit of one gene
#[derive(Debug, Clone)]
pub struct GlmFitResult {
    /// Natural-log scale coefficients
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub covariance: Array2<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub mu: Array1<f64>,
    pub log_likelihood: f64,
}

impl GlmFitResult {
    fn undefined(n_samples: usize, n_coefs: usize) -> Self {
        Self {
            coefficients: Array1::from_elem(n_coefs, f64::NAN),
            standard_errors: Array1::from_elem(n_coefs, f64::NAN),
            covariance: Array2::from_elem((n_coefs, n_coefs), f64::NAN),
            converged: true,
            iterations: 0,
            mu: Array1::zeros(n_samples),
            log_likelihood: f64::NAN,
        }
    }
}

/// Fit the NB GLM for every gene with the dataset's final dispersions
pub fn fit_glm(dds: &mut DESeqDataSet, params: &GlmFitParams) -> Result<DesignInfo> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| AnalysisError::GlmFitFailed {
            reason: "Size factors must be estimated first".to_string(),
        })?
        .clone();
    let dispersions = dds
        .dispersions()
        .ok_or_else(|| AnalysisError::GlmFitFailed {
            reason: "Dispersions must be estimated first".to_string(),
        })?
        .clone();

    let reference = dds.reference_level()?;
    let (design, info) = create_design_matrix(dds.sample_metadata(), dds.design_variable(), &reference)?;

    let n_genes = dds.n_genes();
    let n_coefs = design.ncols();
    let counts = dds.counts().counts();

    log::info!("Fitting negative binomial GLM for {} genes", n_genes);

    let results: Vec<GlmFitResult> = (0..n_genes)
        .into_par_iter()
        .map(|i| fit_single_gene(counts.row(i), &design, size_factors.view(), dispersions[i], params))
        .collect();

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut standard_errors = Array2::zeros((n_genes, n_coefs));
    let mut covariances = Array3::zeros((n_genes, n_coefs, n_coefs));
    let mut converged = Vec::with_capacity(n_genes);

    for (i, fit) in results.into_iter().enumerate() {
        coefficients.row_mut(i).assign(&fit.coefficients);
        standard_errors.row_mut(i).assign(&fit.standard_errors);
        covariances
            .index_axis_mut(ndarray::Axis(0), i)
            .assign(&fit.covariance);
        converged.push(fit.converged);
    }

    let n_failed = converged.iter().filter(|&&c| !c).count();
    if n_failed > 0 {
        log::warn!("{} rows did not converge in beta", n_failed);
    }

    dds.set_design_matrix(design, info.coef_names.clone())?;
    dds.set_glm_fit(coefficients, standard_errors, covariances, converged)?;

    Ok(info)
}

/// IRLS for a single gene with fixed dispersion `alpha`
pub fn fit_single_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    params: &GlmFitParams,
) -> GlmFitResult {
    let n_samples = counts.len();
    let n_coefs = design.ncols();

    if counts.iter().all(|&c| c == 0.0) || !alpha.is_finite() {
        return GlmFitResult::undefined(n_samples, n_coefs);
    }

    // Start from least squares on log normalized counts
    let log_counts: Array1<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let xtx = weighted_gram(design, &vec![1.0; n_samples]);
    let mut beta = solve_spd(&xtx, &design.t().dot(&log_counts));
    if beta.iter().any(|b| !b.is_finite()) {
        beta = Array1::zeros(n_coefs);
        beta[0] = log_counts.mean().unwrap_or(0.0);
    }

    let lambda = ridge_lambda();
    let fitted_mu = |beta: &Array1<f64>| -> Array1<f64> {
        design
            .dot(beta)
            .iter()
            .zip(size_factors.iter())
            .map(|(&eta, &s)| nb_mean(eta, s).max(MIN_MU))
            .collect()
    };

    let mut mu = fitted_mu(&beta);
    let mut dev_old = 0.0;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..params.maxit {
        iterations = iter + 1;
        let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Array1<f64> = (0..n_samples)
            .map(|j| (mu[j] / size_factors[j]).ln() + (counts[j] - mu[j]) / mu[j])
            .collect();

        let mut xtwx = weighted_gram(design, &weights);
        for k in 0..n_coefs {
            xtwx[[k, k]] += lambda;
        }
        let wz: Array1<f64> = z.iter().zip(weights.iter()).map(|(&zi, &wi)| zi * wi).collect();
        beta = solve_spd(&xtwx, &design.t().dot(&wz));

        if beta.iter().any(|b| b.abs() > MAX_LFC_BETA || !b.is_finite()) {
            break;
        }

        mu = fitted_mu(&beta);
        let dev: f64 = -2.0
            * counts
                .iter()
                .zip(mu.iter())
                .map(|(&y, &m)| nb_log_likelihood(y, m, alpha))
                .sum::<f64>();

        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    mu = fitted_mu(&beta);
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let xtwx = weighted_gram(design, &weights);
    let mut ridged = xtwx.clone();
    for k in 0..n_coefs {
        ridged[[k, k]] += lambda;
    }
    // Sandwich form keeps the ridge from shrinking the standard errors
    let ridged_inv = invert_spd(&ridged);
    let covariance = ridged_inv.dot(&xtwx).dot(&ridged_inv);
    let standard_errors = covariance
        .diag()
        .mapv(|v| if v > 0.0 { v.sqrt() } else { f64::NAN });

    let log_likelihood = counts
        .iter()
        .zip(mu.iter())
        .map(|(&y, &m)| nb_log_likelihood(y, m, alpha))
        .sum();

    GlmFitResult {
        coefficients: beta,
        standard_errors,
        covariance,
        converged,
        iterations,
        mu,
        log_likelihood,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_known_fold_change() {
        // Group 2 has 4x the expression of group 1
        let counts = array![100.0, 104.0, 96.0, 400.0, 410.0, 390.0];
        let design = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ];
        let sf = Array1::from_elem(6, 1.0);
        let fit = fit_single_gene(counts.view(), &design, sf.view(), 0.01, &GlmFitParams::default());

        assert!(fit.converged);
        let log2fc = fit.coefficients[1] / std::f64::consts::LN_2;
        assert!((log2fc - 2.0).abs() < 0.05, "log2fc = {}", log2fc);
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 0.05);
        assert!(fit.standard_errors.iter().all(|s| s.is_finite() && *s > 0.0));
        assert_eq!(fit.covariance.dim(), (2, 2));
    }

    #[test]
    fn test_size_factors_are_offsets() {
        let counts = array![50.0, 100.0, 200.0, 400.0];
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let sf = array![0.5, 1.0, 0.5, 1.0];
        let fit = fit_single_gene(counts.view(), &design, sf.view(), 0.01, &GlmFitParams::default());
        let log2fc = fit.coefficients[1] / std::f64::consts::LN_2;
        assert!((log2fc - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_all_zero_gene_is_undefined() {
        let counts = array![0.0, 0.0, 0.0, 0.0];
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let sf = Array1::from_elem(4, 1.0);
        let fit = fit_single_gene(counts.view(), &design, sf.view(), 0.1, &GlmFitParams::default());
        assert!(fit.coefficients.iter().all(|b| b.is_nan()));
    }
}
