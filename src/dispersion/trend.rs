//! Dispersion-mean trend fitting

use ndarray::Array1;

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::linalg::solve_spd;
use crate::stats::trimmed_mean;

/// Shape of the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendFitMethod {
    /// dispersion = asymptDisp + extraPois / mean, falling back to `Mean`
    Parametric,
    /// A single (trimmed) mean of the gene-wise estimates
    Mean,
}

/// Fitted trend coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionTrend {
    pub asympt_disp: f64,
    pub extra_pois: f64,
}

impl DispersionTrend {
    pub fn predict(&self, mean: f64) -> f64 {
        if mean > 0.0 {
            self.asympt_disp + self.extra_pois / mean
        } else {
            f64::NAN
        }
    }
}

/// Fit the trend and store trended dispersions plus its coefficients
pub fn fit_dispersion_trend(dds: &mut DESeqDataSet, method: TrendFitMethod, min_disp: f64) -> Result<DispersionTrend> {
    let gene_dispersions = dds
        .gene_dispersions()
        .ok_or_else(|| AnalysisError::TrendFittingFailed {
            reason: "Gene-wise dispersions must be estimated first".to_string(),
        })?
        .to_vec();
    let normalized = dds
        .normalized_counts()
        .ok_or_else(|| AnalysisError::TrendFittingFailed {
            reason: "Normalized counts required for trend fitting".to_string(),
        })?;

    let means: Vec<f64> = normalized
        .rows()
        .into_iter()
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();

    let trend = match method {
        TrendFitMethod::Parametric => match parametric_dispersion_fit(&means, &gene_dispersions, min_disp) {
            Ok(trend) => trend,
            Err(e) => {
                log::warn!(
                    "{}; using the mean of gene-wise dispersion estimates as the fitted trend",
                    e
                );
                mean_dispersion_fit(&gene_dispersions, min_disp)?
            }
        },
        TrendFitMethod::Mean => mean_dispersion_fit(&gene_dispersions, min_disp)?,
    };

    log::info!(
        "Dispersion trend: asymptDisp = {:.4}, extraPois = {:.4}",
        trend.asympt_disp,
        trend.extra_pois
    );

    let trended: Array1<f64> = means.iter().map(|&m| trend.predict(m)).collect();
    dds.set_trended_dispersions(trended)?;
    dds.set_dispersion_function(trend.asympt_disp, trend.extra_pois);
    Ok(trend)
}

/// Constant trend at the trimmed mean of the usable gene-wise estimates
pub fn mean_dispersion_fit(dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 10.0 * min_disp)
        .collect();
    if usable.is_empty() {
        return Err(AnalysisError::TrendFittingFailed {
            reason: "all gene-wise dispersion estimates are at the lower bound".to_string(),
        });
    }
    Ok(DispersionTrend {
        asympt_disp: trimmed_mean(&usable, 0.001),
        extra_pois: 0.0,
    })
}

/// Iterated gamma-family GLM (identity link) of dispersion on 1/mean
///
/// Each round drops genes whose dispersion is implausibly far from the
/// current fit (ratio outside (1e-4, 15)) before refitting.
pub fn parametric_dispersion_fit(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions.iter())
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    let failed = |reason: &str| AnalysisError::TrendFittingFailed {
        reason: reason.to_string(),
    };

    if data.len() < 3 {
        return Err(failed("too few genes for a parametric dispersion fit"));
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for _ in 0..=10 {
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let resid = d / (coefs.0 + coefs.1 / m);
                resid > 1e-4 && resid < 15.0
            })
            .collect();
        if good.len() < 3 {
            return Err(failed("parametric dispersion fit failed"));
        }

        let (new_coefs, converged) = gamma_identity_glm(&good, coefs)
            .ok_or_else(|| failed("parametric dispersion fit failed"))?;
        if !(new_coefs.0 > 0.0 && new_coefs.1 > 0.0) {
            return Err(failed("parametric dispersion fit failed"));
        }

        let change = (new_coefs.0 / coefs.0).ln().powi(2) + (new_coefs.1 / coefs.1).ln().powi(2);
        coefs = new_coefs;
        if change < 1e-6 && converged {
            return Ok(DispersionTrend {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }
    Err(failed("dispersion fit did not converge"))
}

/// IRLS for `disp ~ b0 + b1 / mean` with gamma variance and identity link
///
/// Returns `None` when a fitted mean leaves the positive half-line.
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> Option<((f64, f64), bool)> {
    const MAXIT: usize = 25;
    const TOL: f64 = 1e-8;

    let deviance = |b: (f64, f64)| -> f64 {
        2.0 * data
            .iter()
            .map(|&(m, y)| {
                let mu = b.0 + b.1 / m;
                -(y / mu).ln() + (y - mu) / mu
            })
            .sum::<f64>()
    };

    let mut b = start;
    let mut dev_old = deviance(b);
    for _ in 0..MAXIT {
        let mut xtwx = ndarray::Array2::<f64>::zeros((2, 2));
        let mut xtwy = Array1::<f64>::zeros(2);
        for &(m, y) in data {
            let x1 = 1.0 / m;
            let mu = b.0 + b.1 * x1;
            if !(mu > 0.0) {
                return None;
            }
            let w = 1.0 / (mu * mu);
            xtwx[[0, 0]] += w;
            xtwx[[0, 1]] += w * x1;
            xtwx[[1, 1]] += w * x1 * x1;
            xtwy[0] += w * y;
            xtwy[1] += w * x1 * y;
        }
        xtwx[[1, 0]] = xtwx[[0, 1]];

        let sol = solve_spd(&xtwx, &xtwy);
        b = (sol[0], sol[1]);
        if data.iter().any(|&(m, _)| !(b.0 + b.1 / m > 0.0)) {
            return None;
        }

        let dev = deviance(b);
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < TOL {
            return Some((b, true));
        }
        dev_old = dev;
    }
    Some((b, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_fit_recovers_coefficients() {
        let means: Vec<f64> = (1..=200).map(|i| i as f64 * 5.0).collect();
        // Multiplicative noise around 0.05 + 2 / mean
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let noise = 1.0 + 0.2 * ((i as f64) * 1.7).sin();
                (0.05 + 2.0 / m) * noise
            })
            .collect();
        let trend = parametric_dispersion_fit(&means, &disps, 1e-8).unwrap();
        assert!((trend.asympt_disp - 0.05).abs() < 0.01, "{:?}", trend);
        assert!((trend.extra_pois - 2.0).abs() < 0.4, "{:?}", trend);
        assert!((trend.predict(100.0) - 0.07).abs() < 0.01);
        assert!(trend.predict(0.0).is_nan());
    }

    #[test]
    fn test_parametric_fit_needs_data() {
        assert!(parametric_dispersion_fit(&[10.0, 20.0], &[0.1, 0.1], 1e-8).is_err());
    }

    #[test]
    fn test_mean_fit_ignores_boundary_estimates() {
        let trend = mean_dispersion_fit(&[1e-8, 0.2, 0.2, f64::NAN, 0.2], 1e-8).unwrap();
        assert!((trend.asympt_disp - 0.2).abs() < 1e-12);
        assert_eq!(trend.extra_pois, 0.0);
        assert!(mean_dispersion_fit(&[1e-8, f64::NAN], 1e-8).is_err());
    }
}
