//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions, max_dispersion};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion};
pub use trend::{
    fit_dispersion_trend, mean_dispersion_fit, parametric_dispersion_fit, DispersionTrend, TrendFitMethod,
};

use crate::data::DESeqDataSet;
use crate::error::Result;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound on any dispersion estimate
    pub min_disp: f64,
    /// Log-posterior improvement below which the line search stops
    pub disp_tol: f64,
    /// Initial line search step size
    pub kappa_0: f64,
    /// Maximum line search iterations before the grid fallback
    pub maxit: usize,
    /// Upper outliers (in SDs of log residuals) keep their gene-wise estimate
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Gene-wise estimates, trend, then MAP shrinkage
pub fn estimate_dispersions(
    dds: &mut DESeqDataSet,
    fit_type: TrendFitMethod,
    params: &DispersionParams,
) -> Result<DispersionTrend> {
    estimate_gene_dispersions(dds, params)?;
    let trend = fit_dispersion_trend(dds, fit_type, params.min_disp)?;
    estimate_map_dispersions(dds, params)?;
    Ok(trend)
}
