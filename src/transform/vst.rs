//! Variance Stabilizing Transformation (VST)
//!
//! Maps normalized counts to a log2-like scale on which the variance no
//! longer depends on the mean. Used for PCA and other sample-level views.

use ndarray::Array2;

use crate::data::DESeqDataSet;
use crate::dispersion::{estimate_gene_dispersions, fit_dispersion_trend, DispersionParams, TrendFitMethod};
use crate::error::{AnalysisError, Result};

/// Transformed data with the trend it was computed from
#[derive(Debug, Clone)]
pub struct VstResult {
    /// Genes x samples
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub asympt_disp: f64,
    pub extra_pois: f64,
}

/// Apply the variance stabilizing transformation
///
/// With `blind`, dispersions are re-estimated on a copy of the dataset with an
/// intercept-only design, so condition labels do not influence the result.
/// Otherwise the dataset's own fitted trend is used.
pub fn vst(dds: &DESeqDataSet, blind: bool) -> Result<VstResult> {
    let normalized = dds
        .normalized_counts()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "Size factors must be estimated before VST".to_string(),
        })?;

    let (asympt_disp, extra_pois) = if blind {
        blind_dispersion_function(dds)?
    } else {
        dds.dispersion_function().ok_or_else(|| AnalysisError::InvalidInput {
            reason: "Dispersions must be estimated before a non-blind VST".to_string(),
        })?
    };

    if !(asympt_disp > 0.0) {
        return Err(AnalysisError::InvalidInput {
            reason: format!("VST needs a positive asymptotic dispersion, got {}", asympt_disp),
        });
    }
    log::info!(
        "VST with asymptDisp = {:.4}, extraPois = {:.4}{}",
        asympt_disp,
        extra_pois,
        if blind { " (blind)" } else { "" }
    );

    Ok(VstResult {
        data: normalized.mapv(|q| vst_value(q, asympt_disp, extra_pois)),
        gene_ids: dds.counts().gene_ids().to_vec(),
        sample_ids: dds.counts().sample_ids().to_vec(),
        asympt_disp,
        extra_pois,
    })
}

/// Closed form for dispersion(mean) = a0 + a1 / mean
///
/// With `extra_pois = 0` this is the transform for a constant dispersion.
pub fn vst_value(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let a0 = asympt_disp;
    let a1 = extra_pois;
    let inner = 1.0 + a1 + 2.0 * a0 * q + 2.0 * (a0 * q * (1.0 + a1 + a0 * q)).sqrt();
    (inner / (4.0 * a0)).log2()
}

fn blind_dispersion_function(dds: &DESeqDataSet) -> Result<(f64, f64)> {
    let mut blind = dds.clone();
    let n = blind.n_samples();
    blind.set_design_matrix(Array2::ones((n, 1)), vec!["Intercept".to_string()])?;
    let params = DispersionParams::default();
    estimate_gene_dispersions(&mut blind, &params)?;
    let trend = fit_dispersion_trend(&mut blind, TrendFitMethod::Parametric, params.min_disp)?;
    Ok((trend.asympt_disp, trend.extra_pois))
}
