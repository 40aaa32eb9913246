//! deseq_report: differential expression reports from htseq-count output
//!
//! Discovers per-sample count files, assembles a count matrix, fits a
//! DESeq2-style negative binomial model and writes annotated result tables
//! and plots for a treatment vs reference comparison.
//!
//! # Example
//!
//! ```ignore
//! use deseq_report::prelude::*;
//!
//! let config = DiscoveryConfig {
//!     rules: vec!["Activated=^A".parse()?, "Unactivated=^U".parse()?],
//!     ..Default::default()
//! };
//! let samples = discover_samples(Path::new("counts"), &config)?;
//! let dds = build_dataset(&samples, Some("Unactivated"))?;
//! let model = run_deseq(dds, SizeFactorMethod::Ratio)?;
//!
//! let extraction = extract_results(&model, "Activated", "Unactivated", &ExtractParams::default())?;
//! write_extraction(&extraction, "results")?;
//! println!("{}", extraction.summary);
//! ```

pub mod cli;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod plot;
pub mod report;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{
        discover_samples, ConditionRule, CountMatrix, DESeqDataSet, DiscoveryConfig, Sample, SampleMetadata,
        CONDITION_COLUMN,
    };
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::glm::{fit_glm, DesignInfo, GlmFitParams};
    pub use crate::io::{assemble_count_matrix, read_count_matrix, read_sample_sheet, write_count_matrix, Contrast};
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::plot::PlotParams;
    pub use crate::report::{extract_results, read_result_table, write_extraction, ExtractParams, Extraction};
    pub use crate::transform::vst;
    pub use crate::{build_dataset, run_deseq, FittedModel};
}

use prelude::*;

/// Dataset after size factors, dispersions and the GLM fit
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub dds: DESeqDataSet,
    pub design_info: DesignInfo,
}

/// Assemble the count matrix of `samples` and label it with their conditions
///
/// `reference`, when given, becomes the baseline level of the design.
pub fn build_dataset(samples: &[Sample], reference: Option<&str>) -> Result<DESeqDataSet> {
    let (counts, counters) = assemble_count_matrix(samples)?;
    for ((sample, c), assigned) in samples.iter().zip(counters.iter()).zip(counts.library_sizes()) {
        let total = assigned + c.total() as f64;
        let pct = if total > 0.0 { 100.0 * assigned / total } else { 0.0 };
        log::debug!("{}: {} of {} reads assigned to genes ({:.1}%)", sample.id, assigned, total, pct);
    }
    log::info!("Count matrix: {} genes x {} samples", counts.n_genes(), counts.n_samples());

    let metadata = SampleMetadata::from_samples(samples)?;
    let mut dds = DESeqDataSet::new(counts, metadata, CONDITION_COLUMN)?;
    if let Some(level) = reference {
        dds.set_reference_level(level)?;
    }
    Ok(dds)
}

/// Run the complete DESeq2 analysis pipeline
pub fn run_deseq(mut dds: DESeqDataSet, sf_method: SizeFactorMethod) -> Result<FittedModel> {
    // Size factors given up front are kept
    if !dds.has_size_factors() {
        estimate_size_factors(&mut dds, sf_method)?;
    }

    estimate_dispersions(&mut dds, TrendFitMethod::Parametric, &DispersionParams::default())?;
    let design_info = fit_glm(&mut dds, &GlmFitParams::default())?;

    Ok(FittedModel { dds, design_info })
}
