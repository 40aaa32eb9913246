//! Per-gene model results for one contrast

use serde::{Deserialize, Serialize};

/// Two-level comparison: `numerator` vs `denominator` of `variable`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    /// File name stem, e.g. `Activated_vs_Unactivated`
    pub fn name(&self) -> String {
        format!("{}_vs_{}", self.numerator, self.denominator)
    }
}

/// Column-oriented Wald test results, one entry per gene in count-matrix order
///
/// NaN marks a value the model could not compute (all-zero genes, genes
/// removed by independent filtering for `padj`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DESeqResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts across all samples
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    /// Standard error of the log2 fold change
    pub lfc_se: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// BH-adjusted p-values
    pub padj: Vec<f64>,
    /// Dispersion used in the fit
    pub dispersions: Vec<f64>,
    pub contrast: Contrast,
    /// Base-mean threshold chosen by independent filtering, if it ran
    pub filter_threshold: Option<f64>,
}

impl DESeqResults {
    pub fn new(gene_ids: Vec<String>, contrast: Contrast) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            contrast,
            filter_threshold: None,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Genes with a defined p-value
    pub fn n_tested(&self) -> usize {
        self.pvalues.iter().filter(|p| p.is_finite()).count()
    }
}
