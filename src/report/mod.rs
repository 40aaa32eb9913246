//! Result extraction and annotation
//!
//! Turns a fitted model into the two tables of a contrast: every gene sorted
//! by fold change, and the subset passing the padj cutoff. Both carry the
//! normalized counts of every sample.

mod table;
mod writer;

use std::fmt;

use serde::Serialize;

pub use table::{defined, CombinedRow, ResultTable};
pub use writer::{
    format_value, output_paths, read_result_table, write_extraction, write_result_table, write_summary_json,
    write_table,
};

use crate::error::{AnalysisError, Result};
use crate::io::Contrast;
use crate::testing::results;
use crate::FittedModel;

/// Parameters of a result extraction
#[derive(Debug, Clone)]
pub struct ExtractParams {
    /// Genes with padj strictly below this enter the filtered table
    pub cutoff: f64,
    /// Target FDR used to pick the independent filtering threshold
    pub alpha: f64,
    pub independent_filtering: bool,
}

impl Default for ExtractParams {
    fn default() -> Self {
        Self {
            cutoff: 0.001,
            alpha: 0.1,
            independent_filtering: true,
        }
    }
}

/// Counts reported after an extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSummary {
    /// `{treatment}_vs_{reference}`
    pub contrast: String,
    pub treatment: String,
    pub reference: String,
    pub total_genes: usize,
    /// Genes with a defined p-value
    pub tested_genes: usize,
    pub passing_genes: usize,
    /// Passing genes with positive fold change
    pub up: usize,
    pub down: usize,
    pub cutoff: f64,
    /// Base-mean threshold from independent filtering
    pub filter_threshold: Option<f64>,
}

impl fmt::Display for ExtractionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |n: usize| {
            if self.total_genes == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.total_genes as f64
            }
        };
        writeln!(f, "{} vs {}", self.treatment, self.reference)?;
        writeln!(f, "out of {} genes ({} tested)", self.total_genes, self.tested_genes)?;
        writeln!(f, "adjusted p-value < {}", self.cutoff)?;
        writeln!(f, "LFC > 0 (up)       : {}, {:.2}%", self.up, pct(self.up))?;
        writeln!(f, "LFC < 0 (down)     : {}, {:.2}%", self.down, pct(self.down))?;
        write!(f, "passing cutoff     : {}, {:.2}%", self.passing_genes, pct(self.passing_genes))?;
        if let Some(t) = self.filter_threshold {
            write!(f, "\nlow counts filtered below mean count {:.3}", t)?;
        }
        Ok(())
    }
}

/// Full table, filtered table and their summary for one contrast
#[derive(Debug, Clone)]
pub struct Extraction {
    pub all: ResultTable,
    pub filtered: ResultTable,
    pub summary: ExtractionSummary,
}

impl Extraction {
    /// Apply the cutoff to a full (already sorted) table
    pub fn new(
        contrast: &Contrast,
        all: ResultTable,
        cutoff: f64,
        tested_genes: usize,
        filter_threshold: Option<f64>,
    ) -> Self {
        let filtered = all.filter_padj(cutoff);
        let up = filtered
            .rows()
            .iter()
            .filter(|r| matches!(r.log2_fold_change, Some(l) if l > 0.0))
            .count();
        let down = filtered
            .rows()
            .iter()
            .filter(|r| matches!(r.log2_fold_change, Some(l) if l < 0.0))
            .count();

        let summary = ExtractionSummary {
            contrast: contrast.name(),
            treatment: contrast.numerator.clone(),
            reference: contrast.denominator.clone(),
            total_genes: all.len(),
            tested_genes,
            passing_genes: filtered.len(),
            up,
            down,
            cutoff,
            filter_threshold,
        };
        Self { all, filtered, summary }
    }
}

/// Compare `treatment` against `reference` and build both tables
///
/// Both labels must be levels of the model's design variable.
pub fn extract_results(
    model: &FittedModel,
    treatment: &str,
    reference: &str,
    params: &ExtractParams,
) -> Result<Extraction> {
    let dds = &model.dds;
    let variable = dds.design_variable();
    let metadata = dds.sample_metadata();
    metadata.require_level(variable, treatment)?;
    metadata.require_level(variable, reference)?;

    if !(params.cutoff > 0.0 && params.cutoff <= 1.0) {
        return Err(AnalysisError::InvalidInput {
            reason: format!("padj cutoff must be in (0, 1], got {}", params.cutoff),
        });
    }

    let contrast = Contrast::new(variable, treatment, reference);
    let res = results(
        dds,
        &model.design_info,
        contrast.clone(),
        params.alpha,
        params.independent_filtering,
    )?;

    let normalized = dds.normalized_counts().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "model has no normalized counts".to_string(),
    })?;
    let all = ResultTable::from_results(&res, normalized.view(), dds.counts().sample_ids())?;

    let extraction = Extraction::new(&contrast, all, params.cutoff, res.n_tested(), res.filter_threshold);
    log::info!(
        "{}: {} of {} genes with padj < {}",
        extraction.summary.contrast,
        extraction.summary.passing_genes,
        extraction.summary.total_genes,
        params.cutoff
    );
    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DESeqResults;
    use ndarray::array;
    use tempfile::TempDir;

    fn three_gene_extraction(cutoff: f64) -> Extraction {
        let contrast = Contrast::new("condition", "Activated", "Unactivated");
        let mut res = DESeqResults::new(vec!["B".into(), "C".into(), "A".into()], contrast.clone());
        res.log2_fold_changes = vec![1.0, -1.2, 2.5];
        res.padj = vec![0.5, 5e-4, 1e-4];
        res.pvalues = vec![0.3, 1e-4, 1e-5];
        res.base_means = vec![50.0, 80.0, 120.0];
        let normalized = array![[40.0, 60.0], [100.0, 60.0], [200.0, 40.0]];
        let samples = vec!["Act_1".to_string(), "Unact_1".to_string()];
        let all = ResultTable::from_results(&res, normalized.view(), &samples).unwrap();
        Extraction::new(&contrast, all, cutoff, res.n_tested(), None)
    }

    #[test]
    fn test_three_gene_example() {
        let ex = three_gene_extraction(0.001);
        assert_eq!(ex.all.gene_ids(), vec!["A", "B", "C"]);
        assert_eq!(ex.filtered.gene_ids(), vec!["A", "C"]);
        assert_eq!(ex.summary.total_genes, 3);
        assert_eq!(ex.summary.passing_genes, 2);
        assert_eq!((ex.summary.up, ex.summary.down), (1, 1));
        assert_eq!(ex.summary.contrast, "Activated_vs_Unactivated");
        // Normalized counts travel with their gene
        assert_eq!(ex.all.get("A").unwrap().normalized_counts, vec![200.0, 40.0]);
    }

    #[test]
    fn test_cutoff_equal_to_padj_excludes() {
        let ex = three_gene_extraction(5e-4);
        assert_eq!(ex.filtered.gene_ids(), vec!["A"]);
    }

    #[test]
    fn test_filtered_is_subset_of_full_in_order() {
        let ex = three_gene_extraction(0.9);
        assert_eq!(ex.all.len(), 3);
        let expected: Vec<&str> = ex
            .all
            .rows()
            .iter()
            .filter(|r| r.padj.map_or(false, |p| p < 0.9))
            .map(|r| r.gene_id.as_str())
            .collect();
        assert_eq!(ex.filtered.gene_ids(), expected);
    }

    #[test]
    fn test_undefined_padj_kept_in_full_only() {
        let contrast = Contrast::new("condition", "T", "R");
        let mut res = DESeqResults::new(vec!["g1".into(), "g2".into()], contrast.clone());
        res.log2_fold_changes = vec![0.5, f64::NAN];
        res.padj = vec![f64::NAN, f64::NAN];
        res.base_means = vec![3.0, 0.0];
        let normalized = array![[3.0, 3.0], [0.0, 0.0]];
        let all = ResultTable::from_results(&res, normalized.view(), &["a".to_string(), "b".to_string()]).unwrap();
        let ex = Extraction::new(&contrast, all, 1.0, 0, None);
        assert_eq!(ex.all.gene_ids(), vec!["g1", "g2"]);
        assert!(ex.filtered.is_empty());
    }

    #[test]
    fn test_reruns_are_byte_identical() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let (f1, a1) = write_extraction(&three_gene_extraction(0.001), &first).unwrap();
        let (f2, a2) = write_extraction(&three_gene_extraction(0.001), &second).unwrap();
        assert_eq!(std::fs::read(&f1).unwrap(), std::fs::read(&f2).unwrap());
        assert_eq!(std::fs::read(&a1).unwrap(), std::fs::read(&a2).unwrap());
        assert!(a1.ends_with("Activated_vs_Unactivated_allgenes.csv"));
        assert!(f1.ends_with("Activated_vs_Unactivated_padj_cutoff.csv"));

        let written = std::fs::read_to_string(&f1).unwrap();
        assert_eq!(
            written,
            "Gene.name,log2FoldChange,padj,Act_1,Unact_1\nA,2.5,0.0001,200,40\nC,-1.2,0.0005,100,60\n"
        );
    }

    #[test]
    fn test_summary_display_and_json() {
        let ex = three_gene_extraction(0.001);
        let text = ex.summary.to_string();
        assert!(text.contains("Activated vs Unactivated"));
        assert!(text.contains("LFC > 0 (up)       : 1"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        write_summary_json(&ex.summary, &path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["passing_genes"], 2);
        assert_eq!(value["filter_threshold"], serde_json::Value::Null);
    }
}
