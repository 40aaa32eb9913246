//! Annotated result rows and tables

use std::cmp::Ordering;

use ndarray::ArrayView2;
use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::io::DESeqResults;

/// `Some` for finite values, `None` for NaN and infinities
pub fn defined(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Model statistics for one gene joined with its normalized counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedRow {
    pub gene_id: String,
    pub log2_fold_change: Option<f64>,
    pub padj: Option<f64>,
    pub pvalue: Option<f64>,
    pub base_mean: f64,
    /// One value per sample, in the table's sample order
    pub normalized_counts: Vec<f64>,
}

impl CombinedRow {
    /// True when padj is defined and strictly below `cutoff`
    pub fn passes(&self, cutoff: f64) -> bool {
        matches!(self.padj, Some(p) if p < cutoff)
    }
}

/// Ordered rows sharing one sample layout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    sample_ids: Vec<String>,
    rows: Vec<CombinedRow>,
}

impl ResultTable {
    pub fn new(sample_ids: Vec<String>, rows: Vec<CombinedRow>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.normalized_counts.len() != sample_ids.len()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} normalized counts", sample_ids.len()),
                got: format!("{} for gene '{}'", row.normalized_counts.len(), row.gene_id),
            });
        }
        Ok(Self { sample_ids, rows })
    }

    /// Join results with the normalized count matrix (genes x samples, same
    /// gene order) and sort by fold change
    pub fn from_results(results: &DESeqResults, normalized: ArrayView2<f64>, sample_ids: &[String]) -> Result<Self> {
        if normalized.dim() != (results.n_genes(), sample_ids.len()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} x {} normalized counts", results.n_genes(), sample_ids.len()),
                got: format!("{} x {}", normalized.nrows(), normalized.ncols()),
            });
        }
        let rows = results
            .gene_ids
            .iter()
            .enumerate()
            .map(|(i, gene)| CombinedRow {
                gene_id: gene.clone(),
                log2_fold_change: defined(results.log2_fold_changes[i]),
                padj: defined(results.padj[i]),
                pvalue: defined(results.pvalues[i]),
                base_mean: results.base_means[i],
                normalized_counts: normalized.row(i).to_vec(),
            })
            .collect();
        let mut table = Self::new(sample_ids.to_vec(), rows)?;
        table.sort_by_fold_change();
        Ok(table)
    }

    /// Stable sort, fold change descending, undefined fold changes last
    pub fn sort_by_fold_change(&mut self) {
        self.rows.sort_by(|a, b| match (a.log2_fold_change, b.log2_fold_change) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }

    /// Rows with padj strictly below `cutoff`, order preserved
    pub fn filter_padj(&self, cutoff: f64) -> Self {
        Self {
            sample_ids: self.sample_ids.clone(),
            rows: self.rows.iter().filter(|r| r.passes(cutoff)).cloned().collect(),
        }
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn rows(&self) -> &[CombinedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn gene_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.gene_id.as_str()).collect()
    }

    pub fn get(&self, gene_id: &str) -> Option<&CombinedRow> {
        self.rows.iter().find(|r| r.gene_id == gene_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(gene: &str, lfc: Option<f64>, padj: Option<f64>) -> CombinedRow {
        CombinedRow {
            gene_id: gene.to_string(),
            log2_fold_change: lfc,
            padj,
            pvalue: padj,
            base_mean: 10.0,
            normalized_counts: vec![1.0, 2.0],
        }
    }

    fn samples() -> Vec<String> {
        vec!["s1".to_string(), "s2".to_string()]
    }

    #[test]
    fn test_sort_descending_undefined_last_stable() {
        let mut table = ResultTable::new(
            samples(),
            vec![
                row("nan1", None, None),
                row("low", Some(-3.0), Some(0.1)),
                row("tie_a", Some(1.0), Some(0.2)),
                row("high", Some(4.0), Some(0.01)),
                row("nan2", None, Some(0.5)),
                row("tie_b", Some(1.0), Some(0.3)),
            ],
        )
        .unwrap();
        table.sort_by_fold_change();
        assert_eq!(table.gene_ids(), vec!["high", "tie_a", "tie_b", "low", "nan1", "nan2"]);
    }

    #[test]
    fn test_filter_is_strict_and_skips_undefined() {
        let table = ResultTable::new(
            samples(),
            vec![
                row("a", Some(1.0), Some(0.001)),
                row("b", Some(0.5), Some(0.0009)),
                row("c", Some(0.2), None),
            ],
        )
        .unwrap();
        let filtered = table.filter_padj(0.001);
        assert_eq!(filtered.gene_ids(), vec!["b"]);
        assert_eq!(filtered.sample_ids(), table.sample_ids());
    }

    #[test]
    fn test_row_width_checked() {
        let mut bad = row("a", Some(1.0), None);
        bad.normalized_counts.push(3.0);
        assert!(ResultTable::new(samples(), vec![bad]).is_err());
    }

    #[test]
    fn test_defined() {
        assert_eq!(defined(0.5), Some(0.5));
        assert_eq!(defined(f64::NAN), None);
        assert_eq!(defined(f64::INFINITY), None);
    }
}
