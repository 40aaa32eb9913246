//! Gene x sample read count matrix

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{AnalysisError, Result};

/// Raw read counts for every gene in every sample
/// Rows are genes, columns are samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers, in row order
    gene_ids: Vec<String>,
    /// Sample identifiers, in column order
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: "All samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers. The negative binomial model expects \
                 integer read counts."
            );
        }

        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!("Duplicate gene identifier '{}'", dup),
            });
        }
        if let Some(dup) = first_duplicate(&sample_ids) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!("Duplicate sample identifier '{}'", dup),
            });
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Sum of counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

}

fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().find(|id| !seen.insert(id.as_str())).map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.gene_counts(1).to_vec(), vec![5.0, 15.0, 25.0]);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).is_err());
    }

    #[test]
    fn test_duplicate_gene_rejected() {
        let counts = array![[10.0, 5.0], [5.0, 15.0]];
        let genes = vec!["Actb".to_string(), "Actb".to_string()];
        let err = CountMatrix::new(counts, genes, ids("s", 2)).unwrap_err();
        assert!(err.to_string().contains("Actb"));
    }

    #[test]
    fn test_library_sizes() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
    }
}
