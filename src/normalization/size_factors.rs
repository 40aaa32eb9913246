//! Size factor estimation using the median of ratios method

use std::str::FromStr;

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeFactorMethod {
    /// Median of ratios over genes expressed in every sample
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

impl FromStr for SizeFactorMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(Self::Ratio),
            "poscounts" => Ok(Self::PosCounts),
            other => Err(AnalysisError::InvalidInput {
                reason: format!("unknown size factor type '{}' (expected ratio or poscounts)", other),
            }),
        }
    }
}

/// Estimate size factors and store them (with normalized counts) on the dataset
pub fn estimate_size_factors(dds: &mut DESeqDataSet, method: SizeFactorMethod) -> Result<()> {
    let counts = dds.counts().counts();

    let size_factors = match method {
        SizeFactorMethod::Ratio => median_of_ratios(counts, false)?,
        SizeFactorMethod::PosCounts => median_of_ratios(counts, true)?,
    };

    log::info!(
        "Size factors: {}",
        size_factors
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    dds.set_size_factors(size_factors)?;
    Ok(())
}

/// Per-gene log geometric means; genes that cannot serve as reference get `None`
///
/// With `positive_only`, zeros are skipped in the sum but the mean still
/// divides by the number of samples.
fn log_geo_means(counts: ArrayView2<f64>, positive_only: bool) -> Vec<Option<f64>> {
    let n_samples = counts.ncols() as f64;
    counts
        .axis_iter(Axis(0))
        .map(|row| {
            let positive = row.iter().filter(|&&x| x > 0.0).count();
            if positive == 0 || (!positive_only && positive < row.len()) {
                return None;
            }
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum();
            Some(log_sum / n_samples)
        })
        .collect()
}

fn median_of_ratios(counts: ArrayView2<f64>, positive_only: bool) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let geo_means = log_geo_means(counts, positive_only);
    if geo_means.iter().all(|g| g.is_none()) {
        return Err(AnalysisError::SizeFactorFailed {
            reason: if positive_only {
                "No genes with positive counts found".to_string()
            } else {
                "every gene contains at least one zero; use the poscounts size factor type".to_string()
            },
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for (j, column) in counts.axis_iter(Axis(1)).enumerate() {
        let log_ratios: Vec<f64> = column
            .iter()
            .zip(geo_means.iter())
            .filter_map(|(&c, g)| match g {
                Some(g) if c > 0.0 => Some(c.ln() - g),
                _ => None,
            })
            .collect();
        let m = median(&log_ratios);
        if !m.is_finite() {
            return Err(AnalysisError::SizeFactorFailed {
                reason: format!("sample {} has no counts on the reference genes", j),
            });
        }
        size_factors[j] = m.exp();
    }

    if positive_only {
        // Center so that the size factors have geometric mean 1
        let log_center = size_factors.mapv(f64::ln).mean().unwrap_or(0.0);
        size_factors.mapv_inplace(|s| (s.ln() - log_center).exp());
    }

    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata, CONDITION_COLUMN};
    use ndarray::{array, Array2};

    fn dataset(counts: Array2<f64>) -> DESeqDataSet {
        let n = counts.ncols();
        let genes = (0..counts.nrows()).map(|i| format!("g{}", i)).collect();
        let samples: Vec<String> = (0..n).map(|j| format!("s{}", j)).collect();
        let matrix = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_condition(
            CONDITION_COLUMN,
            (0..n).map(|j| if j % 2 == 0 { "A" } else { "B" }.to_string()).collect(),
        )
        .unwrap();
        DESeqDataSet::new(matrix, meta, CONDITION_COLUMN).unwrap()
    }

    #[test]
    fn test_ratio_recovers_depth() {
        // Sample 2 sequenced twice as deep
        let counts = array![[10.0, 20.0], [50.0, 100.0], [7.0, 14.0]];
        let sf = median_of_ratios(counts.view(), false).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-12);
        assert!((sf[0] * sf[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ratio_ignores_genes_with_zeros() {
        let counts = array![[10.0, 20.0], [0.0, 900.0], [30.0, 60.0]];
        let sf = median_of_ratios(counts.view(), false).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ratio_fails_when_every_gene_has_zero() {
        let counts = array![[0.0, 20.0], [5.0, 0.0]];
        assert!(median_of_ratios(counts.view(), false).is_err());
        let sf = median_of_ratios(counts.view(), true).unwrap();
        assert!(sf.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn test_poscounts_geometric_mean_one() {
        let counts = array![[10.0, 0.0, 30.0], [5.0, 12.0, 0.0], [8.0, 16.0, 40.0]];
        let sf = median_of_ratios(counts.view(), true).unwrap();
        let log_mean = sf.mapv(f64::ln).mean().unwrap();
        assert!(log_mean.abs() < 1e-12);
    }

    #[test]
    fn test_estimate_sets_normalized_counts() {
        let mut dds = dataset(array![[10.0, 20.0], [40.0, 80.0], [5.0, 10.0]]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let norm = dds.normalized_counts().unwrap();
        assert!((norm[[1, 0]] - norm[[1, 1]]).abs() < 1e-9);
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("poscounts".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::PosCounts);
        assert_eq!("Ratio".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::Ratio);
        assert!("iterate".parse::<SizeFactorMethod>().is_err());
    }
}
