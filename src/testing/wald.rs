//! Wald test for differential expression

use ndarray::{ArrayView1, ArrayView2, Axis};

use super::fdr::benjamini_hochberg;
use super::pvalue::calculate_pvalue;
use crate::data::DESeqDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::{contrast_vector, DesignInfo};
use crate::io::{Contrast, DESeqResults};

/// Wald test of `c' beta = 0` for the contrast `numerator` vs `denominator`
///
/// The contrast vector is `e_numerator - e_denominator`, so either level may be
/// the reference. log2 fold change = c'beta / ln 2 and its standard error is
/// sqrt(c' Sigma c) / ln 2. Genes without reads keep NaN for every statistic.
/// `padj` is plain BH; independent filtering is applied on top by the caller.
pub fn wald_test(dds: &DESeqDataSet, design_info: &DesignInfo, contrast: Contrast) -> Result<DESeqResults> {
    let not_fitted = || AnalysisError::InvalidContrast {
        reason: "GLM must be fitted before testing".to_string(),
    };
    let coefficients = dds.coefficients().ok_or_else(not_fitted)?;
    let covariances = dds.covariances().ok_or_else(not_fitted)?;
    let normalized = dds.normalized_counts().ok_or_else(not_fitted)?;

    if contrast.variable != design_info.variable {
        return Err(AnalysisError::InvalidContrast {
            reason: format!(
                "contrast variable '{}' is not the design variable '{}'",
                contrast.variable, design_info.variable
            ),
        });
    }
    let c = contrast_vector(design_info, &contrast.numerator, &contrast.denominator)?;
    if c.len() != coefficients.ncols() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} coefficients", c.len()),
            got: format!("{} coefficients", coefficients.ncols()),
        });
    }

    let mut results = DESeqResults::new(dds.counts().gene_ids().to_vec(), contrast);

    results.base_means = normalized
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();

    for i in 0..dds.n_genes() {
        if results.base_means[i] == 0.0 {
            continue;
        }
        let (lfc, se) = contrast_estimate(
            coefficients.row(i),
            covariances.index_axis(Axis(0), i),
            c.view(),
        );
        results.log2_fold_changes[i] = lfc;
        results.lfc_se[i] = se;
        if lfc.is_finite() && se.is_finite() && se > 0.0 {
            results.stat[i] = lfc / se;
        }
    }

    results.pvalues = results.stat.iter().map(|&z| calculate_pvalue(z)).collect();
    results.padj = benjamini_hochberg(&results.pvalues);
    if let Some(disp) = dds.dispersions() {
        results.dispersions = disp.to_vec();
    }

    log::info!(
        "Wald test {}: {} of {} genes tested",
        results.contrast.name(),
        results.n_tested(),
        results.n_genes()
    );
    Ok(results)
}

/// Log2 fold change and its standard error for one gene's fit
pub fn contrast_estimate(beta: ArrayView1<f64>, covariance: ArrayView2<f64>, c: ArrayView1<f64>) -> (f64, f64) {
    let ln2 = std::f64::consts::LN_2;
    let var = c.dot(&covariance.dot(&c));
    let se = if var > 0.0 { var.sqrt() / ln2 } else { f64::NAN };
    (beta.dot(&c) / ln2, se)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata, CONDITION_COLUMN};
    use crate::glm::create_design_matrix;
    use ndarray::{array, Array1, Array2, Array3};

    fn fitted_dataset() -> (DESeqDataSet, DesignInfo) {
        let counts = array![[10.0, 12.0, 40.0, 44.0], [5.0, 5.0, 5.0, 5.0], [0.0, 0.0, 0.0, 0.0]];
        let samples: Vec<String> = (1..=4).map(|j| format!("s{}", j)).collect();
        let matrix = CountMatrix::new(
            counts,
            vec!["up".to_string(), "flat".to_string(), "zero".to_string()],
            samples.clone(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(samples).unwrap();
        meta.add_condition(
            CONDITION_COLUMN,
            vec!["ctrl".into(), "ctrl".into(), "trt".into(), "trt".into()],
        )
        .unwrap();
        let mut dds = DESeqDataSet::new(matrix, meta, CONDITION_COLUMN).unwrap();
        dds.set_size_factors(Array1::from_elem(4, 1.0)).unwrap();

        let (design, info) = create_design_matrix(dds.sample_metadata(), CONDITION_COLUMN, "ctrl").unwrap();
        let ln2 = std::f64::consts::LN_2;
        let coefs = array![[11.0_f64.ln(), 2.0 * ln2], [5.0_f64.ln(), 0.0], [f64::NAN, f64::NAN]];
        let ses = array![[0.1, 0.2], [0.1, 0.2], [f64::NAN, f64::NAN]];
        let mut covs = Array3::zeros((3, 2, 2));
        for i in 0..2 {
            covs.index_axis_mut(Axis(0), i)
                .assign(&array![[0.01, -0.01], [-0.01, 0.04]]);
        }
        covs.index_axis_mut(Axis(0), 2).fill(f64::NAN);
        dds.set_design_matrix(design, info.coef_names.clone()).unwrap();
        dds.set_glm_fit(coefs, ses, covs, vec![true; 3]).unwrap();
        (dds, info)
    }

    #[test]
    fn test_fold_change_and_direction() {
        let (dds, info) = fitted_dataset();
        let res = wald_test(&dds, &info, Contrast::new(CONDITION_COLUMN, "trt", "ctrl")).unwrap();
        assert!((res.log2_fold_changes[0] - 2.0).abs() < 1e-12);
        assert!((res.lfc_se[0] - 0.2 / std::f64::consts::LN_2).abs() < 1e-12);
        assert!((res.stat[0] - 2.0 * std::f64::consts::LN_2 / 0.2).abs() < 1e-9);
        assert!(res.pvalues[0] < 1e-10);
        assert!((res.pvalues[1] - 1.0).abs() < 1e-12);

        let rev = wald_test(&dds, &info, Contrast::new(CONDITION_COLUMN, "ctrl", "trt")).unwrap();
        assert!((rev.log2_fold_changes[0] + 2.0).abs() < 1e-12);
        assert!((rev.pvalues[0] - res.pvalues[0]).abs() < 1e-15);
    }

    #[test]
    fn test_all_zero_gene_is_undefined() {
        let (dds, info) = fitted_dataset();
        let res = wald_test(&dds, &info, Contrast::new(CONDITION_COLUMN, "trt", "ctrl")).unwrap();
        assert_eq!(res.base_means[2], 0.0);
        assert!(res.log2_fold_changes[2].is_nan());
        assert!(res.pvalues[2].is_nan());
        assert!(res.padj[2].is_nan());
        assert_eq!(res.n_tested(), 2);
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let (dds, info) = fitted_dataset();
        let err = wald_test(&dds, &info, Contrast::new(CONDITION_COLUMN, "Stimulated", "ctrl")).unwrap_err();
        assert!(err.to_string().contains("Stimulated"));
        assert!(wald_test(&dds, &info, Contrast::new("batch", "trt", "ctrl")).is_err());
    }

    #[test]
    fn test_contrast_estimate() {
        let beta = array![1.0, 0.5, 1.5];
        let cov = Array2::<f64>::eye(3) * 0.04;
        let c = array![0.0, -1.0, 1.0];
        let (lfc, se) = contrast_estimate(beta.view(), cov.view(), c.view());
        assert!((lfc - 1.0 / std::f64::consts::LN_2).abs() < 1e-12);
        assert!((se - (0.08_f64).sqrt() / std::f64::consts::LN_2).abs() < 1e-12);
    }
}
