//! Design matrix and contrast vectors for a single-factor model

use ndarray::{Array1, Array2};

use crate::data::SampleMetadata;
use crate::error::{AnalysisError, Result};

/// Column layout of the design matrix
#[derive(Debug, Clone)]
pub struct DesignInfo {
    /// Factor the design was built from
    pub variable: String,
    /// `Intercept`, then `<variable>_<level>_vs_<reference>` per non-reference level
    pub coef_names: Vec<String>,
    pub reference_level: String,
    /// All levels, sorted
    pub levels: Vec<String>,
}

impl DesignInfo {
    /// Design column carrying the indicator of `level`; `None` for the reference
    pub fn level_column(&self, level: &str) -> Option<usize> {
        if level == self.reference_level {
            return None;
        }
        let suffix = format!("_{}_vs_{}", level, self.reference_level);
        self.coef_names
            .iter()
            .position(|name| name == &format!("{}{}", self.variable, suffix))
    }
}

/// Intercept plus one indicator column per non-reference level
///
/// Treatment coding: the reference level is absorbed into the intercept.
/// A factor with a single level yields an intercept-only design.
pub fn create_design_matrix(
    metadata: &SampleMetadata,
    design_variable: &str,
    reference_level: &str,
) -> Result<(Array2<f64>, DesignInfo)> {
    let values = metadata.condition(design_variable).ok_or_else(|| {
        AnalysisError::InvalidDesignMatrix {
            reason: format!("Variable '{}' not found in metadata", design_variable),
        }
    })?;
    let levels = metadata.levels(design_variable)?;
    metadata.require_level(design_variable, reference_level)?;

    let others: Vec<&String> = levels.iter().filter(|l| *l != reference_level).collect();
    let n_samples = metadata.n_samples();
    let mut design = Array2::<f64>::zeros((n_samples, others.len() + 1));
    design.column_mut(0).fill(1.0);

    for (i, value) in values.iter().enumerate() {
        if let Some(j) = others.iter().position(|l| *l == value) {
            design[[i, j + 1]] = 1.0;
        }
    }

    let mut coef_names = vec!["Intercept".to_string()];
    coef_names.extend(
        others
            .iter()
            .map(|l| format!("{}_{}_vs_{}", design_variable, l, reference_level)),
    );

    check_full_rank(&design)?;
    log::debug!("Design columns: {}", coef_names.join(", "));

    Ok((
        design,
        DesignInfo {
            variable: design_variable.to_string(),
            coef_names,
            reference_level: reference_level.to_string(),
            levels,
        },
    ))
}

/// Contrast vector c with c'beta = log(numerator / denominator)
///
/// c = e_numerator - e_denominator, where the reference level's indicator is
/// the zero vector. Works in either direction and between two non-reference
/// levels.
pub fn contrast_vector(info: &DesignInfo, numerator: &str, denominator: &str) -> Result<Array1<f64>> {
    for label in [numerator, denominator] {
        if !info.levels.iter().any(|l| l == label) {
            return Err(AnalysisError::InvalidContrast {
                reason: format!(
                    "level '{}' not found for '{}' (known: {})",
                    label,
                    info.variable,
                    info.levels.join(", ")
                ),
            });
        }
    }
    if numerator == denominator {
        return Err(AnalysisError::InvalidContrast {
            reason: format!("numerator and denominator are both '{}'", numerator),
        });
    }

    let mut c = Array1::<f64>::zeros(info.coef_names.len());
    if let Some(j) = info.level_column(numerator) {
        c[j] += 1.0;
    }
    if let Some(j) = info.level_column(denominator) {
        c[j] -= 1.0;
    }
    Ok(c)
}

/// Reject designs with empty columns or fewer samples than coefficients
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(AnalysisError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }
    if let Some(j) = (0..ncol).find(|&j| matrix.column(j).iter().all(|&v| v == 0.0)) {
        return Err(AnalysisError::InvalidDesignMatrix {
            reason: format!(
                "the model matrix is not full rank: column {} has no samples",
                j
            ),
        });
    }
    if nrow < ncol {
        return Err(AnalysisError::InvalidDesignMatrix {
            reason: format!("{} samples cannot fit {} coefficients", nrow, ncol),
        });
    }
    Ok(())
}
