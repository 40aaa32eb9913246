//! DESeqDataSet: counts, sample annotations and per-stage model state

use ndarray::{Array1, Array2, Array3};

use super::{CountMatrix, SampleMetadata};
use crate::error::{AnalysisError, Result};

/// Count data plus everything estimated from it
///
/// Each modelling stage fills in its own slots; the setters check that the
/// shapes agree with the count matrix.
#[derive(Debug, Clone)]
pub struct DESeqDataSet {
    counts: CountMatrix,
    sample_metadata: SampleMetadata,
    /// Metadata column used as the single design factor
    design_variable: String,
    /// Level every other level is compared against in the design
    reference_level: Option<String>,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    /// Gene-wise dispersion estimates (Cox-Reid MLE)
    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    /// Final (shrunken) dispersion estimates
    map_dispersions: Option<Array1<f64>>,
    /// Fitted means from the gene-wise stage, reused for MAP estimation
    mu: Option<Array2<f64>>,
    /// Parametric trend coefficients (asymptotic dispersion, extra-Poisson)
    dispersion_function: Option<(f64, f64)>,
    dispersion_prior_var: Option<f64>,

    design_matrix: Option<Array2<f64>>,
    design_column_names: Option<Vec<String>>,
    /// Natural-log scale GLM coefficients (genes x coefficients)
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    /// Coefficient covariance per gene (genes x coefs x coefs)
    covariances: Option<Array3<f64>>,
    converged: Option<Vec<bool>>,
}

impl DESeqDataSet {
    pub fn new(
        counts: CountMatrix,
        sample_metadata: SampleMetadata,
        design_variable: &str,
    ) -> Result<Self> {
        if counts.sample_ids() != sample_metadata.sample_ids() {
            return Err(AnalysisError::InvalidMetadata {
                reason: "Sample IDs in counts and metadata do not match".to_string(),
            });
        }

        if !sample_metadata.has_condition(design_variable) {
            return Err(AnalysisError::InvalidDesignMatrix {
                reason: format!("Design variable '{}' not found in metadata", design_variable),
            });
        }

        let levels = sample_metadata.levels(design_variable)?;
        if levels.len() < 2 {
            log::warn!(
                "Design variable '{}' has only one level ('{}'); \
                 differential expression testing requires at least two levels",
                design_variable,
                levels.first().map(|s| s.as_str()).unwrap_or(""),
            );
        }

        Ok(Self {
            counts,
            sample_metadata,
            design_variable: design_variable.to_string(),
            reference_level: None,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            mu: None,
            dispersion_function: None,
            dispersion_prior_var: None,
            design_matrix: None,
            design_column_names: None,
            coefficients: None,
            standard_errors: None,
            covariances: None,
            converged: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn sample_metadata(&self) -> &SampleMetadata {
        &self.sample_metadata
    }

    pub fn design_variable(&self) -> &str {
        &self.design_variable
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Levels of the design variable, sorted
    pub fn levels(&self) -> Result<Vec<String>> {
        self.sample_metadata.levels(&self.design_variable)
    }

    /// Explicit reference level, or the alphabetically first one
    pub fn reference_level(&self) -> Result<String> {
        if let Some(level) = &self.reference_level {
            return Ok(level.clone());
        }
        self.levels()?
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::InvalidDesignMatrix {
                reason: format!("Design variable '{}' has no levels", self.design_variable),
            })
    }

    pub fn set_reference_level(&mut self, level: &str) -> Result<()> {
        self.sample_metadata
            .require_level(&self.design_variable, level)?;
        self.reference_level = Some(level.to_string());
        Ok(())
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    /// Dispersions used for the GLM fit: MAP if available, else gene-wise
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions
            .as_ref()
            .or(self.gene_dispersions.as_ref())
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn dispersion_function(&self) -> Option<(f64, f64)> {
        self.dispersion_function
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn design_matrix(&self) -> Option<&Array2<f64>> {
        self.design_matrix.as_ref()
    }

    pub fn design_column_names(&self) -> Option<&[String]> {
        self.design_column_names.as_deref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn covariances(&self) -> Option<&Array3<f64>> {
        self.covariances.as_ref()
    }

    pub fn converged(&self) -> Option<&[bool]> {
        self.converged.as_deref()
    }

    /// Set size factors and recompute normalized counts
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{} size factors", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(AnalysisError::SizeFactorFailed {
                reason: "Size factors must be positive and finite".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.compute_normalized_counts();
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "gene-wise dispersions")?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "trended dispersions")?;
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "MAP dispersions")?;
        self.map_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        self.check_shape(mu.dim(), "mu")?;
        self.mu = Some(mu);
        Ok(())
    }

    pub fn set_dispersion_function(&mut self, asympt_disp: f64, extra_pois: f64) {
        self.dispersion_function = Some((asympt_disp, extra_pois));
    }

    pub fn set_dispersion_prior_var(&mut self, var: f64) {
        self.dispersion_prior_var = Some(var);
    }

    pub fn set_design_matrix(&mut self, matrix: Array2<f64>, column_names: Vec<String>) -> Result<()> {
        if matrix.nrows() != self.n_samples() || matrix.ncols() != column_names.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} x {} design matrix", self.n_samples(), column_names.len()),
                got: format!("{} x {}", matrix.nrows(), matrix.ncols()),
            });
        }
        self.design_matrix = Some(matrix);
        self.design_column_names = Some(column_names);
        Ok(())
    }

    /// Store the GLM fit; all arrays are indexed by gene first
    pub fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        covariances: Array3<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        self.check_gene_len(coefficients.nrows(), "coefficient rows")?;
        if standard_errors.dim() != coefficients.dim() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{:?} standard errors", coefficients.dim()),
                got: format!("{:?}", standard_errors.dim()),
            });
        }
        let (n, p) = coefficients.dim();
        if covariances.dim() != (n, p, p) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{:?} covariances", (n, p, p)),
                got: format!("{:?}", covariances.dim()),
            });
        }
        self.check_gene_len(converged.len(), "convergence flags")?;

        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.covariances = Some(covariances);
        self.converged = Some(converged);
        Ok(())
    }

    fn compute_normalized_counts(&mut self) {
        if let Some(sf) = &self.size_factors {
            let mut normalized = self.counts.counts().to_owned();
            for (mut col, &s) in normalized.columns_mut().into_iter().zip(sf.iter()) {
                col.mapv_inplace(|x| x / s);
            }
            self.normalized_counts = Some(normalized);
        }
    }

    fn check_gene_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{} {}", len, what),
            });
        }
        Ok(())
    }

    fn check_shape(&self, dim: (usize, usize), what: &str) -> Result<()> {
        if dim != (self.n_genes(), self.n_samples()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} x {} {}", self.n_genes(), self.n_samples(), what),
                got: format!("{} x {}", dim.0, dim.1),
            });
        }
        Ok(())
    }

    pub fn has_size_factors(&self) -> bool {
        self.size_factors.is_some()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some()
    }
}
