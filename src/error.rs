//! Error types for deseq_report

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the analysis pipeline
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("Malformed count file {}, line {line}: {reason}", path.display())]
    MalformedCountFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Gene sets differ between count files: {} {reason}", path.display())]
    GeneSetMismatch { path: PathBuf, reason: String },

    #[error("Sample discovery failed: {reason}")]
    SampleDiscovery { reason: String },

    #[error("Unknown condition label '{label}' (known: {known})")]
    UnknownCondition { label: String, known: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("GLM fitting failed: {reason}")]
    GlmFitFailed { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Plot rendering failed: {reason}")]
    Plot { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid condition pattern: {0}")]
    RegexError(#[from] regex::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
