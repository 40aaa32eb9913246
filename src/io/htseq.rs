//! htseq-count output files: one `gene<TAB>count` line per feature

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::Serialize;

use crate::data::{CountMatrix, Sample};
use crate::error::{AnalysisError, Result};

/// Prefix htseq-count uses for its summary lines
pub const COUNTER_PREFIX: &str = "__";

/// Reads htseq-count could not assign to a single feature
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HtseqCounters {
    pub no_feature: u64,
    pub ambiguous: u64,
    pub too_low_aqual: u64,
    pub not_aligned: u64,
    pub alignment_not_unique: u64,
    /// Summary lines not in the list above
    pub other: u64,
}

impl HtseqCounters {
    fn record(&mut self, name: &str, value: u64) {
        let slot = match name {
            "__no_feature" => &mut self.no_feature,
            "__ambiguous" => &mut self.ambiguous,
            "__too_low_aQual" => &mut self.too_low_aqual,
            "__not_aligned" => &mut self.not_aligned,
            "__alignment_not_unique" => &mut self.alignment_not_unique,
            _ => &mut self.other,
        };
        *slot += value;
    }

    pub fn total(&self) -> u64 {
        self.no_feature
            + self.ambiguous
            + self.too_low_aqual
            + self.not_aligned
            + self.alignment_not_unique
            + self.other
    }
}

/// Per-gene counts of one sample, in file order
#[derive(Debug, Clone)]
pub struct HtseqCounts {
    pub path: PathBuf,
    pub genes: Vec<String>,
    pub counts: Vec<u64>,
    pub counters: HtseqCounters,
}

impl HtseqCounts {
    pub fn assigned(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Parse one htseq-count output file
pub fn read_htseq_counts<P: AsRef<Path>>(path: P) -> Result<HtseqCounts> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnalysisError::MissingInput {
            path: path.to_path_buf(),
        },
        _ => AnalysisError::IoError(e),
    })?;

    let malformed = |line: usize, reason: String| AnalysisError::MalformedCountFile {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut genes = Vec::new();
    let mut counts = Vec::new();
    let mut counters = HtseqCounters::default();
    let mut seen = HashSet::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim_end_matches('\r');
        if trimmed.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() != 2 {
            return Err(malformed(
                line_no,
                format!("expected 2 tab-separated fields, found {}", fields.len()),
            ));
        }

        let gene = fields[0].trim();
        if gene.is_empty() {
            return Err(malformed(line_no, "empty gene identifier".to_string()));
        }
        let value = fields[1].trim();
        let count: u64 = value
            .parse()
            .map_err(|_| malformed(line_no, format!("count '{}' is not a non-negative integer", value)))?;

        if gene.starts_with(COUNTER_PREFIX) {
            counters.record(gene, count);
            continue;
        }
        if !seen.insert(gene.to_string()) {
            return Err(malformed(line_no, format!("duplicate gene '{}'", gene)));
        }
        genes.push(gene.to_string());
        counts.push(count);
    }

    if genes.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("No gene counts in {}", path.display()),
        });
    }

    log::debug!(
        "{}: {} genes, {} assigned reads, {} unassigned",
        path.display(),
        genes.len(),
        counts.iter().sum::<u64>(),
        counters.total()
    );

    Ok(HtseqCounts {
        path: path.to_path_buf(),
        genes,
        counts,
        counters,
    })
}

/// Merge per-sample count files into one gene x sample matrix
///
/// Rows follow the gene order of the first file. Every other file must list
/// exactly the same genes. Returns the summary counters per sample alongside.
pub fn assemble_count_matrix(samples: &[Sample]) -> Result<(CountMatrix, Vec<HtseqCounters>)> {
    let first = samples.first().ok_or_else(|| AnalysisError::EmptyData {
        reason: "No samples to assemble".to_string(),
    })?;

    let reference = read_htseq_counts(&first.path)?;
    let n_genes = reference.genes.len();
    let row_of: HashMap<&str, usize> = reference
        .genes
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();

    let mut counts = Array2::<f64>::zeros((n_genes, samples.len()));
    for (i, &c) in reference.counts.iter().enumerate() {
        counts[[i, 0]] = c as f64;
    }
    let mut all_counters = vec![reference.counters.clone()];

    for (j, sample) in samples.iter().enumerate().skip(1) {
        let file = read_htseq_counts(&sample.path)?;

        let mut filled = vec![false; n_genes];
        for (gene, &c) in file.genes.iter().zip(file.counts.iter()) {
            let row = *row_of.get(gene.as_str()).ok_or_else(|| AnalysisError::GeneSetMismatch {
                path: sample.path.clone(),
                reason: format!(
                    "contains gene '{}' absent from {}",
                    gene,
                    first.path.display()
                ),
            })?;
            counts[[row, j]] = c as f64;
            filled[row] = true;
        }
        if let Some(missing) = filled.iter().position(|&f| !f) {
            return Err(AnalysisError::GeneSetMismatch {
                path: sample.path.clone(),
                reason: format!(
                    "lacks gene '{}' present in {}",
                    reference.genes[missing],
                    first.path.display()
                ),
            });
        }
        all_counters.push(file.counters);
    }

    let sample_ids = samples.iter().map(|s| s.id.clone()).collect();
    let matrix = CountMatrix::new(counts, reference.genes, sample_ids)?;
    log::info!(
        "Assembled count matrix: {} genes x {} samples",
        matrix.n_genes(),
        matrix.n_samples()
    );
    Ok((matrix, all_counters))
}
