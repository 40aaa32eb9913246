//! CSV and JSON output of extracted results

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};

use super::table::{CombinedRow, ResultTable};
use super::{Extraction, ExtractionSummary};
use crate::error::{AnalysisError, Result};

pub const GENE_COLUMN: &str = "Gene.name";
pub const LFC_COLUMN: &str = "log2FoldChange";
pub const PADJ_COLUMN: &str = "padj";
pub const MISSING: &str = "NA";

/// `NA` for undefined values, otherwise the shortest string that parses
/// back to the same `f64`
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => MISSING.to_string(),
    }
}

fn parse_value(field: &str, path: &Path, line: usize) -> Result<Option<f64>> {
    if field == MISSING || field.is_empty() {
        return Ok(None);
    }
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|_| AnalysisError::InvalidInput {
            reason: format!("{}: line {}: '{}' is not a number", path.display(), line, field),
        })
}

/// Write a table as `Gene.name,log2FoldChange,padj,<samples...>`
pub fn write_table<W: Write>(table: &ResultTable, writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);

    let mut header = vec![GENE_COLUMN.to_string(), LFC_COLUMN.to_string(), PADJ_COLUMN.to_string()];
    header.extend(table.sample_ids().iter().cloned());
    wtr.write_record(&header)?;

    for row in table.rows() {
        let mut record = vec![
            row.gene_id.clone(),
            format_value(row.log2_fold_change),
            format_value(row.padj),
        ];
        record.extend(row.normalized_counts.iter().map(|&c| format_value(Some(c))));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_result_table<P: AsRef<Path>>(path: P, table: &ResultTable) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_table(table, BufWriter::new(file))
}

/// Output file names for a contrast: (filtered, full)
pub fn output_paths(out_dir: &Path, contrast_name: &str) -> (PathBuf, PathBuf) {
    (
        out_dir.join(format!("{}_padj_cutoff.csv", contrast_name)),
        out_dir.join(format!("{}_allgenes.csv", contrast_name)),
    )
}

/// Write the filtered and the full table into `out_dir`
///
/// Returns the paths written, filtered table first.
pub fn write_extraction<P: AsRef<Path>>(extraction: &Extraction, out_dir: P) -> Result<(PathBuf, PathBuf)> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir)?;

    let (filtered_path, all_path) = output_paths(out_dir, &extraction.summary.contrast);
    write_result_table(&filtered_path, &extraction.filtered)?;
    write_result_table(&all_path, &extraction.all)?;

    log::info!(
        "Wrote {} ({} genes) and {} ({} genes)",
        filtered_path.display(),
        extraction.filtered.len(),
        all_path.display(),
        extraction.all.len()
    );
    Ok((filtered_path, all_path))
}

pub fn write_summary_json<P: AsRef<Path>>(summary: &ExtractionSummary, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    Ok(())
}

/// Read a table written by `write_table`
///
/// Base means are recomputed from the normalized counts; raw p-values are not
/// part of the file and come back undefined.
pub fn read_result_table<P: AsRef<Path>>(path: P) -> Result<ResultTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AnalysisError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let mut reader = ReaderBuilder::new().from_path(path)?;

    let header = reader.headers()?.clone();
    let expected = [GENE_COLUMN, LFC_COLUMN, PADJ_COLUMN];
    if header.len() < 3 || header.iter().take(3).ne(expected.iter().copied()) {
        return Err(AnalysisError::InvalidInput {
            reason: format!(
                "{}: expected columns {} followed by sample ids",
                path.display(),
                expected.join(",")
            ),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(3).map(|s| s.to_string()).collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = i + 2;
        let counts = record
            .iter()
            .skip(3)
            .map(|f| {
                parse_value(f, path, line)?.ok_or_else(|| AnalysisError::InvalidInput {
                    reason: format!("{}: line {}: missing normalized count", path.display(), line),
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        let base_mean = if counts.is_empty() {
            0.0
        } else {
            counts.iter().sum::<f64>() / counts.len() as f64
        };
        rows.push(CombinedRow {
            gene_id: record.get(0).unwrap_or_default().to_string(),
            log2_fold_change: parse_value(record.get(1).unwrap_or_default(), path, line)?,
            padj: parse_value(record.get(2).unwrap_or_default(), path, line)?,
            pvalue: None,
            base_mean,
            normalized_counts: counts,
        });
    }

    ResultTable::new(sample_ids, rows)
}
