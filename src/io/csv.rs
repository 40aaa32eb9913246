//! Delimited text files: merged count matrices and sample sheets

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;
use serde::Deserialize;

use crate::data::{CountMatrix, Sample};
use crate::error::{AnalysisError, Result};

/// Tab if the header line holds one, comma otherwise
fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(open(path)?).read_line(&mut header)?;
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnalysisError::MissingInput {
            path: path.to_path_buf(),
        },
        _ => AnalysisError::IoError(e),
    })
}

/// Read a count matrix from a CSV or TSV file
///
/// Expected format: first column is gene IDs, first row is sample IDs.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let delimiter = detect_delimiter(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(open(path)?);

    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(AnalysisError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(|s| s.to_string()).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != n_samples + 1 {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!(
                    "Row {} has {} columns, expected {}",
                    gene_ids.len() + 2,
                    record.len(),
                    n_samples + 1
                ),
            });
        }
        gene_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let v: f64 = field.parse().map_err(|_| AnalysisError::InvalidCountMatrix {
                reason: format!("Invalid count value: {}", field),
            })?;
            values.push(v);
        }
    }

    if gene_ids.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        AnalysisError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Write a count matrix as CSV with a `gene_id` header column
pub fn write_count_matrix<P: AsRef<Path>>(path: P, matrix: &CountMatrix) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path.as_ref())?;

    let mut header = vec!["gene_id".to_string()];
    header.extend(matrix.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    for (i, gene) in matrix.gene_ids().iter().enumerate() {
        let mut row = Vec::with_capacity(matrix.n_samples() + 1);
        row.push(gene.clone());
        row.extend(matrix.gene_counts(i).iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SheetRow {
    sample: String,
    condition: String,
    #[serde(default)]
    file: Option<String>,
}

/// Read a `sample,condition[,file]` sheet
///
/// Without a `file` column (or with an empty cell) the file is
/// `<dir>/<sample><suffix>`; relative paths are resolved against `dir`.
/// Rows keep their sheet order.
pub fn read_sample_sheet<P: AsRef<Path>>(path: P, dir: &Path, suffix: &str) -> Result<Vec<Sample>> {
    let path = path.as_ref();
    let delimiter = detect_delimiter(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(open(path)?);

    let mut samples = Vec::new();
    for row in reader.deserialize() {
        let row: SheetRow = row?;
        if row.sample.is_empty() || row.condition.is_empty() {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!(
                    "Sample sheet row {} has an empty sample or condition",
                    samples.len() + 2
                ),
            });
        }
        let file = match row.file.as_deref() {
            Some(f) if !f.is_empty() => {
                let p = PathBuf::from(f);
                if p.is_absolute() {
                    p
                } else {
                    dir.join(p)
                }
            }
            _ => dir.join(format!("{}{}", row.sample, suffix)),
        };
        samples.push(Sample {
            id: row.sample,
            condition: row.condition,
            path: file,
        });
    }

    if samples.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: format!("No samples in sheet {}", path.display()),
        });
    }
    log::info!("Read {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(file, "gene1\t100\t200\t150").unwrap();
        writeln!(file, "gene2\t50\t75\t60").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[1, 2]], 60.0);
    }

    #[test]
    fn test_count_matrix_written_then_read() {
        let matrix = CountMatrix::new(
            array![[1.0, 2.0], [30.0, 0.0]],
            vec!["Il12b".to_string(), "Ccr7".to_string()],
            vec!["A1".to_string(), "U1".to_string()],
        )
        .unwrap();
        let file = NamedTempFile::new().unwrap();
        write_count_matrix(file.path(), &matrix).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.starts_with("gene_id,A1,U1\nIl12b,1,2\n"));
        let back = read_count_matrix(file.path()).unwrap();
        assert_eq!(back.gene_ids(), matrix.gene_ids());
        assert_eq!(back.counts(), matrix.counts());
    }

    #[test]
    fn test_sample_sheet_paths() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample,condition,file").unwrap();
        writeln!(file, "A1,Activated,").unwrap();
        writeln!(file, "U1,Unactivated,custom/U1.txt").unwrap();

        let dir = Path::new("/data/counts");
        let samples = read_sample_sheet(file.path(), dir, "_htseq.out").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].path, PathBuf::from("/data/counts/A1_htseq.out"));
        assert_eq!(samples[1].path, PathBuf::from("/data/counts/custom/U1.txt"));
        assert_eq!(samples[1].condition, "Unactivated");
    }

    #[test]
    fn test_sample_sheet_without_file_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample,condition").unwrap();
        writeln!(file, "A1,Activated").unwrap();
        let samples = read_sample_sheet(file.path(), Path::new("in"), "_htseq.out").unwrap();
        assert_eq!(samples[0].path, PathBuf::from("in/A1_htseq.out"));
    }
}
