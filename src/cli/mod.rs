//! Command-line interface for deseq_report

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::{discover_samples, ConditionRule, DiscoveryConfig, Sample, DEFAULT_SUFFIX};
use crate::error::{AnalysisError, Result};
use crate::io::read_sample_sheet;

#[derive(Parser)]
#[command(name = "deseq_report")]
#[command(version)]
#[command(about = "Differential expression reports from htseq-count output")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where the per-sample count files are and how they map to conditions
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Directory holding the per-sample count files
    #[arg(short, long, value_name = "DIR")]
    pub input_dir: PathBuf,

    /// File name suffix of count files [default: _htseq.out]
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,

    /// Condition rule LABEL=REGEX
    #[arg(short, long, value_name = "LABEL=REGEX",
        long_help = "Assign condition LABEL to every sample whose id matches REGEX.\n\
            The sample id is the file name without the suffix.\n\
            Repeat once per condition: -c 'Activated=^A' -c 'Unactivated=^U'\n\
            Each sample must match exactly one rule.")]
    pub condition: Vec<String>,

    /// Sample sheet CSV (sample,condition[,file]) instead of rules
    #[arg(short, long, value_name = "CSV", conflicts_with = "condition",
        long_help = "Sample sheet with columns sample,condition and an optional file column.\n\
            Without a file column, files are looked up as <input-dir>/<sample><suffix>.")]
    pub samples: Option<PathBuf>,
}

impl InputArgs {
    pub fn discovery_config(&self) -> Result<DiscoveryConfig> {
        let rules = self
            .condition
            .iter()
            .map(|r| r.parse::<ConditionRule>())
            .collect::<Result<Vec<_>>>()?;
        Ok(DiscoveryConfig {
            suffix: self.suffix.clone(),
            rules,
        })
    }

    /// Samples from the sheet if one is given, otherwise by directory discovery
    pub fn load_samples(&self) -> Result<Vec<Sample>> {
        if let Some(sheet) = &self.samples {
            return read_sample_sheet(sheet, &self.input_dir, &self.suffix);
        }
        if self.condition.is_empty() {
            return Err(AnalysisError::InvalidInput {
                reason: "either --condition LABEL=REGEX (repeatable) or --samples is required".to_string(),
            });
        }
        discover_samples(&self.input_dir, &self.discovery_config()?)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline and write result tables and plots
    #[command(
        long_about = "Run the full pipeline\n\n\
            Discovers count files, assembles the count matrix, fits the negative\n\
            binomial model and writes, for the treatment vs reference comparison:\n\
            <T>_vs_<R>_allgenes.csv    every gene, sorted by log2 fold change\n\
            <T>_vs_<R>_padj_cutoff.csv genes with padj below the cutoff\n\
            plus heatmap, volcano and PCA plots as SVG.",
        after_long_help = "\
Examples:
  # Rules on sample ids
  deseq_report run -i counts -c 'Activated=^A' -c 'Unactivated=^U' \\
    --treatment Activated --reference Unactivated -o results

  # Sample sheet, no plots, JSON summary
  deseq_report run -i counts -s samples.csv --treatment Activated \\
    --reference Unactivated --no-plots --summary-json"
    )]
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Treatment condition (numerator of the fold change)
        #[arg(long)]
        treatment: String,

        /// Reference condition (denominator of the fold change)
        #[arg(long)]
        reference: String,

        /// Adjusted p-value cutoff for the filtered table [default: 0.001]
        #[arg(long, default_value = "0.001",
            long_help = "Genes with padj strictly below this value enter the filtered table.")]
        cutoff: f64,

        /// Target FDR for independent filtering [default: 0.1]
        #[arg(short, long, default_value = "0.1")]
        alpha: f64,

        /// Disable independent filtering (just apply BH to all genes)
        #[arg(long,
            long_help = "Disable independent filtering.\n\
                By default, low-count genes are removed before p-value adjustment\n\
                when that increases the number of rejections. When this flag is\n\
                set, BH adjustment is applied directly to all tested genes.")]
        no_independent_filtering: bool,

        /// Size factor estimation method [default: ratio]
        #[arg(long, default_value = "ratio",
            long_help = "Size factor estimation method.\n\
                ratio:     Median of ratios\n\
                poscounts: Ratios over positive counts only, for sparse data")]
        sf_type: String,

        /// Output directory [default: results]
        #[arg(short, long, default_value = "results")]
        outdir: PathBuf,

        /// Skip heatmap, volcano and PCA plots
        #[arg(long)]
        no_plots: bool,

        /// Genes in the heatmap [default: 30]
        #[arg(long, default_value = "30")]
        heatmap_rows: usize,

        /// Most variable genes used for PCA [default: 500]
        #[arg(long, default_value = "500")]
        pca_top: usize,

        /// Genes labelled in the volcano plot [default: 20]
        #[arg(long, default_value = "20")]
        volcano_labels: usize,

        /// Also write <T>_vs_<R>_summary.json
        #[arg(long)]
        summary_json: bool,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// List discovered samples and their conditions
    #[command(after_long_help = "\
Examples:
  deseq_report discover -i counts -c 'Activated=^A' -c 'Unactivated=^U'")]
    Discover {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Merge count files into one gene x sample matrix
    #[command(after_long_help = "\
Examples:
  deseq_report assemble -i counts -c 'Activated=^A' -c 'Unactivated=^U' -o counts.csv")]
    Assemble {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path [default: count_matrix.csv]
        #[arg(short, long, default_value = "count_matrix.csv")]
        output: PathBuf,
    },

    /// Draw heatmap and volcano plots from an existing _allgenes.csv
    #[command(after_long_help = "\
Examples:
  deseq_report plot -t results/Activated_vs_Unactivated_allgenes.csv -o results")]
    Plot {
        /// Full result table written by `run`
        #[arg(short, long, value_name = "CSV")]
        table: PathBuf,

        /// Adjusted p-value cutoff [default: 0.001]
        #[arg(long, default_value = "0.001")]
        cutoff: f64,

        /// Output directory [default: .]
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Genes in the heatmap [default: 30]
        #[arg(long, default_value = "30")]
        heatmap_rows: usize,

        /// Genes labelled in the volcano plot [default: 20]
        #[arg(long, default_value = "20")]
        volcano_labels: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_run_defaults() {
        let cli = parse(&[
            "deseq_report",
            "run",
            "-i",
            "counts",
            "-c",
            "Activated=^A",
            "-c",
            "Unactivated=^U",
            "--treatment",
            "Activated",
            "--reference",
            "Unactivated",
        ]);
        match cli.command {
            Some(Commands::Run {
                input,
                cutoff,
                alpha,
                outdir,
                heatmap_rows,
                pca_top,
                volcano_labels,
                no_independent_filtering,
                ..
            }) => {
                assert_eq!(input.suffix, "_htseq.out");
                assert_eq!(input.condition.len(), 2);
                assert_eq!(cutoff, 0.001);
                assert_eq!(alpha, 0.1);
                assert_eq!(outdir, PathBuf::from("results"));
                assert_eq!((heatmap_rows, pca_top, volcano_labels), (30, 500, 20));
                assert!(!no_independent_filtering);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_sheet_conflicts_with_rules() {
        let res = Cli::try_parse_from([
            "deseq_report",
            "discover",
            "-i",
            "counts",
            "-c",
            "A=^A",
            "-s",
            "sheet.csv",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = parse(&["deseq_report", "discover", "-i", "d", "-c", "A=^A", "-v"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_load_samples_from_rules() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A1_htseq.out"), "g\t1\n").unwrap();
        fs::write(dir.path().join("U1_htseq.out"), "g\t2\n").unwrap();
        let input = InputArgs {
            input_dir: dir.path().to_path_buf(),
            suffix: DEFAULT_SUFFIX.to_string(),
            condition: vec!["Activated=^A".to_string(), "Unactivated=^U".to_string()],
            samples: None,
        };
        let samples = input.load_samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].condition, "Activated");

        let no_rules = InputArgs {
            condition: Vec::new(),
            ..input
        };
        assert!(no_rules.load_samples().is_err());
    }
}
