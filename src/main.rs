//! deseq_report command-line interface

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use deseq_report::cli::{Cli, Commands, InputArgs};
use deseq_report::plot::{
    prepare_heatmap, prepare_pca, prepare_volcano, render_heatmap, render_pca, render_volcano, PlotParams,
};
use deseq_report::prelude::*;
use deseq_report::report::{write_summary_json, ResultTable};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "discover", "assemble", "plot", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help" || a == "-h") {
            print_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("deseq_report {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            input,
            treatment,
            reference,
            cutoff,
            alpha,
            no_independent_filtering,
            sf_type,
            outdir,
            no_plots,
            heatmap_rows,
            pca_top,
            volcano_labels,
            summary_json,
            threads,
        }) => {
            let extract = ExtractParams {
                cutoff,
                alpha,
                independent_filtering: !no_independent_filtering,
            };
            let plots = if no_plots {
                None
            } else {
                Some(PlotParams {
                    heatmap_rows,
                    pca_top,
                    volcano_labels,
                })
            };
            run_report(
                &input,
                &treatment,
                &reference,
                &extract,
                &sf_type,
                &outdir,
                plots.as_ref(),
                summary_json,
                threads,
            )
        }
        Some(Commands::Discover { input }) => run_discover(&input),
        Some(Commands::Assemble { input, output }) => run_assemble(&input, &output),
        Some(Commands::Plot {
            table,
            cutoff,
            outdir,
            heatmap_rows,
            volcano_labels,
        }) => run_plot(&table, cutoff, &outdir, heatmap_rows, volcano_labels),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("deseq_report v{}", VERSION);
    println!("Run `deseq_report --help` for usage.");
}

fn print_help() {
    println!("deseq_report v{}", VERSION);
    println!("Differential expression reports from htseq-count output");
    println!();
    println!("Usage: deseq_report <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Discover, model, and write result tables and plots");
    println!("  discover   List samples and their conditions");
    println!("  assemble   Merge count files into one count matrix");
    println!("  plot       Heatmap and volcano plot from an existing result table");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h, --help       Print help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  deseq_report run -i counts -c 'Activated=^A' -c 'Unactivated=^U' \\");
    println!("    --treatment Activated --reference Unactivated -o results");
    println!();
    println!("Run `deseq_report <COMMAND> --help` for command-specific options.");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn log_samples(samples: &[Sample]) {
    let mut per_condition: BTreeMap<&str, usize> = BTreeMap::new();
    for s in samples {
        *per_condition.entry(s.condition.as_str()).or_default() += 1;
    }
    let groups: Vec<String> = per_condition.iter().map(|(c, n)| format!("{} {}", n, c)).collect();
    info!("{} samples: {}", samples.len(), groups.join(", "));
}

#[allow(clippy::too_many_arguments)]
fn run_report(
    input: &InputArgs,
    treatment: &str,
    reference: &str,
    extract: &ExtractParams,
    sf_type: &str,
    outdir: &Path,
    plots: Option<&PlotParams>,
    summary_json: bool,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }
    if treatment == reference {
        return Err(AnalysisError::InvalidContrast {
            reason: format!("treatment and reference are both '{}'", treatment),
        });
    }
    let sf_method: SizeFactorMethod = sf_type.parse()?;

    info!("Discovering samples in {}", input.input_dir.display());
    let samples = input.load_samples()?;
    log_samples(&samples);

    let dds = build_dataset(&samples, Some(reference))?;

    info!("Fitting model (size factors: {})...", sf_type);
    let model = run_deseq(dds, sf_method)?;

    info!("Extracting {} vs {}...", treatment, reference);
    let extraction = extract_results(&model, treatment, reference, extract)?;
    write_tables(&extraction, outdir, summary_json, &mut std::io::stdout())?;

    if let Some(params) = plots {
        let name = &extraction.summary.contrast;
        draw_table_plots(&extraction.all, &extraction.filtered, name, extract.cutoff, outdir, params)?;

        let transformed = vst(&model.dds, true)?;
        let conditions = model
            .dds
            .sample_metadata()
            .condition(CONDITION_COLUMN)
            .unwrap_or_default();
        let pca = prepare_pca(transformed.data.view(), &transformed.sample_ids, conditions, params.pca_top)?;
        render_pca(&pca, &outdir.join("pca.svg"))?;
    }
    Ok(())
}

/// Tables, summary and optional JSON; everything that does not need plotting
fn write_tables<W: Write>(extraction: &Extraction, outdir: &Path, summary_json: bool, out: &mut W) -> Result<()> {
    write_extraction(extraction, outdir)?;
    writeln!(out, "{}", extraction.summary)?;

    if summary_json {
        let path = outdir.join(format!("{}_summary.json", extraction.summary.contrast));
        write_summary_json(&extraction.summary, &path)?;
        info!("Wrote {}", path.display());
    }
    Ok(())
}

fn draw_table_plots(
    all: &ResultTable,
    filtered: &ResultTable,
    name: &str,
    cutoff: f64,
    outdir: &Path,
    params: &PlotParams,
) -> Result<()> {
    let title = name.replace("_vs_", " vs ");
    let heatmap = prepare_heatmap(filtered, params.heatmap_rows);
    render_heatmap(&heatmap, &title, &outdir.join(format!("{}_heatmap.svg", name)))?;

    let volcano = prepare_volcano(all, cutoff, params.volcano_labels);
    render_volcano(&volcano, &title, &outdir.join(format!("{}_volcano.svg", name)))?;
    Ok(())
}

fn run_discover(input: &InputArgs) -> Result<()> {
    let samples = input.load_samples()?;
    log_samples(&samples);
    println!("sample\tcondition\tfile");
    for s in &samples {
        println!("{}\t{}\t{}", s.id, s.condition, s.path.display());
    }
    Ok(())
}

fn run_assemble(input: &InputArgs, output: &Path) -> Result<()> {
    let samples = input.load_samples()?;
    log_samples(&samples);
    let (matrix, _) = assemble_count_matrix(&samples)?;
    info!("Count matrix: {} genes x {} samples", matrix.n_genes(), matrix.n_samples());
    write_count_matrix(output, &matrix)?;
    info!("Wrote {}", output.display());
    Ok(())
}

fn run_plot(table_path: &Path, cutoff: f64, outdir: &Path, heatmap_rows: usize, volcano_labels: usize) -> Result<()> {
    let all = read_result_table(table_path)?;
    let file_name = table_path.file_name().and_then(|n| n.to_str()).unwrap_or("results");
    let name = file_name
        .strip_suffix("_allgenes.csv")
        .or_else(|| file_name.strip_suffix(".csv"))
        .unwrap_or(file_name);

    let filtered = all.filter_padj(cutoff);
    info!("{}: {} of {} genes with padj < {}", name, filtered.len(), all.len(), cutoff);
    std::fs::create_dir_all(outdir)?;

    let params = PlotParams {
        heatmap_rows,
        volcano_labels,
        ..Default::default()
    };
    draw_table_plots(&all, &filtered, name, cutoff, outdir, &params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deseq_report::report::CombinedRow;
    use tempfile::TempDir;

    fn extraction() -> Extraction {
        let row = |gene: &str, lfc: f64, padj: f64| CombinedRow {
            gene_id: gene.to_string(),
            log2_fold_change: Some(lfc),
            padj: Some(padj),
            pvalue: Some(padj),
            base_mean: 50.0,
            normalized_counts: vec![40.0, 60.0],
        };
        let all = ResultTable::new(
            vec!["A1".into(), "U1".into()],
            vec![row("A", 2.5, 1e-4), row("B", 1.0, 0.5), row("C", -1.2, 5e-4)],
        )
        .unwrap();
        Extraction::new(&Contrast::new("condition", "Activated", "Unactivated"), all, 0.001, 3, None)
    }

    #[test]
    fn test_summary_printed_with_tables_before_plots() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        write_tables(&extraction(), dir.path(), true, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Activated vs Unactivated\n"));
        assert!(text.contains("passing cutoff     : 2, 66.67%"));
        for name in ["allgenes.csv", "padj_cutoff.csv", "summary.json"] {
            assert!(dir.path().join(format!("Activated_vs_Unactivated_{}", name)).exists(), "{}", name);
        }
        assert!(!dir.path().join("pca.svg").exists());
    }
}
