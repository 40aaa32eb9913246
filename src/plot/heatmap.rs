use std::cmp::Ordering;
use std::path::Path;

use ndarray::Array2;
use plotters::prelude::*;

use super::{label, open_canvas, plot_error};
use crate::error::Result;
use crate::report::ResultTable;
use crate::stats::{mean, variance};

/// Row-standardized expression of the genes shown in a heatmap
#[derive(Debug, Clone)]
pub struct HeatmapData {
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    /// Genes x samples z-scores of log2(normalized + 1)
    pub values: Array2<f64>,
}

/// Pick the `n_rows` genes with the largest absolute fold change
///
/// Expects the filtered table. Each row is log2(x + 1) transformed and
/// centred to mean 0, sd 1; constant rows become all zeros.
pub fn prepare_heatmap(table: &ResultTable, n_rows: usize) -> HeatmapData {
    let mut ranked: Vec<_> = table
        .rows()
        .iter()
        .filter_map(|r| r.log2_fold_change.map(|l| (l.abs(), r)))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    ranked.truncate(n_rows);

    let n_samples = table.sample_ids().len();
    let mut values = Array2::zeros((ranked.len(), n_samples));
    for (i, (_, row)) in ranked.iter().enumerate() {
        let logged: Vec<f64> = row.normalized_counts.iter().map(|&c| (c + 1.0).log2()).collect();
        let m = mean(&logged);
        let sd = variance(&logged).sqrt();
        for (j, &x) in logged.iter().enumerate() {
            values[[i, j]] = if sd > 0.0 { (x - m) / sd } else { 0.0 };
        }
    }

    HeatmapData {
        genes: ranked.iter().map(|(_, r)| r.gene_id.clone()).collect(),
        samples: table.sample_ids().to_vec(),
        values,
    }
}

/// Blue (low) to white to red (high), saturating at |z| = 2
fn z_color(z: f64) -> RGBColor {
    let t = (z / 2.0).clamp(-1.0, 1.0);
    let blend = |from: u8, to: u8, w: f64| (from as f64 + (to as f64 - from as f64) * w).round() as u8;
    if t < 0.0 {
        RGBColor(blend(255, 49, -t), blend(255, 54, -t), blend(255, 149, -t))
    } else {
        RGBColor(blend(255, 165, t), blend(255, 0, t), blend(255, 38, t))
    }
}

pub fn render_heatmap(data: &HeatmapData, title: &str, path: &Path) -> Result<()> {
    let cell_w = 56;
    let cell_h = 20;
    let left = 160;
    let top = 110;
    let n_rows = data.genes.len().max(1) as i32;
    let n_cols = data.samples.len().max(1) as i32;
    let width = (left + n_cols * cell_w + 140) as u32;
    let height = (top + n_rows * cell_h + 40) as u32;

    let root = open_canvas(path, (width.max(480), height))?;
    label(&root, title, (20, 20), 22)?;

    if data.genes.is_empty() {
        label(&root, "No genes pass the cutoff", (left, top), 16)?;
        root.present().map_err(plot_error)?;
        return Ok(());
    }

    for (j, sample) in data.samples.iter().enumerate() {
        let x = left + j as i32 * cell_w;
        label(&root, sample, (x + 2, top - 18), 11)?;
    }

    for (i, gene) in data.genes.iter().enumerate() {
        let y = top + i as i32 * cell_h;
        label(&root, gene, (10, y + 4), 12)?;
        for j in 0..data.samples.len() {
            let x = left + j as i32 * cell_w;
            root.draw(&Rectangle::new(
                [(x, y), (x + cell_w - 1, y + cell_h - 1)],
                z_color(data.values[[i, j]]).filled(),
            ))
            .map_err(plot_error)?;
        }
    }

    // Colour key
    let key_x = left + n_cols * cell_w + 40;
    let key_h = 120;
    for k in 0..key_h {
        let z = 2.0 - 4.0 * k as f64 / (key_h - 1) as f64;
        root.draw(&Rectangle::new(
            [(key_x, top + k), (key_x + 18, top + k + 1)],
            z_color(z).filled(),
        ))
        .map_err(plot_error)?;
    }
    label(&root, "2", (key_x + 24, top - 4), 11)?;
    label(&root, "0", (key_x + 24, top + key_h / 2 - 6), 11)?;
    label(&root, "-2", (key_x + 24, top + key_h - 10), 11)?;
    label(&root, "z-score", (key_x - 4, top - 24), 12)?;

    root.present().map_err(plot_error)?;
    log::info!("Wrote heatmap of {} genes to {}", data.genes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CombinedRow;
    use tempfile::TempDir;

    fn row(gene: &str, lfc: Option<f64>, counts: Vec<f64>) -> CombinedRow {
        CombinedRow {
            gene_id: gene.to_string(),
            log2_fold_change: lfc,
            padj: Some(1e-5),
            pvalue: Some(1e-6),
            base_mean: 0.0,
            normalized_counts: counts,
        }
    }

    fn table() -> ResultTable {
        ResultTable::new(
            vec!["a1".into(), "a2".into(), "u1".into(), "u2".into()],
            vec![
                row("up", Some(3.0), vec![63.0, 127.0, 7.0, 15.0]),
                row("flat", Some(0.5), vec![10.0, 10.0, 10.0, 10.0]),
                row("down", Some(-4.0), vec![1.0, 3.0, 31.0, 63.0]),
                row("undef", None, vec![1.0, 2.0, 3.0, 4.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_ranked_by_absolute_fold_change() {
        let data = prepare_heatmap(&table(), 2);
        assert_eq!(data.genes, vec!["down", "up"]);
        assert_eq!(data.values.dim(), (2, 4));
    }

    #[test]
    fn test_rows_are_standardized() {
        let data = prepare_heatmap(&table(), 10);
        assert_eq!(data.genes.len(), 3);
        for i in 0..2 {
            let row: Vec<f64> = data.values.row(i).to_vec();
            assert!(mean(&row).abs() < 1e-12);
            assert!((variance(&row) - 1.0).abs() < 1e-12);
        }
        // Constant row
        let flat = data.genes.iter().position(|g| g == "flat").unwrap();
        assert!(data.values.row(flat).iter().all(|&z| z == 0.0));
        // "up" is highest in the first group
        assert!(data.values[[1, 1]] > data.values[[1, 2]]);
    }

    #[test]
    fn test_render_writes_svg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heatmap.svg");
        render_heatmap(&prepare_heatmap(&table(), 30), "A_vs_U", &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg") || svg.starts_with("<?xml"));
        assert!(svg.contains("down"));

        let empty = prepare_heatmap(&table().filter_padj(1e-9), 30);
        assert!(empty.genes.is_empty());
        render_heatmap(&empty, "none", &dir.path().join("empty.svg")).unwrap();
    }

    #[test]
    fn test_z_color_scale() {
        assert_eq!(z_color(0.0), RGBColor(255, 255, 255));
        assert_eq!(z_color(5.0), RGBColor(165, 0, 38));
        assert_eq!(z_color(-2.0), RGBColor(49, 54, 149));
    }
}
