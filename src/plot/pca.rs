use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2, Axis};
use plotters::prelude::*;

use super::{label, open_canvas, padded_range, plot_error, PlotArea};
use crate::error::{AnalysisError, Result};

/// One sample projected on the first two principal components
#[derive(Debug, Clone, PartialEq)]
pub struct PcaPoint {
    pub sample_id: String,
    pub condition: String,
    pub pc1: f64,
    pub pc2: f64,
}

#[derive(Debug, Clone)]
pub struct PcaResult {
    pub points: Vec<PcaPoint>,
    /// Percent of total variance on PC1 and PC2
    pub percent_var: [f64; 2],
}

/// Eigenvalues in decreasing order with the matching eigenvectors as columns
fn symmetric_eigen(matrix: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let m = DMatrix::from_fn(n, n, |i, j| matrix[[i, j]]);
    let eigen = SymmetricEigen::new(m);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        eigen.eigenvalues[j]
            .partial_cmp(&eigen.eigenvalues[i])
            .unwrap_or(Ordering::Equal)
    });
    let values = order.iter().map(|&k| eigen.eigenvalues[k]).collect();
    let vectors = Array2::from_shape_fn((n, n), |(i, k)| eigen.eigenvectors[(i, order[k])]);
    (values, vectors)
}

/// PCA of samples on the `ntop` most variable genes
///
/// `matrix` is genes x samples on a variance-stabilized scale. Scores are
/// taken from the eigen-decomposition of the samples x samples
/// cross-product of the gene-centred data; each component's sign is fixed so
/// that its largest loading is positive.
pub fn prepare_pca(
    matrix: ArrayView2<f64>,
    sample_ids: &[String],
    conditions: &[String],
    ntop: usize,
) -> Result<PcaResult> {
    let (n_genes, n_samples) = matrix.dim();
    if sample_ids.len() != n_samples || conditions.len() != n_samples {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} sample ids and conditions", n_samples),
            got: format!("{} ids, {} conditions", sample_ids.len(), conditions.len()),
        });
    }
    if n_samples < 2 || n_genes == 0 || ntop == 0 {
        return Err(AnalysisError::InvalidInput {
            reason: format!("PCA needs at least 2 samples and 1 gene, got {} x {}", n_genes, n_samples),
        });
    }

    let mut by_var: Vec<(usize, f64)> = matrix
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| (i, row.var(1.0)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    by_var.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    by_var.truncate(ntop);
    let selected: Vec<usize> = by_var.iter().map(|&(i, _)| i).collect();
    log::debug!("PCA on {} of {} genes", selected.len(), n_genes);

    // samples x selected genes, centred per gene
    let mut x = matrix.select(Axis(0), &selected).reversed_axes();
    for mut col in x.axis_iter_mut(Axis(1)) {
        let m = col.mean().unwrap_or(0.0);
        col.mapv_inplace(|v| v - m);
    }
    let gram = x.dot(&x.t()) / (n_samples - 1) as f64;

    let (values, vectors) = symmetric_eigen(&gram);
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();
    let component = |k: usize| -> Vec<f64> {
        if k >= values.len() {
            return vec![0.0; n_samples];
        }
        let sd = (values[k].max(0.0) * (n_samples - 1) as f64).sqrt();
        let col = vectors.column(k);
        let pivot = col.iter().fold(0.0_f64, |acc, &c| if c.abs() > acc.abs() { c } else { acc });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        col.iter().map(|&c| sign * c * sd).collect()
    };
    let pc1 = component(0);
    let pc2 = component(1);
    let pct = |k: usize| {
        if total > 0.0 && k < values.len() {
            100.0 * values[k].max(0.0) / total
        } else {
            0.0
        }
    };

    let points = (0..n_samples)
        .map(|j| PcaPoint {
            sample_id: sample_ids[j].clone(),
            condition: conditions[j].clone(),
            pc1: pc1[j],
            pc2: pc2[j],
        })
        .collect();
    Ok(PcaResult {
        points,
        percent_var: [pct(0), pct(1)],
    })
}

const PALETTE: [RGBColor; 6] = [
    RGBColor(228, 26, 28),
    RGBColor(55, 126, 184),
    RGBColor(77, 175, 74),
    RGBColor(152, 78, 163),
    RGBColor(255, 127, 0),
    RGBColor(166, 86, 40),
];

pub fn render_pca(pca: &PcaResult, path: &Path) -> Result<()> {
    let root = open_canvas(path, (900, 700))?;
    label(&root, "PCA of variance-stabilized counts", (20, 20), 22)?;

    let area = PlotArea {
        left: 100,
        top: 80,
        width: 560,
        height: 520,
        x_range: padded_range(pca.points.iter().map(|p| p.pc1), 0.1),
        y_range: padded_range(pca.points.iter().map(|p| p.pc2), 0.1),
    };
    area.draw_frame(
        &root,
        &format!("PC1: {:.0}% variance", pca.percent_var[0]),
        &format!("PC2: {:.0}% variance", pca.percent_var[1]),
    )?;

    let conditions: Vec<&str> = pca
        .points
        .iter()
        .map(|p| p.condition.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let color_of = |c: &str| {
        let idx = conditions.iter().position(|&k| k == c).unwrap_or(0);
        PALETTE[idx % PALETTE.len()]
    };

    for p in &pca.points {
        let (x, y) = (area.x_px(p.pc1), area.y_px(p.pc2));
        root.draw(&Circle::new((x, y), 6, color_of(p.condition.as_str()).filled()))
            .map_err(plot_error)?;
        label(&root, &p.sample_id, (x + 8, y - 14), 11)?;
    }

    let legend_x = area.left + area.width + 40;
    for (k, &cond) in conditions.iter().enumerate() {
        let y = area.top + 20 + 24 * k as i32;
        root.draw(&Circle::new((legend_x, y), 6, color_of(cond).filled()))
            .map_err(plot_error)?;
        label(&root, cond, (legend_x + 14, y - 7), 14)?;
    }

    root.present().map_err(plot_error)?;
    log::info!("Wrote PCA of {} samples to {}", pca.points.len(), path.display());
    Ok(())
}
