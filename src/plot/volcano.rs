use std::cmp::Ordering;
use std::path::Path;

use plotters::prelude::*;

use super::{label, open_canvas, padded_range, plot_error, PlotArea};
use crate::error::Result;
use crate::report::ResultTable;

#[derive(Debug, Clone, PartialEq)]
pub struct VolcanoPoint {
    pub gene_id: String,
    pub log2_fold_change: f64,
    /// -log10(padj); padj of 0 is clamped to the smallest positive f64
    pub neg_log10_padj: f64,
    pub significant: bool,
    pub labelled: bool,
}

#[derive(Debug, Clone)]
pub struct VolcanoData {
    pub points: Vec<VolcanoPoint>,
    pub cutoff: f64,
}

/// Points for every gene with defined fold change and padj
///
/// The `n_labels` significant genes with the smallest padj (larger absolute
/// fold change first on ties) are marked for labelling.
pub fn prepare_volcano(table: &ResultTable, cutoff: f64, n_labels: usize) -> VolcanoData {
    let mut points: Vec<VolcanoPoint> = table
        .rows()
        .iter()
        .filter_map(|r| {
            let (lfc, padj) = (r.log2_fold_change?, r.padj?);
            Some(VolcanoPoint {
                gene_id: r.gene_id.clone(),
                log2_fold_change: lfc,
                neg_log10_padj: -padj.max(f64::MIN_POSITIVE).log10(),
                significant: padj < cutoff,
                labelled: false,
            })
        })
        .collect();

    let mut ranked: Vec<usize> = (0..points.len()).filter(|&i| points[i].significant).collect();
    ranked.sort_by(|&i, &j| {
        let (a, b) = (&points[i], &points[j]);
        b.neg_log10_padj
            .partial_cmp(&a.neg_log10_padj)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.log2_fold_change
                    .abs()
                    .partial_cmp(&a.log2_fold_change.abs())
                    .unwrap_or(Ordering::Equal)
            })
    });
    for &i in ranked.iter().take(n_labels) {
        points[i].labelled = true;
    }

    VolcanoData { points, cutoff }
}

pub fn render_volcano(data: &VolcanoData, title: &str, path: &Path) -> Result<()> {
    let root = open_canvas(path, (900, 700))?;
    label(&root, title, (20, 20), 22)?;

    let threshold = -data.cutoff.log10();
    let x_max = padded_range(data.points.iter().map(|p| p.log2_fold_change.abs()), 0.05).1;
    let (_, y_max) = padded_range(
        data.points.iter().map(|p| p.neg_log10_padj).chain(std::iter::once(threshold)),
        0.05,
    );
    let area = PlotArea {
        left: 100,
        top: 80,
        width: 720,
        height: 520,
        x_range: (-x_max, x_max),
        y_range: (0.0, y_max),
    };
    area.draw_frame(&root, "log2 fold change", "-log10 padj")?;

    let y_cut = area.y_px(threshold);
    root.draw(&Rectangle::new(
        [(area.left, y_cut), (area.left + area.width, y_cut + 1)],
        RGBColor(120, 120, 120).filled(),
    ))
    .map_err(plot_error)?;
    label(&root, &format!("padj = {}", data.cutoff), (area.left + area.width - 90, y_cut - 16), 11)?;

    // Non-significant points first so significant ones stay on top
    for p in data.points.iter().filter(|p| !p.significant) {
        root.draw(&Circle::new(
            (area.x_px(p.log2_fold_change), area.y_px(p.neg_log10_padj)),
            2,
            RGBColor(170, 170, 170).filled(),
        ))
        .map_err(plot_error)?;
    }
    for p in data.points.iter().filter(|p| p.significant) {
        let color = if p.log2_fold_change >= 0.0 {
            RGBColor(200, 30, 40)
        } else {
            RGBColor(40, 80, 190)
        };
        root.draw(&Circle::new(
            (area.x_px(p.log2_fold_change), area.y_px(p.neg_log10_padj)),
            3,
            color.filled(),
        ))
        .map_err(plot_error)?;
    }
    for p in data.points.iter().filter(|p| p.labelled) {
        let (x, y) = (area.x_px(p.log2_fold_change), area.y_px(p.neg_log10_padj));
        label(&root, &p.gene_id, (x + 5, y - 12), 10)?;
    }

    root.present().map_err(plot_error)?;
    log::info!("Wrote volcano plot of {} genes to {}", data.points.len(), path.display());
    Ok(())
}
