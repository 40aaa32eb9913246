//! Heatmap, PCA and volcano plots
//!
//! Each plot has a `prepare_*` function producing plain data (tested) and a
//! `render_*` function drawing it into an SVG file.

mod heatmap;
mod pca;
mod volcano;

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

pub use heatmap::{prepare_heatmap, render_heatmap, HeatmapData};
pub use pca::{prepare_pca, render_pca, PcaPoint, PcaResult};
pub use volcano::{prepare_volcano, render_volcano, VolcanoData, VolcanoPoint};

use crate::error::{AnalysisError, Result};

/// Sizes of the generated plots
#[derive(Debug, Clone)]
pub struct PlotParams {
    /// Genes shown in the heatmap
    pub heatmap_rows: usize,
    /// Most variable genes used for PCA
    pub pca_top: usize,
    /// Genes named in the volcano plot
    pub volcano_labels: usize,
}

impl Default for PlotParams {
    fn default() -> Self {
        Self {
            heatmap_rows: 30,
            pca_top: 500,
            volcano_labels: 20,
        }
    }
}

pub(crate) type Canvas<'a> = DrawingArea<SVGBackend<'a>, Shift>;

pub(crate) fn plot_error<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Plot { reason: e.to_string() }
}

pub(crate) fn open_canvas(path: &Path, size: (u32, u32)) -> Result<Canvas<'_>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    Ok(root)
}

pub(crate) fn label(root: &Canvas, text: &str, pos: (i32, i32), size: u32) -> Result<()> {
    root.draw(&Text::new(
        text.to_string(),
        pos,
        ("sans-serif", size).into_font().color(&BLACK),
    ))
    .map_err(plot_error)
}

/// Pixel rectangle holding the data region of a scatter plot
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlotArea {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

impl PlotArea {
    pub fn x_px(&self, x: f64) -> i32 {
        let (lo, hi) = self.x_range;
        let frac = if hi > lo { (x - lo) / (hi - lo) } else { 0.5 };
        self.left + (frac * self.width as f64).round() as i32
    }

    pub fn y_px(&self, y: f64) -> i32 {
        let (lo, hi) = self.y_range;
        let frac = if hi > lo { (y - lo) / (hi - lo) } else { 0.5 };
        self.top + self.height - (frac * self.height as f64).round() as i32
    }

    /// Axes, light grid and axis labels with tick values
    pub fn draw_frame(&self, root: &Canvas, x_label: &str, y_label: &str) -> Result<()> {
        let bottom = self.top + self.height;
        let right = self.left + self.width;
        for i in 0..=5 {
            let f = i as f64 / 5.0;
            let x = self.left + (f * self.width as f64) as i32;
            let y = self.top + (f * self.height as f64) as i32;
            root.draw(&Rectangle::new(
                [(x, self.top), (x + 1, bottom)],
                RGBColor(225, 225, 225).filled(),
            ))
            .map_err(plot_error)?;
            root.draw(&Rectangle::new(
                [(self.left, y), (right, y + 1)],
                RGBColor(225, 225, 225).filled(),
            ))
            .map_err(plot_error)?;

            let xv = self.x_range.0 + f * (self.x_range.1 - self.x_range.0);
            let yv = self.y_range.1 - f * (self.y_range.1 - self.y_range.0);
            label(root, &format!("{:.1}", xv), (x - 10, bottom + 8), 12)?;
            label(root, &format!("{:.1}", yv), (self.left - 40, y - 6), 12)?;
        }
        root.draw(&Rectangle::new([(self.left, bottom - 1), (right, bottom + 1)], BLACK.filled()))
            .map_err(plot_error)?;
        root.draw(&Rectangle::new([(self.left - 1, self.top), (self.left + 1, bottom)], BLACK.filled()))
            .map_err(plot_error)?;
        label(root, x_label, (self.left + self.width / 2 - 40, bottom + 32), 16)?;
        label(root, y_label, (self.left - 70, self.top - 24), 16)?;
        Ok(())
    }
}

/// Range of `values` widened by `pad` of its span on both sides
pub(crate) fn padded_range(values: impl Iterator<Item = f64>, pad: f64) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (-1.0, 1.0);
    }
    let span = if hi > lo { hi - lo } else { 1.0 };
    (lo - pad * span, hi + pad * span)
}
