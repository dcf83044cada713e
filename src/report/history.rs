//! Optimization history and plots.
//!
//! [`History`] records the objective, every component's RVs and template
//! values after setup and after each iteration. At the end it can write SVG
//! line charts:
//!
//! - `{basename}_nll.svg`: objective per iteration
//! - `{basename}_{component}_rvs.svg`: each epoch's RV (minus its initial
//!   value) per iteration, for components with free RVs
//!
//! Plots carry no text, so no font backend is needed.

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use thiserror::Error;

use crate::models::Model;

/// Observer called by `Model::optimize` after setup state and after every iteration.
pub trait IterationHook {
    fn save_iter(&mut self, model: &Model<'_>, iteration: usize);
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("nothing recorded")]
    Empty,
    #[error("failed to draw '{}': {message}", .path.display())]
    Draw { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentHistory {
    pub name: String,
    pub rvs_fixed: bool,
    /// One entry per recorded iteration.
    pub rvs: Vec<Vec<f64>>,
    pub template_ys: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub iterations: Vec<usize>,
    pub nll: Vec<f64>,
    pub components: Vec<ComponentHistory>,
}

impl History {
    /// Prepare storage for `capacity` snapshots of `model`.
    pub fn new(model: &Model<'_>, capacity: usize) -> Self {
        let components = model
            .components()
            .iter()
            .map(|c| ComponentHistory {
                name: c.name().to_string(),
                rvs_fixed: c.rvs_fixed(),
                rvs: Vec::with_capacity(capacity),
                template_ys: Vec::with_capacity(capacity),
            })
            .collect();
        Self {
            iterations: Vec::with_capacity(capacity),
            nll: Vec::with_capacity(capacity),
            components,
        }
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHistory> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Write the history plots and return their paths.
    pub fn save_plots(&self, basename: &str) -> Result<Vec<PathBuf>, HistoryError> {
        if self.is_empty() {
            return Err(HistoryError::Empty);
        }
        let mut written = Vec::new();

        let nll_path = PathBuf::from(format!("{basename}_nll.svg"));
        let nll: Vec<(f64, f64)> = self
            .iterations
            .iter()
            .zip(&self.nll)
            .map(|(&i, &v)| (i as f64, v))
            .collect();
        draw_lines(&nll_path, &[nll])?;
        written.push(nll_path);

        for c in self.components.iter().filter(|c| !c.rvs_fixed) {
            let Some(first) = c.rvs.first() else {
                continue;
            };
            let series: Vec<Vec<(f64, f64)>> = (0..first.len())
                .map(|epoch| {
                    self.iterations
                        .iter()
                        .zip(&c.rvs)
                        .map(|(&i, rvs)| (i as f64, rvs[epoch] - first[epoch]))
                        .collect()
                })
                .collect();
            let path = PathBuf::from(format!("{basename}_{}_rvs.svg", c.name));
            draw_lines(&path, &series)?;
            written.push(path);
        }

        Ok(written)
    }
}

impl IterationHook for History {
    fn save_iter(&mut self, model: &Model<'_>, iteration: usize) {
        self.iterations.push(iteration);
        self.nll.push(model.nll().unwrap_or(f64::NAN));
        for (slot, c) in self.components.iter_mut().zip(model.components()) {
            slot.rvs.push(c.rvs().to_vec());
            slot.template_ys
                .push(c.template().map(|t| t.ys.clone()).unwrap_or_default());
        }
    }
}

const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

fn draw_lines(path: &Path, series: &[Vec<(f64, f64)>]) -> Result<(), HistoryError> {
    let fail = |message: String| HistoryError::Draw {
        path: path.to_path_buf(),
        message,
    };

    let points = series.iter().flatten().filter(|(x, y)| x.is_finite() && y.is_finite());
    let (mut x0, mut x1, mut y0, mut y1) = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
    }
    if !(x0.is_finite() && y0.is_finite()) {
        return Err(fail("no finite points".to_string()));
    }
    // Pad degenerate ranges so the chart has a non-empty extent.
    if x1 <= x0 {
        x1 = x0 + 1.0;
    }
    if y1 <= y0 {
        let pad = y0.abs().max(1.0) * 1e-3;
        y0 -= pad;
        y1 += pad;
    }

    let root = SVGBackend::new(path, (800, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| fail(e.to_string()))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(|e| fail(e.to_string()))?;
    for (k, line) in series.iter().enumerate() {
        let color = PALETTE[k % PALETTE.len()];
        chart
            .draw_series(LineSeries::new(
                line.iter().copied().filter(|(x, y)| x.is_finite() && y.is_finite()),
                &color,
            ))
            .map_err(|e| fail(e.to_string()))?;
    }
    root.present().map_err(|e| fail(e.to_string()))?;
    Ok(())
}
