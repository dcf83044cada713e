//! Template grids and inverse-variance weighted binning.

use nalgebra::DMatrix;

use crate::math::interp::{Edge, interp_linear};

/// Log-uniform template spacing: twice the log step of 0.01 Å at 6000 Å.
pub const TEMPLATE_STEP: f64 = 3.333_330_555_558_642e-6;

/// Number of template steps added beyond the data on each side.
pub const TEMPLATE_PAD_STEPS: f64 = 10.0;

/// Build the default template grid covering `[lo, hi]` plus padding.
///
/// Like a stepped range, the upper end is exclusive: the last node is the
/// largest `start + i * step` below `hi + pad`.
pub fn log_uniform_grid(lo: f64, hi: f64) -> Vec<f64> {
    let step = TEMPLATE_STEP;
    let start = lo - TEMPLATE_PAD_STEPS * step;
    let stop = hi + TEMPLATE_PAD_STEPS * step;
    let n = ((stop - start) / step).ceil().max(2.0) as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Bin scattered samples onto `grid` using inverse-variance weighted means.
///
/// Each sample goes to its nearest grid node; bin edges sit halfway between
/// nodes and the outer bins extend by half their neighbouring spacing. Samples
/// with non-positive inverse variance or non-finite values are skipped.
///
/// Empty bins are filled by clamped linear interpolation between the
/// non-empty ones. Returns `None` when every bin is empty.
///
/// # Panics
/// Panics if `xs`, `ys` and `ivars` do not share a shape, or if `grid` has
/// fewer than two nodes.
pub fn bin_data(
    xs: &DMatrix<f64>,
    ys: &DMatrix<f64>,
    ivars: &DMatrix<f64>,
    grid: &[f64],
) -> Option<Vec<f64>> {
    assert_eq!(xs.shape(), ys.shape());
    assert_eq!(xs.shape(), ivars.shape());
    assert!(grid.len() >= 2, "template grid needs at least two nodes");

    let m = grid.len();
    let lower = grid[0] - 0.5 * (grid[1] - grid[0]);
    let upper = grid[m - 1] + 0.5 * (grid[m - 1] - grid[m - 2]);

    let mut sum_wy = vec![0.0; m];
    let mut sum_w = vec![0.0; m];

    for ((&x, &y), &w) in xs.iter().zip(ys.iter()).zip(ivars.iter()) {
        if !(w > 0.0 && y.is_finite() && x.is_finite()) {
            continue;
        }
        if x < lower || x >= upper {
            continue;
        }
        let k = nearest_node(grid, x);
        sum_wy[k] += w * y;
        sum_w[k] += w;
    }

    let filled: Vec<usize> = (0..m).filter(|&k| sum_w[k] > 0.0).collect();
    if filled.is_empty() {
        return None;
    }

    let known_x: Vec<f64> = filled.iter().map(|&k| grid[k]).collect();
    let known_y: Vec<f64> = filled.iter().map(|&k| sum_wy[k] / sum_w[k]).collect();
    if filled.len() == m {
        return Some(known_y);
    }

    let mut out = interp_linear(grid.iter().copied(), &known_x, &known_y, Edge::Clamp);
    for (&k, &y) in filled.iter().zip(known_y.iter()) {
        out[k] = y;
    }
    Some(out)
}

fn nearest_node(grid: &[f64], x: f64) -> usize {
    let above = grid.partition_point(|&g| g <= x);
    if above == 0 {
        return 0;
    }
    if above >= grid.len() {
        return grid.len() - 1;
    }
    let lo = above - 1;
    // Ties go to the upper node, matching half-open bins [t - h, t + h).
    if x - grid[lo] < grid[above] - x {
        lo
    } else {
        above
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_uniform_and_padded() {
        let grid = log_uniform_grid(8.70, 8.71);
        assert!(crate::math::is_strictly_increasing(&grid));
        assert!(grid[0] <= 8.70 - 9.0 * TEMPLATE_STEP);
        assert!(*grid.last().unwrap() >= 8.71 + 8.5 * TEMPLATE_STEP);
        let step = grid[1] - grid[0];
        assert!((step - TEMPLATE_STEP).abs() < 1e-12);
    }

    #[test]
    fn template_step_matches_reference_ratio() {
        let expected = 2.0 * (6000.01_f64.ln() - 6000.0_f64.ln());
        assert!((TEMPLATE_STEP - expected).abs() < 1e-13);
    }

    #[test]
    fn weighted_mean_per_bin() {
        let grid = [0.0, 1.0, 2.0];
        let xs = DMatrix::from_row_slice(1, 4, &[0.1, -0.2, 1.05, 1.9]);
        let ys = DMatrix::from_row_slice(1, 4, &[1.0, 3.0, 5.0, 7.0]);
        let ivars = DMatrix::from_row_slice(1, 4, &[1.0, 3.0, 1.0, 2.0]);
        let out = bin_data(&xs, &ys, &ivars, &grid).unwrap();
        assert!((out[0] - 2.5).abs() < 1e-12);
        assert!((out[1] - 5.0).abs() < 1e-12);
        assert!((out[2] - 7.0).abs() < 1e-12);
    }

    #[test]
    fn empty_bins_are_filled_not_nan() {
        let grid = [0.0, 1.0, 2.0, 3.0];
        let xs = DMatrix::from_row_slice(1, 2, &[0.0, 3.0]);
        let ys = DMatrix::from_row_slice(1, 2, &[1.0, 4.0]);
        let ivars = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let out = bin_data(&xs, &ys, &ivars, &grid).unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[1] - 2.0).abs() < 1e-12);
        assert!((out[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_ivar_everywhere_is_none() {
        let grid = [0.0, 1.0];
        let xs = DMatrix::from_row_slice(1, 2, &[0.0, 1.0]);
        let ys = DMatrix::from_row_slice(1, 2, &[1.0, 4.0]);
        let ivars = DMatrix::zeros(1, 2);
        assert!(bin_data(&xs, &ys, &ivars, &grid).is_none());
    }
}
