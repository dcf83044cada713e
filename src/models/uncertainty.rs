//! RV uncertainties from local curvature.
//!
//! For every epoch independently, the objective's RV gradient is sampled at
//! `RV_GRID_POINTS` offsets spanning `±RV_GRID_HALF_WIDTH` m/s around the
//! fitted RV, all other parameters held at their fitted values. The slope of
//! gradient against offset (a least-squares line through the origin) is the
//! local second derivative, i.e. the RV inverse variance.
//!
//! Only the perturbed epoch's synthesized row changes, so each evaluation is a
//! single-row forward/backward pass. Epochs run in parallel.
//!
//! Components with fixed RVs get all-zero inverse variances. Zero means "not
//! estimated", never "infinitely precise". Template and basis uncertainties
//! are not estimated.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::data::OrderSpectra;
use crate::error::EngineError;
use crate::math::{linspace, slope_through_origin};
use crate::models::component::Component;

/// Number of sampled RV offsets per epoch.
pub const RV_GRID_POINTS: usize = 20;

/// Half-width of the sampled RV window (m/s).
pub const RV_GRID_HALF_WIDTH: f64 = 50.0;

/// Estimate RV inverse variances for `component`.
///
/// - `total_synth`: the whole model's synthesized flux at the fitted parameters
/// - `own_synth`: this component's share of `total_synth`
pub fn rv_inverse_variances(
    component: &Component,
    spectra: &OrderSpectra,
    airms: &[f64],
    total_synth: &DMatrix<f64>,
    own_synth: &DMatrix<f64>,
) -> Result<Vec<f64>, EngineError> {
    let n = spectra.xs.nrows();
    if component.rvs_fixed() {
        return Ok(vec![0.0; n]);
    }

    let offsets = linspace(-RV_GRID_HALF_WIDTH, RV_GRID_HALF_WIDTH, RV_GRID_POINTS);
    (0..n)
        .into_par_iter()
        .map(|i| {
            let xs_row: Vec<f64> = spectra.xs.row(i).iter().copied().collect();
            let ivars: Vec<f64> = spectra.ivars.row(i).iter().copied().collect();
            // Data minus every other component: what this component must explain.
            let target: Vec<f64> = (0..xs_row.len())
                .map(|j| spectra.ys[(i, j)] - (total_synth[(i, j)] - own_synth[(i, j)]))
                .collect();

            let best = component.rvs()[i];
            let mut grads = Vec::with_capacity(offsets.len());
            for &dv in &offsets {
                let rv = best + dv;
                let synth = component.synthesize_epoch(&xs_row, i, rv, airms)?;
                let misfit: Vec<f64> = target
                    .iter()
                    .zip(&synth)
                    .zip(&ivars)
                    .map(|((t, s), w)| -w * (t - s))
                    .collect();
                grads.push(component.rv_gradient_epoch(&xs_row, i, rv, airms, &misfit)?);
            }

            slope_through_origin(&offsets, &grads)
                .ok_or_else(|| EngineError::non_finite(Some(component.name()), "rv inverse variance"))
        })
        .collect()
}
