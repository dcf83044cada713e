//! One additive piece of the spectral model.
//!
//! A component owns its per-epoch RVs and a rest-frame template on a
//! log-wavelength grid, optionally with a rank-`K` time-varying correction.
//! For epoch `i` and pixel `j` the forward model is
//!
//! ```text
//! x'  = xs[i, j] + ln doppler(rv[i])
//! F_i = template + weights[i, :] · vectors          (F_i = template when K = 0)
//! synth[i, j] = a_i · interp(x'; template_xs, F_i)
//! ```
//!
//! with `a_i` the airmass when the component scales with it and 1 otherwise.
//! Interpolation continues the end segments linearly so gradients stay defined
//! past the grid.
//!
//! Gradients are derived by hand. Given `g = d objective / d synth`:
//!
//! - template values: the interpolation weights `(1 - frac, frac)`
//! - RVs: the interpolation slope times `d ln doppler / dv`
//! - basis: the matrix-product chain rule on `F`

use log::warn;
use nalgebra::DMatrix;

use crate::domain::{ComponentOptions, LearningRates, Regularization};
use crate::error::EngineError;
use crate::fit::{BlockId, BlockKind, BlockSpec};
use crate::io::{ComponentDescriptor, ComponentFit, load_regularization, rows_of};
use crate::math::{
    Bracket, Edge, LowRankBasis, SPEED_OF_LIGHT, bin_data, interp_linear, is_strictly_increasing,
    leading_singular_basis, log_doppler, log_doppler_derivative, log_uniform_grid, max_rank,
};

/// A component's rest-frame template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub basis: Option<LowRankBasis>,
}

impl Template {
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Template values for epoch `i`, including the basis correction.
    pub fn epoch_values(&self, i: usize) -> Vec<f64> {
        match &self.basis {
            None => self.ys.clone(),
            Some(b) => {
                let correction = b.weights.row(i) * &b.vectors;
                self.ys
                    .iter()
                    .zip(correction.iter())
                    .map(|(y, c)| y + c)
                    .collect()
            }
        }
    }
}

/// Gradient of the objective with respect to one component's parameters.
///
/// Matrices use the same (column-major) layout as the parameters they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentGradient {
    pub template: Vec<f64>,
    pub rvs: Vec<f64>,
    pub basis_vectors: Option<DMatrix<f64>>,
    pub basis_weights: Option<DMatrix<f64>>,
}

impl ComponentGradient {
    pub fn block(&self, kind: BlockKind) -> Option<&[f64]> {
        match kind {
            BlockKind::Template => Some(&self.template),
            BlockKind::Rvs => Some(&self.rvs),
            BlockKind::BasisVectors => self.basis_vectors.as_ref().map(|m| m.as_slice()),
            BlockKind::BasisWeights => self.basis_weights.as_ref().map(|m| m.as_slice()),
        }
    }

    pub fn is_finite(&self, kind: BlockKind) -> bool {
        self.block(kind)
            .is_none_or(|g| g.iter().all(|x| x.is_finite()))
    }
}

struct EpochGradient {
    values: Vec<f64>,
    rv: f64,
}

#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    order_index: usize,
    starting_rvs: Vec<f64>,
    rvs: Vec<f64>,
    rvs_fixed: bool,
    scale_by_airmass: bool,
    variable_bases: usize,
    regularization: Regularization,
    learning_rates: LearningRates,
    template_grid: Option<Vec<f64>>,
    template: Option<Template>,
    rv_ivars: Vec<f64>,
}

impl Component {
    /// Create a component for order index `order_index` of data with `n_epochs` epochs.
    ///
    /// Regularization overrides are read from `options.regularization_file` if
    /// set; a file that cannot be used is logged and the option values are kept.
    pub fn new(
        name: impl Into<String>,
        order_index: usize,
        n_epochs: usize,
        starting_rvs: Vec<f64>,
        options: &ComponentOptions,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        if starting_rvs.len() != n_epochs {
            return Err(EngineError::EpochMismatch {
                component: name,
                expected: n_epochs,
                found: starting_rvs.len(),
            });
        }
        if !starting_rvs
            .iter()
            .all(|v| v.is_finite() && v.abs() < SPEED_OF_LIGHT)
        {
            return Err(EngineError::InvalidData(format!(
                "component '{name}': starting RVs must be finite and below the speed of light"
            )));
        }
        if let Some(grid) = &options.template_xs {
            let reason = if grid.len() < 2 {
                Some("needs at least two nodes")
            } else if !is_strictly_increasing(grid) {
                Some("must be finite and strictly increasing")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(EngineError::InvalidTemplateGrid {
                    component: name,
                    reason: reason.to_string(),
                });
            }
        }

        let regularization = match &options.regularization_file {
            None => options.regularization,
            Some(path) => match load_regularization(
                path,
                order_index,
                options.variable_bases > 0,
                options.regularization,
            ) {
                Ok(reg) => reg,
                Err(err) => {
                    warn!("component '{name}': keeping default regularization: {err}");
                    options.regularization
                }
            },
        };

        Ok(Self {
            name,
            order_index,
            rvs: starting_rvs.clone(),
            starting_rvs,
            rvs_fixed: options.rvs_fixed,
            scale_by_airmass: options.scale_by_airmass,
            variable_bases: options.variable_bases,
            regularization,
            learning_rates: options.learning_rates,
            template_grid: options.template_xs.clone(),
            template: None,
            rv_ivars: vec![0.0; n_epochs],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order_index(&self) -> usize {
        self.order_index
    }

    pub fn starting_rvs(&self) -> &[f64] {
        &self.starting_rvs
    }

    pub fn rvs(&self) -> &[f64] {
        &self.rvs
    }

    pub fn rvs_fixed(&self) -> bool {
        self.rvs_fixed
    }

    pub fn scale_by_airmass(&self) -> bool {
        self.scale_by_airmass
    }

    /// Number of variable basis vectors (`K`).
    pub fn variable_bases(&self) -> usize {
        self.variable_bases
    }

    pub fn regularization(&self) -> &Regularization {
        &self.regularization
    }

    pub fn learning_rates(&self) -> &LearningRates {
        &self.learning_rates
    }

    pub fn template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    /// RV inverse variances from the last uncertainty estimate.
    ///
    /// Zero means "not estimated": always the case for fixed RVs.
    pub fn rv_ivars(&self) -> &[f64] {
        &self.rv_ivars
    }

    pub fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor {
            name: self.name.clone(),
            rvs_fixed: self.rvs_fixed,
            variable_bases: self.variable_bases,
            scale_by_airmass: self.scale_by_airmass,
        }
    }

    fn template_ref(&self) -> Result<&Template, EngineError> {
        self.template
            .as_ref()
            .ok_or_else(|| EngineError::NotInitialized {
                component: self.name.clone(),
            })
    }

    fn airmass_scale(&self, airms: &[f64], i: usize) -> f64 {
        if self.scale_by_airmass { airms[i] } else { 1.0 }
    }

    // ---------------------------------------------------------------------
    // Initialization
    // ---------------------------------------------------------------------

    /// Build this component's initial template from `ys` without changing `self`.
    ///
    /// Returns the template and `ys` minus the template as seen at every epoch,
    /// which is what the next component is initialized from. Data are moved to
    /// the rest frame with the starting RVs.
    pub fn initial_template(
        &self,
        xs: &DMatrix<f64>,
        ys: &DMatrix<f64>,
        ivars: &DMatrix<f64>,
    ) -> Result<(Template, DMatrix<f64>), EngineError> {
        let shifts: Vec<f64> = self.starting_rvs.iter().map(|&v| log_doppler(v)).collect();
        let shifted = DMatrix::from_fn(xs.nrows(), xs.ncols(), |i, j| xs[(i, j)] + shifts[i]);

        let grid = match &self.template_grid {
            Some(grid) => grid.clone(),
            None => {
                let lo = shifted.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = shifted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                log_uniform_grid(lo, hi)
            }
        };

        let base = bin_data(&shifted, ys, ivars, &grid).ok_or_else(|| EngineError::EmptyTemplate {
            component: self.name.clone(),
        })?;
        if !base.iter().all(|v| v.is_finite()) {
            return Err(EngineError::non_finite(Some(&self.name), "initial template"));
        }

        let basis = if self.variable_bases > 0 {
            Some(self.initial_basis(&shifted, ys, &grid, &base)?)
        } else {
            None
        };

        let template = Template {
            xs: grid,
            ys: base,
            basis,
        };

        let mut residual = ys.clone();
        for i in 0..residual.nrows() {
            let values = template.epoch_values(i);
            let fitted = interp_linear(shifted.row(i).iter().copied(), &template.xs, &values, Edge::Clamp);
            for (j, f) in fitted.into_iter().enumerate() {
                residual[(i, j)] -= f;
            }
        }
        if !residual.iter().all(|v| v.is_finite()) {
            return Err(EngineError::non_finite(Some(&self.name), "initialization residual"));
        }

        Ok((template, residual))
    }

    fn initial_basis(
        &self,
        shifted: &DMatrix<f64>,
        ys: &DMatrix<f64>,
        grid: &[f64],
        base: &[f64],
    ) -> Result<LowRankBasis, EngineError> {
        let n = shifted.nrows();
        let m = grid.len();
        let max = max_rank(n, m);
        if self.variable_bases > max {
            return Err(EngineError::TooManyBases {
                component: self.name.clone(),
                k: self.variable_bases,
                max,
            });
        }

        let mut residuals = DMatrix::<f64>::zeros(n, m);
        for i in 0..n {
            let row: Vec<f64> = shifted.row(i).iter().copied().collect();
            let data: Vec<f64> = ys.row(i).iter().copied().collect();
            let on_grid = interp_linear(grid.iter().copied(), &row, &data, Edge::Clamp);
            for (j, (v, b)) in on_grid.iter().zip(base).enumerate() {
                residuals[(i, j)] = v - b;
            }
        }

        leading_singular_basis(&residuals, self.variable_bases).map_err(|e| EngineError::DegenerateBasis {
            component: self.name.clone(),
            reason: e.to_string(),
        })
    }

    pub(crate) fn install_template(&mut self, template: Template) {
        self.template = Some(template);
    }

    /// Initialize the template from `ys` and return the residual for the next component.
    pub fn initialize_template(
        &mut self,
        xs: &DMatrix<f64>,
        ys: &DMatrix<f64>,
        ivars: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, EngineError> {
        let (template, residual) = self.initial_template(xs, ys, ivars)?;
        self.install_template(template);
        Ok(residual)
    }

    /// Replace the template values, keeping the grid and any basis.
    ///
    /// Meant for seeding a template (e.g. from an earlier fit) after
    /// initialization. The length must match the grid, so block shapes and any
    /// session built from them are unchanged.
    pub fn set_template_ys(&mut self, ys: Vec<f64>) -> Result<(), EngineError> {
        let name = self.name.clone();
        let template = self
            .template
            .as_mut()
            .ok_or_else(|| EngineError::NotInitialized { component: name.clone() })?;
        if ys.len() != template.len() {
            return Err(EngineError::InvalidTemplateGrid {
                component: name,
                reason: format!("expected {} template values, got {}", template.len(), ys.len()),
            });
        }
        if !ys.iter().all(|v| v.is_finite()) {
            return Err(EngineError::non_finite(Some(&name), "template"));
        }
        template.ys = ys;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Forward model
    // ---------------------------------------------------------------------

    /// Synthesized flux for every epoch and pixel of `xs`.
    pub fn synthesize(&self, xs: &DMatrix<f64>, airms: &[f64]) -> Result<DMatrix<f64>, EngineError> {
        let template = self.template_ref()?;
        let mut synth = DMatrix::<f64>::zeros(xs.nrows(), xs.ncols());
        for i in 0..xs.nrows() {
            let values = template.epoch_values(i);
            let row = row_vec(xs, i);
            let out = epoch_forward(&template.xs, &values, &row, self.rvs[i], self.airmass_scale(airms, i));
            for (j, v) in out.into_iter().enumerate() {
                synth[(i, j)] = v;
            }
        }
        Ok(synth)
    }

    /// Synthesized flux for epoch `i` at `xs_row` with the RV replaced by `rv`.
    pub fn synthesize_epoch(
        &self,
        xs_row: &[f64],
        i: usize,
        rv: f64,
        airms: &[f64],
    ) -> Result<Vec<f64>, EngineError> {
        let template = self.template_ref()?;
        let values = template.epoch_values(i);
        Ok(epoch_forward(&template.xs, &values, xs_row, rv, self.airmass_scale(airms, i)))
    }

    /// This component's share of the objective: its regularization terms.
    pub fn regularization_value(&self) -> f64 {
        let Some(template) = &self.template else {
            return 0.0;
        };
        let r = &self.regularization;
        let mut nll = r.l1_template * template.ys.iter().map(|y| y.abs()).sum::<f64>()
            + r.l2_template * template.ys.iter().map(|y| y * y).sum::<f64>();
        if let Some(b) = &template.basis {
            nll += r.l1_basis_vectors * b.vectors.iter().map(|v| v.abs()).sum::<f64>()
                + r.l2_basis_vectors * b.vectors.norm_squared()
                + r.l2_basis_weights * b.weights.norm_squared();
        }
        nll
    }

    // ---------------------------------------------------------------------
    // Backward pass
    // ---------------------------------------------------------------------

    /// Gradient of the objective given `misfit = d objective / d synth` (`N × M`).
    ///
    /// Includes this component's regularization terms.
    pub fn gradient(
        &self,
        xs: &DMatrix<f64>,
        airms: &[f64],
        misfit: &DMatrix<f64>,
    ) -> Result<ComponentGradient, EngineError> {
        let template = self.template_ref()?;
        let n = xs.nrows();
        let mut d_values = DMatrix::<f64>::zeros(n, template.len());
        let mut d_rvs = vec![0.0; n];

        for i in 0..n {
            let values = template.epoch_values(i);
            let grad = epoch_backward(
                &template.xs,
                &values,
                &row_vec(xs, i),
                self.rvs[i],
                self.airmass_scale(airms, i),
                &row_vec(misfit, i),
            );
            for (k, g) in grad.values.into_iter().enumerate() {
                d_values[(i, k)] = g;
            }
            d_rvs[i] = grad.rv;
        }

        let r = &self.regularization;
        let d_template = template
            .ys
            .iter()
            .enumerate()
            .map(|(k, &y)| d_values.column(k).sum() + r.l1_template * sign(y) + 2.0 * r.l2_template * y)
            .collect();

        let (basis_vectors, basis_weights) = match &template.basis {
            None => (None, None),
            Some(b) => {
                let d_weights = &d_values * b.vectors.transpose() + &b.weights * (2.0 * r.l2_basis_weights);
                let d_vectors = b.weights.transpose() * &d_values
                    + b.vectors
                        .map(|v| r.l1_basis_vectors * sign(v) + 2.0 * r.l2_basis_vectors * v);
                (Some(d_vectors), Some(d_weights))
            }
        };

        Ok(ComponentGradient {
            template: d_template,
            rvs: d_rvs,
            basis_vectors,
            basis_weights,
        })
    }

    /// d objective / d rv for epoch `i` alone, with the RV replaced by `rv`.
    pub fn rv_gradient_epoch(
        &self,
        xs_row: &[f64],
        i: usize,
        rv: f64,
        airms: &[f64],
        misfit_row: &[f64],
    ) -> Result<f64, EngineError> {
        let template = self.template_ref()?;
        let values = template.epoch_values(i);
        let grad = epoch_backward(
            &template.xs,
            &values,
            xs_row,
            rv,
            self.airmass_scale(airms, i),
            misfit_row,
        );
        Ok(grad.rv)
    }

    // ---------------------------------------------------------------------
    // Blocks
    // ---------------------------------------------------------------------

    /// Optimizable blocks, in update order: template, RVs (unless fixed), basis.
    pub fn block_specs(&self, component: usize) -> Result<Vec<BlockSpec>, EngineError> {
        let template = self.template_ref()?;
        let id = |kind| BlockId { component, kind };
        let mut specs = vec![BlockSpec {
            id: id(BlockKind::Template),
            len: template.len(),
            learning_rate: self.learning_rates.template,
        }];
        if !self.rvs_fixed {
            specs.push(BlockSpec {
                id: id(BlockKind::Rvs),
                len: self.rvs.len(),
                learning_rate: self.learning_rates.rvs,
            });
        }
        if let Some(b) = &template.basis {
            specs.push(BlockSpec {
                id: id(BlockKind::BasisVectors),
                len: b.vectors.len(),
                learning_rate: self.learning_rates.basis,
            });
            specs.push(BlockSpec {
                id: id(BlockKind::BasisWeights),
                len: b.weights.len(),
                learning_rate: self.learning_rates.basis,
            });
        }
        Ok(specs)
    }

    pub fn params(&self, kind: BlockKind) -> Option<&[f64]> {
        match kind {
            BlockKind::Rvs => Some(&self.rvs),
            BlockKind::Template => self.template.as_ref().map(|t| t.ys.as_slice()),
            BlockKind::BasisVectors => self.template.as_ref()?.basis.as_ref().map(|b| b.vectors.as_slice()),
            BlockKind::BasisWeights => self.template.as_ref()?.basis.as_ref().map(|b| b.weights.as_slice()),
        }
    }

    pub(crate) fn params_mut(&mut self, kind: BlockKind) -> Option<&mut [f64]> {
        match kind {
            BlockKind::Rvs => Some(&mut self.rvs),
            BlockKind::Template => self.template.as_mut().map(|t| t.ys.as_mut_slice()),
            BlockKind::BasisVectors => self
                .template
                .as_mut()?
                .basis
                .as_mut()
                .map(|b| b.vectors.as_mut_slice()),
            BlockKind::BasisWeights => self
                .template
                .as_mut()?
                .basis
                .as_mut()
                .map(|b| b.weights.as_mut_slice()),
        }
    }

    pub(crate) fn set_rv_ivars(&mut self, ivars: Vec<f64>) {
        self.rv_ivars = ivars;
    }

    /// Snapshot of the fitted values for the results aggregator.
    pub fn fit(&self) -> Result<ComponentFit, EngineError> {
        let template = self.template_ref()?;
        Ok(ComponentFit {
            name: self.name.clone(),
            order_index: self.order_index,
            rvs: self.rvs.clone(),
            rv_ivars: self.rv_ivars.clone(),
            template_xs: template.xs.clone(),
            template_ys: template.ys.clone(),
            basis_vectors: template.basis.as_ref().map(|b| rows_of(&b.vectors)),
            basis_weights: template.basis.as_ref().map(|b| rows_of(&b.weights)),
        })
    }
}

fn epoch_forward(grid: &[f64], values: &[f64], xs_row: &[f64], rv: f64, scale: f64) -> Vec<f64> {
    let shift = log_doppler(rv);
    xs_row
        .iter()
        .map(|&x| scale * Bracket::locate(grid, x + shift, Edge::Extrapolate).value(values))
        .collect()
}

fn epoch_backward(
    grid: &[f64],
    values: &[f64],
    xs_row: &[f64],
    rv: f64,
    scale: f64,
    misfit_row: &[f64],
) -> EpochGradient {
    let shift = log_doppler(rv);
    let mut d_values = vec![0.0; grid.len()];
    let mut d_shift = 0.0;
    for (&x, &g) in xs_row.iter().zip(misfit_row) {
        let g = g * scale;
        if g == 0.0 {
            continue;
        }
        let b = Bracket::locate(grid, x + shift, Edge::Extrapolate);
        d_values[b.lo] += g * (1.0 - b.frac);
        d_values[b.hi] += g * b.frac;
        d_shift += g * b.slope(grid, values);
    }
    EpochGradient {
        values: d_values,
        rv: d_shift * log_doppler_derivative(rv),
    }
}

fn row_vec(m: &DMatrix<f64>, i: usize) -> Vec<f64> {
    m.row(i).iter().copied().collect()
}

/// Subgradient of `|x|`, zero at the kink.
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ComponentOptions;

    const N: usize = 3;
    const M: usize = 20;

    struct Fixture {
        xs: DMatrix<f64>,
        ys: DMatrix<f64>,
        ivars: DMatrix<f64>,
        airms: Vec<f64>,
    }

    fn fixture() -> Fixture {
        Fixture {
            xs: DMatrix::from_fn(N, M, |_, j| 8.7 + 5e-5 + j as f64 * 1.3e-5),
            ys: DMatrix::from_fn(N, M, |i, j| 0.1 * ((i + j) as f64).sin()),
            ivars: DMatrix::from_fn(N, M, |_, j| 1.0 + 0.1 * j as f64),
            airms: vec![1.0, 1.3, 1.1],
        }
    }

    fn grid() -> Vec<f64> {
        (0..40).map(|k| 8.7 + k as f64 * 1e-5).collect()
    }

    /// A component with a fixed template and a rank-1 basis.
    fn component_with_basis() -> Component {
        let options = ComponentOptions {
            regularization: Regularization {
                l1_template: 0.01,
                l2_template: 0.02,
                l1_basis_vectors: 0.03,
                l2_basis_vectors: 0.04,
                l2_basis_weights: 0.5,
            },
            scale_by_airmass: true,
            variable_bases: 1,
            template_xs: Some(grid()),
            ..ComponentOptions::default()
        };
        let mut c = Component::new("star", 0, N, vec![5.0, -12.0, 20.0], &options).unwrap();
        let xs = grid();
        let ys = (0..40).map(|k| 0.3 * (k as f64 * 0.7 + 0.2).sin()).collect();
        let basis = LowRankBasis {
            weights: DMatrix::from_row_slice(N, 1, &[0.5, -0.2, 0.1]),
            vectors: DMatrix::from_fn(1, 40, |_, k| 0.2 * (k as f64 * 0.3 + 0.1).cos()),
        };
        c.install_template(Template {
            xs,
            ys,
            basis: Some(basis),
        });
        c
    }

    fn objective(c: &Component, f: &Fixture) -> f64 {
        let synth = c.synthesize(&f.xs, &f.airms).unwrap();
        let misfit: f64 = f
            .ys
            .iter()
            .zip(synth.iter())
            .zip(f.ivars.iter())
            .map(|((y, s), w)| w * (y - s) * (y - s))
            .sum();
        0.5 * misfit + c.regularization_value()
    }

    fn analytic(c: &Component, f: &Fixture) -> ComponentGradient {
        let synth = c.synthesize(&f.xs, &f.airms).unwrap();
        let misfit = DMatrix::from_fn(N, M, |i, j| -f.ivars[(i, j)] * (f.ys[(i, j)] - synth[(i, j)]));
        c.gradient(&f.xs, &f.airms, &misfit).unwrap()
    }

    fn check_block(kind: BlockKind, indices: &[usize], h: f64) {
        let f = fixture();
        let c = component_with_basis();
        let grad = analytic(&c, &f);
        let g = grad.block(kind).unwrap();
        for &idx in indices {
            let mut plus = c.clone();
            plus.params_mut(kind).unwrap()[idx] += h;
            let mut minus = c.clone();
            minus.params_mut(kind).unwrap()[idx] -= h;
            let numeric = (objective(&plus, &f) - objective(&minus, &f)) / (2.0 * h);
            let tol = 1e-6 * numeric.abs().max(1.0);
            assert!(
                (g[idx] - numeric).abs() < tol,
                "{kind}[{idx}]: analytic {} vs numeric {numeric}",
                g[idx]
            );
        }
    }

    #[test]
    fn template_gradient_matches_finite_differences() {
        check_block(BlockKind::Template, &[3, 6, 10, 17, 25], 1e-6);
    }

    #[test]
    fn rv_gradient_matches_finite_differences() {
        check_block(BlockKind::Rvs, &[0, 1, 2], 1e-3);
    }

    #[test]
    fn basis_gradients_match_finite_differences() {
        check_block(BlockKind::BasisVectors, &[4, 9, 20], 1e-6);
        check_block(BlockKind::BasisWeights, &[0, 1, 2], 1e-6);
    }

    #[test]
    fn epoch_rv_gradient_matches_full_gradient() {
        let f = fixture();
        let c = component_with_basis();
        let grad = analytic(&c, &f);
        let synth = c.synthesize(&f.xs, &f.airms).unwrap();
        for i in 0..N {
            let misfit: Vec<f64> = (0..M)
                .map(|j| -f.ivars[(i, j)] * (f.ys[(i, j)] - synth[(i, j)]))
                .collect();
            let xs_row = row_vec(&f.xs, i);
            let g = c
                .rv_gradient_epoch(&xs_row, i, c.rvs()[i], &f.airms, &misfit)
                .unwrap();
            assert!((g - grad.rvs[i]).abs() <= 1e-12 * grad.rvs[i].abs().max(1e-12));
        }
    }

    #[test]
    fn initialized_template_has_increasing_grid() {
        let f = fixture();
        let mut c = Component::new("star", 0, N, vec![0.0, 50.0, -50.0], &ComponentOptions::default()).unwrap();
        let residual = c.initialize_template(&f.xs, &f.ys, &f.ivars).unwrap();
        let t = c.template().unwrap();
        assert!(is_strictly_increasing(&t.xs));
        assert_eq!(t.xs.len(), t.ys.len());
        assert!(t.basis.is_none());
        assert_eq!(residual.shape(), f.ys.shape());
    }

    #[test]
    fn constant_data_leaves_no_residual() {
        let f = fixture();
        let ys = DMatrix::from_element(N, M, -0.25);
        let c = Component::new("star", 0, N, vec![0.0; N], &ComponentOptions::default()).unwrap();
        let (template, residual) = c.initial_template(&f.xs, &ys, &f.ivars).unwrap();
        assert!(template.ys.iter().all(|v| (v + 0.25).abs() < 1e-12));
        assert!(residual.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn initial_basis_rows_are_orthonormal() {
        let f = fixture();
        let options = ComponentOptions::default().with_variable_bases(2);
        let c = Component::new("star", 0, N, vec![0.0; N], &options).unwrap();
        let (template, _) = c.initial_template(&f.xs, &f.ys, &f.ivars).unwrap();
        let b = template.basis.unwrap();
        assert_eq!(b.vectors.shape(), (2, template.xs.len()));
        assert_eq!(b.weights.shape(), (N, 2));
        let gram = &b.vectors * b.vectors.transpose();
        assert!((gram - DMatrix::<f64>::identity(2, 2)).norm() < 1e-10);
    }

    #[test]
    fn too_many_bases_is_rejected() {
        let f = fixture();
        let options = ComponentOptions::default().with_variable_bases(N + 1);
        let c = Component::new("star", 0, N, vec![0.0; N], &options).unwrap();
        let err = c.initial_template(&f.xs, &f.ys, &f.ivars).unwrap_err();
        assert!(matches!(err, EngineError::TooManyBases { k: 4, max: 3, .. }));
    }

    #[test]
    fn basis_beyond_residual_rank_is_rejected() {
        let f = fixture();
        let ys = DMatrix::from_element(N, M, -0.25);
        let options = ComponentOptions::default().with_variable_bases(1);
        let c = Component::new("star", 0, N, vec![0.0; N], &options).unwrap();
        let err = c.initial_template(&f.xs, &ys, &f.ivars).unwrap_err();
        match err {
            EngineError::DegenerateBasis { component, reason } => {
                assert_eq!(component, "star");
                assert!(reason.contains("numerical rank 0"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn seeded_template_values_must_match_the_grid() {
        let f = fixture();
        let mut c = Component::new("star", 0, N, vec![0.0; N], &ComponentOptions::default()).unwrap();
        assert!(matches!(
            c.set_template_ys(vec![0.0; 4]),
            Err(EngineError::NotInitialized { .. })
        ));
        c.initialize_template(&f.xs, &f.ys, &f.ivars).unwrap();
        let before = c.template().unwrap().clone();

        let err = c.set_template_ys(vec![0.0; before.len() + 1]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTemplateGrid { .. }));
        let err = c.set_template_ys(vec![f64::NAN; before.len()]).unwrap_err();
        assert!(matches!(err, EngineError::NonFinite { .. }));
        assert_eq!(c.template(), Some(&before));

        c.set_template_ys(vec![0.5; before.len()]).unwrap();
        let after = c.template().unwrap();
        assert_eq!(after.xs, before.xs);
        assert!(after.ys.iter().all(|y| *y == 0.5));
    }

    #[test]
    fn masked_data_is_an_empty_template() {
        let f = fixture();
        let c = Component::new("star", 0, N, vec![0.0; N], &ComponentOptions::default()).unwrap();
        let err = c
            .initial_template(&f.xs, &f.ys, &DMatrix::zeros(N, M))
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyTemplate { .. }));
    }

    #[test]
    fn construction_checks_epochs_and_grid() {
        let err = Component::new("star", 0, N, vec![0.0; 2], &ComponentOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::EpochMismatch { expected: 3, found: 2, .. }));

        let options = ComponentOptions {
            template_xs: Some(vec![1.0, 1.0, 2.0]),
            ..ComponentOptions::default()
        };
        let err = Component::new("star", 0, N, vec![0.0; N], &options).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTemplateGrid { .. }));
    }

    #[test]
    fn unreadable_regularization_file_keeps_defaults() {
        let options = ComponentOptions::default()
            .with_regularization_file(Some(std::env::temp_dir().join("spectral-rv-missing-reg.json")));
        let c = Component::new("star", 0, N, vec![0.0; N], &options).unwrap();
        assert_eq!(*c.regularization(), Regularization::default());
    }

    #[test]
    fn fixed_rvs_have_no_rv_block() {
        let f = fixture();
        let mut c = Component::new("tellurics", 0, N, vec![0.0; N], &ComponentOptions::telluric()).unwrap();
        c.initialize_template(&f.xs, &f.ys, &f.ivars).unwrap();
        let kinds: Vec<BlockKind> = c.block_specs(1).unwrap().iter().map(|s| s.id.kind).collect();
        assert_eq!(kinds, vec![BlockKind::Template]);
        assert_eq!(c.block_specs(1).unwrap()[0].learning_rate, 0.1);
    }
}
