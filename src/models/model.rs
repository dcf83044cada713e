//! The per-order model: a stack of components fit jointly.
//!
//! Lifecycle:
//!
//! 1. [`Model::new`] binds data, a results sink and an order index
//! 2. components are added (`add_component`, `add_star`, `add_telluric`),
//!    largest contribution first
//! 3. [`Model::setup`] initializes every template, checks the forward model and
//!    returns the [`FitSession`]; the structure is frozen from here on
//! 4. [`Model::optimize`] runs Adam iterations, estimates RV uncertainties and
//!    pushes fitted values to the results sink; it may be called repeatedly
//!
//! The objective is
//!
//! ```text
//! nll = 0.5 · Σ ivar · (ys - Σ_c synth_c)² + Σ_c regularization_c
//! ```

use std::fmt;

use log::{debug, info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::data::{Data, OrderSpectra};
use crate::domain::{ComponentOptions, OptimizeOptions};
use crate::error::EngineError;
use crate::fit::{BlockSpec, FitSession, Proposal};
use crate::io::ResultsSink;
use crate::models::component::{Component, ComponentGradient};
use crate::models::uncertainty::rv_inverse_variances;
use crate::report::{History, IterationHook};

/// Objective value and gradients at one parameter snapshot.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub nll: f64,
    /// One entry per component, in model order.
    pub gradients: Vec<ComponentGradient>,
}

/// Summary of one `optimize` call.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub nll_initial: f64,
    pub nll_final: f64,
    pub iterations: usize,
    /// Present when history recording was requested.
    pub history: Option<History>,
}

/// Hook that records nothing.
struct NoHistory;

impl IterationHook for NoHistory {
    fn save_iter(&mut self, _model: &Model<'_>, _iteration: usize) {}
}

pub struct Model<'a> {
    data: &'a Data,
    results: &'a mut dyn ResultsSink,
    order_index: usize,
    components: Vec<Component>,
    is_setup: bool,
}

impl<'a> Model<'a> {
    pub fn new(
        data: &'a Data,
        results: &'a mut dyn ResultsSink,
        order_index: usize,
    ) -> Result<Self, EngineError> {
        if order_index >= data.n_orders() {
            return Err(EngineError::UnknownOrder {
                order: order_index,
                n_orders: data.n_orders(),
            });
        }
        Ok(Self {
            data,
            results,
            order_index,
            components: Vec::new(),
            is_setup: false,
        })
    }

    pub fn order_index(&self) -> usize {
        self.order_index
    }

    /// Instrument order number.
    pub fn order(&self) -> usize {
        self.data.order_number(self.order_index).unwrap_or(self.order_index)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Mutable access for seeding parameters, e.g. a known template after
    /// `setup`. Parameter shapes cannot change through it, so an existing
    /// [`FitSession`] stays valid; optimizer moments are not reset.
    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.name() == name)
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    fn spectra(&self) -> Result<&'a OrderSpectra, EngineError> {
        self.data
            .spectra(self.order_index)
            .ok_or(EngineError::UnknownOrder {
                order: self.order_index,
                n_orders: self.data.n_orders(),
            })
    }

    // ---------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------

    /// Add a component.
    ///
    /// Returns `Ok(false)` (and logs a warning) if a component with the same
    /// name already exists; the model is left unchanged in that case.
    pub fn add_component(
        &mut self,
        name: &str,
        starting_rvs: Vec<f64>,
        options: ComponentOptions,
    ) -> Result<bool, EngineError> {
        if self.is_setup {
            return Err(EngineError::AlreadySetUp);
        }
        if self.component(name).is_some() {
            warn!("model already has a component named '{name}'; ignoring the new one");
            return Ok(false);
        }

        let component = Component::new(
            name,
            self.order_index,
            self.data.n_epochs(),
            starting_rvs,
            &options,
        )?;
        if !self.results.has_component(name) {
            self.results.add_component(component.descriptor());
        }
        self.components.push(component);
        Ok(true)
    }

    /// Add a component whose RVs start at zero in the barycentric frame
    /// (`-berv + mean(berv)` unless given).
    pub fn add_star(
        &mut self,
        name: &str,
        starting_rvs: Option<Vec<f64>>,
        options: Option<ComponentOptions>,
    ) -> Result<bool, EngineError> {
        let rvs = starting_rvs.unwrap_or_else(|| {
            let bervs = self.data.bervs();
            let mean = bervs.iter().sum::<f64>() / bervs.len() as f64;
            bervs.iter().map(|b| mean - b).collect()
        });
        self.add_component(name, rvs, options.unwrap_or_default())
    }

    /// Add a component at rest in the observatory frame.
    ///
    /// Defaults to zero RVs and [`ComponentOptions::telluric`]: RVs fixed,
    /// airmass scaling, template learning rate 0.1.
    pub fn add_telluric(
        &mut self,
        name: &str,
        starting_rvs: Option<Vec<f64>>,
        options: Option<ComponentOptions>,
    ) -> Result<bool, EngineError> {
        let rvs = starting_rvs.unwrap_or_else(|| vec![0.0; self.data.n_epochs()]);
        self.add_component(name, rvs, options.unwrap_or_else(ComponentOptions::telluric))
    }

    /// Initialize every component's template from the residuals of the previous ones.
    ///
    /// All templates are computed before any is installed: if one component
    /// fails, no component changes.
    pub fn initialize_templates(&mut self) -> Result<(), EngineError> {
        let spectra = self.spectra()?;
        let mut residual = spectra.ys.clone();
        let mut staged = Vec::with_capacity(self.components.len());
        for c in &self.components {
            let (template, next) = c.initial_template(&spectra.xs, &residual, &spectra.ivars)?;
            staged.push(template);
            residual = next;
        }
        for (c, template) in self.components.iter_mut().zip(staged) {
            c.install_template(template);
        }
        Ok(())
    }

    /// Initialize templates, validate the objective and create the optimizer session.
    pub fn setup(&mut self) -> Result<FitSession, EngineError> {
        if self.is_setup {
            return Err(EngineError::AlreadySetUp);
        }
        if self.components.is_empty() {
            return Err(EngineError::NoComponents);
        }

        self.initialize_templates()?;
        let nll = self.nll()?;
        if !nll.is_finite() {
            return Err(EngineError::non_finite(None, "objective"));
        }

        let specs = self.block_specs()?;
        self.is_setup = true;
        info!(
            "order {}: set up {} component(s), {} parameter block(s), nll = {nll:.6e}",
            self.order(),
            self.components.len(),
            specs.len()
        );
        Ok(FitSession::new(self.order_index, &specs))
    }

    fn block_specs(&self) -> Result<Vec<BlockSpec>, EngineError> {
        let mut specs = Vec::new();
        for (index, c) in self.components.iter().enumerate() {
            specs.extend(c.block_specs(index)?);
        }
        Ok(specs)
    }

    // ---------------------------------------------------------------------
    // Objective
    // ---------------------------------------------------------------------

    fn component_synths(&self) -> Result<Vec<DMatrix<f64>>, EngineError> {
        let spectra = self.spectra()?;
        let airms = self.data.airms();
        self.components
            .par_iter()
            .map(|c| c.synthesize(&spectra.xs, airms))
            .collect()
    }

    fn sum_synths(&self, synths: &[DMatrix<f64>]) -> Result<DMatrix<f64>, EngineError> {
        let spectra = self.spectra()?;
        let mut total = DMatrix::<f64>::zeros(spectra.ys.nrows(), spectra.ys.ncols());
        for s in synths {
            total += s;
        }
        Ok(total)
    }

    /// Total synthesized flux (`N × M`).
    pub fn synth(&self) -> Result<DMatrix<f64>, EngineError> {
        let synths = self.component_synths()?;
        self.sum_synths(&synths)
    }

    fn misfit_value(&self, synth: &DMatrix<f64>) -> Result<f64, EngineError> {
        let spectra = self.spectra()?;
        Ok(0.5
            * spectra
                .ys
                .iter()
                .zip(synth.iter())
                .zip(spectra.ivars.iter())
                .map(|((y, s), w)| w * (y - s) * (y - s))
                .sum::<f64>())
    }

    /// Current objective value.
    pub fn nll(&self) -> Result<f64, EngineError> {
        let synth = self.synth()?;
        let regularization: f64 = self.components.iter().map(Component::regularization_value).sum();
        Ok(self.misfit_value(&synth)? + regularization)
    }

    /// Objective and every component's gradient from one snapshot.
    pub fn evaluate(&self) -> Result<Evaluation, EngineError> {
        let spectra = self.spectra()?;
        let airms = self.data.airms();
        let synth = self.synth()?;
        let regularization: f64 = self.components.iter().map(Component::regularization_value).sum();
        let nll = self.misfit_value(&synth)? + regularization;

        // d nll / d synth, shared by every component.
        let misfit = DMatrix::from_fn(synth.nrows(), synth.ncols(), |i, j| {
            -spectra.ivars[(i, j)] * (spectra.ys[(i, j)] - synth[(i, j)])
        });
        let gradients = self
            .components
            .par_iter()
            .map(|c| c.gradient(&spectra.xs, airms, &misfit))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Evaluation { nll, gradients })
    }

    // ---------------------------------------------------------------------
    // Optimization
    // ---------------------------------------------------------------------

    /// One synchronous step on every block.
    ///
    /// Gradients and proposals for all blocks are computed from the same
    /// snapshot and checked before anything is written. On error the
    /// parameters are untouched. Returns the objective before the step.
    pub fn step(&mut self, session: &mut FitSession) -> Result<f64, EngineError> {
        let eval = self.evaluate()?;
        if !eval.nll.is_finite() {
            return Err(EngineError::non_finite(None, "objective"));
        }

        let mut proposals: Vec<Proposal> = Vec::with_capacity(session.blocks().len());
        for block in session.blocks() {
            let component = &self.components[block.id.component];
            let kind = block.id.kind;
            let mismatch = || {
                EngineError::SessionMismatch(format!(
                    "component '{}' has no {kind} block",
                    component.name()
                ))
            };
            let grad = eval.gradients[block.id.component]
                .block(kind)
                .ok_or_else(mismatch)?;
            if !grad.iter().all(|g| g.is_finite()) {
                return Err(EngineError::non_finite(Some(component.name()), kind.gradient_name()));
            }
            let params = component.params(kind).ok_or_else(mismatch)?;
            let proposal = block.optimizer.propose(params, grad);
            if !proposal.is_finite() {
                return Err(EngineError::non_finite(Some(component.name()), kind.name()));
            }
            proposals.push(proposal);
        }

        for (block, proposal) in session.blocks_mut().iter_mut().zip(proposals) {
            if let Some(params) = self.components[block.id.component].params_mut(block.id.kind) {
                block.optimizer.commit(proposal, params);
            }
        }
        Ok(eval.nll)
    }

    /// Run `options.n_iterations` steps, then estimate uncertainties and push results.
    ///
    /// With zero iterations the parameters are left as they are, but
    /// uncertainties are still estimated and results still pushed.
    pub fn optimize(
        &mut self,
        session: &mut FitSession,
        options: &OptimizeOptions,
    ) -> Result<OptimizeReport, EngineError> {
        if !options.save_history {
            let mut hook = NoHistory;
            return self.optimize_with_hook(session, options, &mut hook);
        }

        let mut history = History::new(self, options.n_iterations + 1);
        let mut report = self.optimize_with_hook(session, options, &mut history)?;
        match history.save_plots(&options.history_basename) {
            Ok(paths) => debug!("order {}: wrote {} history plot(s)", self.order(), paths.len()),
            Err(err) => warn!("order {}: history plots not written: {err}", self.order()),
        }
        report.history = Some(history);
        Ok(report)
    }

    /// [`Model::optimize`] with a caller-supplied iteration hook.
    ///
    /// The hook sees the model after setup state (iteration 0) and after every
    /// iteration.
    pub fn optimize_with_hook(
        &mut self,
        session: &mut FitSession,
        options: &OptimizeOptions,
        hook: &mut dyn IterationHook,
    ) -> Result<OptimizeReport, EngineError> {
        if !self.is_setup {
            return Err(EngineError::NotSetUp);
        }
        session.check(self.order_index, &self.block_specs()?)?;

        let n = options.n_iterations;
        let log_every = (n / 10).max(1);
        let nll_initial = self.nll()?;
        if options.verbose {
            info!("order {}: optimizing for {n} iteration(s)", self.order());
        }
        hook.save_iter(self, 0);

        for i in 0..n {
            let nll = self.step(session).map_err(|e| e.at_iteration(i + 1))?;
            session.record_iteration();
            hook.save_iter(self, i + 1);
            if (i + 1) % log_every == 0 {
                if options.verbose {
                    info!("order {}: iteration {}/{n}, nll = {nll:.6e}", self.order(), i + 1);
                } else {
                    debug!("order {}: iteration {}/{n}, nll = {nll:.6e}", self.order(), i + 1);
                }
            }
        }

        let nll_final = self.nll()?;
        if !nll_final.is_finite() {
            return Err(EngineError::non_finite(None, "objective"));
        }

        self.estimate_uncertainties(session, options.verbose)?;
        for c in &self.components {
            self.results.update(c.fit()?);
        }

        Ok(OptimizeReport {
            nll_initial,
            nll_final,
            iterations: n,
            history: None,
        })
    }

    /// Fill every component's RV inverse variances.
    pub fn estimate_uncertainties(
        &mut self,
        session: &FitSession,
        verbose: bool,
    ) -> Result<(), EngineError> {
        if !self.is_setup {
            return Err(EngineError::NotSetUp);
        }
        session.check(self.order_index, &self.block_specs()?)?;

        let spectra = self.spectra()?;
        let airms = self.data.airms();
        let synths = self.component_synths()?;
        let total = self.sum_synths(&synths)?;

        let mut estimates = Vec::with_capacity(self.components.len());
        for (c, own) in self.components.iter().zip(&synths) {
            if verbose && !c.rvs_fixed() {
                info!(
                    "order {}: estimating RV uncertainties for '{}' over {} epochs",
                    self.order(),
                    c.name(),
                    self.data.n_epochs()
                );
            }
            estimates.push(rv_inverse_variances(c, spectra, airms, &total, own)?);
        }
        for (c, ivars) in self.components.iter_mut().zip(estimates) {
            c.set_rv_ivars(ivars);
        }
        Ok(())
    }
}

impl fmt::Display for Model<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model for order {} with components:", self.order())?;
        for c in &self.components {
            let rvs = if c.rvs_fixed() { "RVs fixed" } else { "RVs variable" };
            write!(
                f,
                "\n  {}: {rvs}; {} variable basis component(s)",
                c.name(),
                c.variable_bases()
            )?;
        }
        Ok(())
    }
}
