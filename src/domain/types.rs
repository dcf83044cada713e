//! Shared domain types.
//!
//! These are plain data: presets and defaults live here so that model code and
//! the CLI agree on them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Regularization strengths for one component.
///
/// The basis terms only apply to components with variable bases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    #[serde(rename = "L1_template")]
    pub l1_template: f64,
    #[serde(rename = "L2_template")]
    pub l2_template: f64,
    #[serde(rename = "L1_basis_vectors")]
    pub l1_basis_vectors: f64,
    #[serde(rename = "L2_basis_vectors")]
    pub l2_basis_vectors: f64,
    #[serde(rename = "L2_basis_weights")]
    pub l2_basis_weights: f64,
}

impl Default for Regularization {
    fn default() -> Self {
        Self {
            l1_template: 0.0,
            l2_template: 0.0,
            l1_basis_vectors: 0.0,
            l2_basis_vectors: 0.0,
            l2_basis_weights: 1.0,
        }
    }
}

/// Adam learning rates, one per parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRates {
    /// m/s per step.
    pub rvs: f64,
    pub template: f64,
    /// Shared by basis vectors and basis weights.
    pub basis: f64,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            rvs: 10.0,
            template: 0.01,
            basis: 0.01,
        }
    }
}

/// Options for adding a component to a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOptions {
    pub regularization: Regularization,
    /// Per-order overrides for `regularization` (JSON, keyed by parameter name).
    pub regularization_file: Option<PathBuf>,
    pub learning_rates: LearningRates,
    pub rvs_fixed: bool,
    /// Number of variable basis vectors (`K`).
    pub variable_bases: usize,
    pub scale_by_airmass: bool,
    /// Explicit template grid (log wavelength). Derived from the data when `None`.
    pub template_xs: Option<Vec<f64>>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            regularization: Regularization::default(),
            regularization_file: None,
            learning_rates: LearningRates::default(),
            rvs_fixed: false,
            variable_bases: 0,
            scale_by_airmass: false,
            template_xs: None,
        }
    }
}

impl ComponentOptions {
    /// Telluric preset: RVs fixed, flux scaled by airmass, faster template learning.
    pub fn telluric() -> Self {
        Self {
            learning_rates: LearningRates {
                template: 0.1,
                ..LearningRates::default()
            },
            rvs_fixed: true,
            scale_by_airmass: true,
            ..Self::default()
        }
    }

    pub fn with_variable_bases(mut self, k: usize) -> Self {
        self.variable_bases = k;
        self
    }

    pub fn with_learning_rates(mut self, rates: LearningRates) -> Self {
        self.learning_rates = rates;
        self
    }

    pub fn with_regularization_file(mut self, path: Option<PathBuf>) -> Self {
        self.regularization_file = path;
        self
    }

    pub fn with_rvs_fixed(mut self, fixed: bool) -> Self {
        self.rvs_fixed = fixed;
        self
    }
}

/// Options for one `Model::optimize` call.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOptions {
    pub n_iterations: usize,
    /// Record parameter snapshots after every iteration and write plots at the end.
    pub save_history: bool,
    /// Path prefix for history plots.
    pub history_basename: String,
    /// Log progress at `info` level (otherwise `debug`).
    pub verbose: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            n_iterations: 100,
            save_history: false,
            history_basename: "rvfit".to_string(),
            verbose: true,
        }
    }
}

impl OptimizeOptions {
    pub fn iterations(n_iterations: usize) -> Self {
        Self {
            n_iterations,
            ..Self::default()
        }
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Order indices to fit (`None` = all).
    pub orders: Option<Vec<usize>>,
    pub n_iterations: usize,

    pub star_bases: usize,
    pub telluric_bases: usize,
    pub star_learning_rates: LearningRates,
    pub telluric_learning_rates: LearningRates,
    /// Fit telluric RVs instead of holding them at zero.
    pub telluric_rvs_free: bool,
    /// Only fit a star component.
    pub star_only: bool,

    pub regularization_file: Option<PathBuf>,

    /// History plot prefix; enables history recording when set.
    pub history_basename: Option<String>,
    pub export_results: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            orders: None,
            n_iterations: 100,
            star_bases: 0,
            telluric_bases: 0,
            star_learning_rates: LearningRates::default(),
            telluric_learning_rates: ComponentOptions::telluric().learning_rates,
            telluric_rvs_free: false,
            star_only: false,
            regularization_file: None,
            history_basename: None,
            export_results: None,
            verbose: false,
        }
    }
}

impl FitConfig {
    pub fn star_options(&self) -> ComponentOptions {
        ComponentOptions::default()
            .with_variable_bases(self.star_bases)
            .with_learning_rates(self.star_learning_rates)
            .with_regularization_file(self.regularization_file.clone())
    }

    pub fn telluric_options(&self) -> ComponentOptions {
        ComponentOptions::telluric()
            .with_variable_bases(self.telluric_bases)
            .with_learning_rates(self.telluric_learning_rates)
            .with_regularization_file(self.regularization_file.clone())
            .with_rvs_fixed(!self.telluric_rvs_free)
    }

    pub fn optimize_options(&self, order_index: usize) -> OptimizeOptions {
        OptimizeOptions {
            n_iterations: self.n_iterations,
            save_history: self.history_basename.is_some(),
            history_basename: match &self.history_basename {
                Some(base) => format!("{base}_o{order_index}"),
                None => OptimizeOptions::default().history_basename,
            },
            verbose: self.verbose,
        }
    }
}
