//! Results aggregation.
//!
//! The engine talks to a [`ResultsSink`]: it announces a component once, and
//! pushes a [`ComponentFit`] after every `optimize` call. [`Results`] is the
//! in-memory implementation used by the CLI. On top of the sink contract it can
//!
//! - merge result sets computed for different orders in parallel
//! - combine per-order RVs into one time series per component
//! - write everything to a JSON file

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Static description of a component, sent once when it is first added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub rvs_fixed: bool,
    pub variable_bases: usize,
    pub scale_by_airmass: bool,
}

/// Fitted values of one component for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentFit {
    pub name: String,
    pub order_index: usize,
    pub rvs: Vec<f64>,
    /// Zero everywhere when the RVs were held fixed.
    pub rv_ivars: Vec<f64>,
    pub template_xs: Vec<f64>,
    pub template_ys: Vec<f64>,
    /// `K` rows of template length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis_vectors: Option<Vec<Vec<f64>>>,
    /// `N` rows of length `K`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis_weights: Option<Vec<Vec<f64>>>,
}

/// Receiver of fitted parameters.
pub trait ResultsSink {
    fn has_component(&self, name: &str) -> bool;
    fn add_component(&mut self, descriptor: ComponentDescriptor);
    fn update(&mut self, fit: ComponentFit);
}

/// RVs combined across orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRvs {
    pub rvs: Vec<f64>,
    pub ivars: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResults {
    #[serde(flatten)]
    pub descriptor: ComponentDescriptor,
    /// Latest fit per order, sorted by order index.
    pub fits: Vec<ComponentFit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<CombinedRvs>,
}

impl ComponentResults {
    pub fn fit_for_order(&self, order_index: usize) -> Option<&ComponentFit> {
        self.fits.iter().find(|f| f.order_index == order_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    pub n_epochs: usize,
    /// Instrument order numbers, indexed by order index.
    pub orders: Vec<usize>,
    pub components: Vec<ComponentResults>,
}

#[derive(Serialize)]
struct ResultsFile<'a> {
    tool: &'static str,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    results: &'a Results,
}

impl Results {
    pub fn new(n_epochs: usize, orders: Vec<usize>) -> Self {
        Self {
            n_epochs,
            orders,
            components: Vec::new(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentResults> {
        self.components.iter().find(|c| c.descriptor.name == name)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.descriptor.name.as_str())
    }

    /// Fold `other` into `self`. Fits from `other` replace fits for the same
    /// component and order.
    pub fn merge(&mut self, other: Results) {
        for incoming in other.components {
            if !self.has_component(&incoming.descriptor.name) {
                self.add_component(incoming.descriptor.clone());
            }
            for fit in incoming.fits {
                self.update(fit);
            }
        }
    }

    /// Combine each component's RVs across orders.
    ///
    /// Per epoch, RVs are averaged with their inverse variances as weights and
    /// the combined inverse variance is their sum. Epochs where every order has
    /// zero inverse variance (fixed RVs) get the plain mean and zero inverse
    /// variance.
    pub fn combine_orders(&mut self) {
        let n = self.n_epochs;
        for comp in &mut self.components {
            if comp.fits.is_empty() {
                comp.combined = None;
                continue;
            }
            let mut rvs = vec![0.0; n];
            let mut ivars = vec![0.0; n];
            for epoch in 0..n {
                let samples: Vec<(f64, f64)> = comp
                    .fits
                    .iter()
                    .filter_map(|f| Some((*f.rvs.get(epoch)?, f.rv_ivars.get(epoch).copied().unwrap_or(0.0))))
                    .collect();
                if samples.is_empty() {
                    continue;
                }
                let weight: f64 = samples.iter().map(|(_, w)| w.max(0.0)).sum();
                if weight > 0.0 {
                    rvs[epoch] = samples.iter().map(|(v, w)| v * w.max(0.0)).sum::<f64>() / weight;
                    ivars[epoch] = weight;
                } else {
                    rvs[epoch] = samples.iter().map(|(v, _)| v).sum::<f64>() / samples.len() as f64;
                }
            }
            comp.combined = Some(CombinedRvs { rvs, ivars });
        }
    }

    /// Write the results as pretty JSON with a UTC timestamp.
    pub fn write_json(&self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path).map_err(|e| {
            AppError::new(2, format!("Failed to create results JSON '{}': {e}", path.display()))
        })?;
        let out = ResultsFile {
            tool: "rvfit",
            generated_at: Utc::now(),
            results: self,
        };
        serde_json::to_writer_pretty(file, &out)
            .map_err(|e| AppError::new(2, format!("Failed to write results JSON: {e}")))?;
        Ok(())
    }
}

impl ResultsSink for Results {
    fn has_component(&self, name: &str) -> bool {
        self.component(name).is_some()
    }

    fn add_component(&mut self, descriptor: ComponentDescriptor) {
        if self.has_component(&descriptor.name) {
            return;
        }
        self.components.push(ComponentResults {
            descriptor,
            fits: Vec::new(),
            combined: None,
        });
    }

    fn update(&mut self, fit: ComponentFit) {
        let Some(comp) = self
            .components
            .iter_mut()
            .find(|c| c.descriptor.name == fit.name)
        else {
            log::warn!("results: update for unknown component '{}' ignored", fit.name);
            return;
        };
        match comp.fits.iter_mut().find(|f| f.order_index == fit.order_index) {
            Some(slot) => *slot = fit,
            None => {
                comp.fits.push(fit);
                comp.fits.sort_by_key(|f| f.order_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            name: name.to_string(),
            rvs_fixed: false,
            variable_bases: 0,
            scale_by_airmass: false,
        }
    }

    fn fit(name: &str, order_index: usize, rvs: Vec<f64>, rv_ivars: Vec<f64>) -> ComponentFit {
        ComponentFit {
            name: name.to_string(),
            order_index,
            rvs,
            rv_ivars,
            template_xs: vec![0.0, 1.0],
            template_ys: vec![0.0, 0.0],
            basis_vectors: None,
            basis_weights: None,
        }
    }

    #[test]
    fn update_replaces_fit_for_same_order() {
        let mut results = Results::new(2, vec![10, 11]);
        results.add_component(descriptor("star"));
        results.update(fit("star", 1, vec![1.0, 2.0], vec![0.0, 0.0]));
        results.update(fit("star", 0, vec![3.0, 4.0], vec![0.0, 0.0]));
        results.update(fit("star", 1, vec![5.0, 6.0], vec![0.0, 0.0]));

        let star = results.component("star").unwrap();
        assert_eq!(star.fits.len(), 2);
        assert_eq!(star.fits[0].order_index, 0);
        assert_eq!(star.fit_for_order(1).unwrap().rvs, vec![5.0, 6.0]);
    }

    #[test]
    fn merge_collects_orders_from_parallel_runs() {
        let mut a = Results::new(1, vec![10, 11]);
        a.add_component(descriptor("star"));
        a.update(fit("star", 0, vec![1.0], vec![1.0]));

        let mut b = Results::new(1, vec![10, 11]);
        b.add_component(descriptor("star"));
        b.add_component(descriptor("t"));
        b.update(fit("star", 1, vec![2.0], vec![1.0]));

        a.merge(b);
        assert_eq!(a.component_names().collect::<Vec<_>>(), vec!["star", "t"]);
        assert_eq!(a.component("star").unwrap().fits.len(), 2);
    }

    #[test]
    fn combine_orders_weights_by_ivar() {
        let mut results = Results::new(2, vec![10, 11]);
        results.add_component(descriptor("star"));
        results.update(fit("star", 0, vec![1.0, 5.0], vec![1.0, 0.0]));
        results.update(fit("star", 1, vec![4.0, 7.0], vec![2.0, 0.0]));
        results.combine_orders();

        let combined = results.component("star").unwrap().combined.clone().unwrap();
        assert!((combined.rvs[0] - 3.0).abs() < 1e-12);
        assert!((combined.ivars[0] - 3.0).abs() < 1e-12);
        assert!((combined.rvs[1] - 6.0).abs() < 1e-12);
        assert_eq!(combined.ivars[1], 0.0);
    }
}
