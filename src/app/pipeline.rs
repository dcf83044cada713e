//! Shared fit pipeline used by `rvfit fit` and `rvfit demo`.
//!
//! Orders are independent: each gets its own `Model` and its own `Results`,
//! fit in parallel and merged afterwards.
//!
//! data -> per order (star [+ tellurics], setup, optimize) -> merge -> combine orders

use rayon::prelude::*;

use crate::data::Data;
use crate::domain::FitConfig;
use crate::error::{AppError, EngineError};
use crate::io::Results;
use crate::models::Model;

pub const STAR: &str = "star";
pub const TELLURICS: &str = "tellurics";

/// Outcome of fitting one order.
#[derive(Debug, Clone)]
pub struct OrderRun {
    pub order_index: usize,
    /// Instrument order number.
    pub order: usize,
    pub nll_initial: f64,
    pub nll_final: f64,
    pub iterations: usize,
    /// The model's component layout.
    pub summary: String,
}

/// All computed outputs of a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub orders: Vec<OrderRun>,
    pub results: Results,
}

/// Fit every selected order of `data` and combine the results.
pub fn run_fit(data: &Data, config: &FitConfig) -> Result<RunOutput, AppError> {
    let indices = select_orders(data, config)?;

    let runs = indices
        .par_iter()
        .map(|&r| {
            fit_order(data, config, r)
                .map_err(|e| AppError::new(e.exit_code(), format!("order index {r}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut results = Results::new(data.n_epochs(), data.order_numbers().to_vec());
    let mut orders = Vec::with_capacity(runs.len());
    for (run, partial) in runs {
        results.merge(partial);
        orders.push(run);
    }
    results.combine_orders();

    Ok(RunOutput { orders, results })
}

fn select_orders(data: &Data, config: &FitConfig) -> Result<Vec<usize>, AppError> {
    let Some(requested) = &config.orders else {
        return Ok((0..data.n_orders()).collect());
    };
    if requested.is_empty() {
        return Err(AppError::new(2, "No orders selected."));
    }
    for &r in requested {
        if r >= data.n_orders() {
            return Err(EngineError::UnknownOrder {
                order: r,
                n_orders: data.n_orders(),
            }
            .into());
        }
    }
    let mut out = requested.clone();
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Fit one order with a star and (unless disabled) a telluric component.
pub fn fit_order(data: &Data, config: &FitConfig, order_index: usize) -> Result<(OrderRun, Results), EngineError> {
    let mut results = Results::new(data.n_epochs(), data.order_numbers().to_vec());

    let (order, summary, report) = {
        let mut model = Model::new(data, &mut results, order_index)?;
        model.add_star(STAR, None, Some(config.star_options()))?;
        if !config.star_only {
            model.add_telluric(TELLURICS, None, Some(config.telluric_options()))?;
        }
        let mut session = model.setup()?;
        let report = model.optimize(&mut session, &config.optimize_options(order_index))?;
        (model.order(), model.to_string(), report)
    };

    let run = OrderRun {
        order_index,
        order,
        nll_initial: report.nll_initial,
        nll_final: report.nll_final,
        iterations: report.iterations,
        summary,
    };
    Ok((run, results))
}
