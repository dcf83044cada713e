//! Formatted terminal output.
//!
//! Formatting lives here so the engine and pipeline stay free of presentation
//! concerns.

use crate::app::pipeline::RunOutput;
use crate::data::{Data, SampleTruth};
use crate::domain::FitConfig;
use crate::io::{ComponentResults, Results};

/// Data set, per-order fit diagnostics and the component layout.
pub fn format_run_summary(data: &Data, run: &RunOutput, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("=== rvfit - joint RV and template fit ===\n");
    out.push_str(&format!(
        "Data: epochs={} | orders={} | fitted={}\n",
        data.n_epochs(),
        data.n_orders(),
        run.orders.len()
    ));
    out.push_str(&format!(
        "Iterations: {} | star bases={} | telluric bases={}{}\n",
        config.n_iterations,
        config.star_bases,
        config.telluric_bases,
        if config.star_only { " | star only" } else { "" }
    ));

    out.push_str("\nOrders:\n");
    out.push_str(&format!(
        "{:>6} {:>6} {:>14} {:>14} {:>8}\n",
        "index", "order", "nll_initial", "nll_final", "change"
    ));
    for o in &run.orders {
        let change = if o.nll_initial != 0.0 {
            format!("{:>7.1}%", 100.0 * (o.nll_final - o.nll_initial) / o.nll_initial.abs())
        } else {
            format!("{:>8}", "-")
        };
        out.push_str(&format!(
            "{:>6} {:>6} {:>14.6e} {:>14.6e} {change}\n",
            o.order_index, o.order, o.nll_initial, o.nll_final
        ));
    }

    if let Some(first) = run.orders.first() {
        out.push('\n');
        out.push_str(&first.summary);
        out.push('\n');
    }

    out
}

/// Combined RVs per epoch for every component with free RVs.
pub fn format_rv_table(results: &Results) -> String {
    let mut out = String::new();
    for comp in results.components.iter().filter(|c| !c.descriptor.rvs_fixed) {
        let Some(combined) = &comp.combined else {
            continue;
        };
        out.push_str(&format!(
            "\nCombined RVs for '{}' ({} order(s)):\n",
            comp.descriptor.name,
            comp.fits.len()
        ));
        out.push_str(&format!("{:>6} {:>14} {:>12}\n", "epoch", "rv [m/s]", "sigma [m/s]"));
        for (i, (rv, ivar)) in combined.rvs.iter().zip(&combined.ivars).enumerate() {
            out.push_str(&format!("{i:>6} {rv:>14.3} {:>12}\n", fmt_sigma(*ivar)));
        }
    }
    out
}

/// How well the star RVs were recovered (synthetic data only).
///
/// RVs are compared after removing each series' mean, since a template can
/// absorb a constant velocity offset.
pub fn format_truth_comparison(results: &Results, truth: &SampleTruth, star: &str) -> String {
    let Some(rvs) = star_rvs(results, star) else {
        return format!("No combined RVs for '{star}'.\n");
    };
    let rms = rms_offset_free(&rvs, &truth.star_rvs);
    let mut out = format!("\nStar RV recovery vs truth: rms = {rms:.3} m/s (mean removed)\n");
    out.push_str(&format!("{:>6} {:>14} {:>14}\n", "epoch", "fit [m/s]", "true [m/s]"));
    for (i, (fit, t)) in rvs.iter().zip(&truth.star_rvs).enumerate() {
        out.push_str(&format!("{i:>6} {fit:>14.3} {t:>14.3}\n"));
    }
    out
}

fn star_rvs(results: &Results, star: &str) -> Option<Vec<f64>> {
    let comp: &ComponentResults = results.component(star)?;
    comp.combined.as_ref().map(|c| c.rvs.clone())
}

/// RMS difference after subtracting each series' mean.
pub fn rms_offset_free(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::NAN;
    }
    let mean = |v: &[f64]| v[..n].iter().sum::<f64>() / n as f64;
    let (ma, mb) = (mean(a), mean(b));
    let ss: f64 = a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| {
            let d = (x - ma) - (y - mb);
            d * d
        })
        .sum();
    (ss / n as f64).sqrt()
}

fn fmt_sigma(ivar: f64) -> String {
    if ivar > 0.0 {
        format!("{:.3}", 1.0 / ivar.sqrt())
    } else {
        "-".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ComponentDescriptor, ComponentFit, ResultsSink};

    #[test]
    fn offset_is_ignored() {
        let a = [1.0, 2.0, 3.0];
        let b = [11.0, 12.0, 13.0];
        assert!(rms_offset_free(&a, &b) < 1e-12);
        assert!((rms_offset_free(&[1.0, -1.0], &[0.0, 0.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rv_table_skips_fixed_components() {
        let mut results = Results::new(2, vec![30]);
        for (name, fixed) in [("star", false), ("tellurics", true)] {
            results.add_component(ComponentDescriptor {
                name: name.into(),
                rvs_fixed: fixed,
                variable_bases: 0,
                scale_by_airmass: fixed,
            });
            results.update(ComponentFit {
                name: name.into(),
                order_index: 0,
                rvs: vec![1.0, 2.0],
                rv_ivars: if fixed { vec![0.0, 0.0] } else { vec![4.0, 0.0] },
                template_xs: vec![0.0, 1.0],
                template_ys: vec![0.0, 0.0],
                basis_vectors: None,
                basis_weights: None,
            });
        }
        results.combine_orders();
        let table = format_rv_table(&results);
        assert!(table.contains("'star'"));
        assert!(!table.contains("tellurics"));
        assert!(table.contains("0.500"));
    }
}
