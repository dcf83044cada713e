//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initializes logging
//! - parses CLI arguments
//! - loads or generates spectra
//! - runs the per-order fit pipeline
//! - prints reports and writes optional exports

use clap::Parser;

use crate::cli::{Command, DemoArgs, EngineArgs, FitArgs};
use crate::data::SampleConfig;
use crate::domain::{FitConfig, LearningRates};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `rvfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Demo(args) => handle_demo(args),
    }
}

/// `RUST_LOG` controls verbosity; `info` by default.
fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    // A logger may already be installed (e.g. when embedded); keep it.
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args.engine);
    let data = crate::io::read_data_json(&args.data)?;
    log::info!(
        "loaded '{}': {} epoch(s), {} order(s)",
        args.data.display(),
        data.n_epochs(),
        data.n_orders()
    );

    let run = pipeline::run_fit(&data, &config)?;
    println!("{}", crate::report::format_run_summary(&data, &run, &config));
    println!("{}", crate::report::format_rv_table(&run.results));

    if let Some(path) = &config.export_results {
        run.results.write_json(path)?;
    }
    Ok(())
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args.engine);
    let sample = crate::data::generate_sample(&sample_config_from_args(&args))?;
    if let Some(path) = &args.save_data {
        crate::io::write_data_json(path, &sample.data)?;
    }

    let run = pipeline::run_fit(&sample.data, &config)?;
    println!("{}", crate::report::format_run_summary(&sample.data, &run, &config));
    println!("{}", crate::report::format_rv_table(&run.results));
    println!(
        "{}",
        crate::report::format_truth_comparison(&run.results, &sample.truth, pipeline::STAR)
    );

    if let Some(path) = &config.export_results {
        run.results.write_json(path)?;
    }
    Ok(())
}

pub fn fit_config_from_args(args: &EngineArgs) -> FitConfig {
    FitConfig {
        orders: args.orders.clone(),
        n_iterations: args.iterations,
        star_bases: args.star_bases,
        telluric_bases: args.telluric_bases,
        star_learning_rates: LearningRates {
            rvs: args.lr_rvs,
            template: args.lr_template,
            basis: args.lr_basis,
        },
        telluric_learning_rates: LearningRates {
            rvs: args.lr_rvs,
            template: args.telluric_lr_template,
            basis: args.lr_basis,
        },
        telluric_rvs_free: args.telluric_rvs_free,
        star_only: args.star_only,
        regularization_file: args.regularization.clone(),
        history_basename: args.history.clone(),
        export_results: args.export.clone(),
        verbose: args.verbose,
    }
}

pub fn sample_config_from_args(args: &DemoArgs) -> SampleConfig {
    SampleConfig {
        n_epochs: args.epochs,
        n_orders: args.n_orders,
        n_pixels: args.pixels,
        snr: args.snr,
        noise: !args.no_noise,
        seed: args.seed,
        ..SampleConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn demo_flags_map_to_configs() {
        let cli = Cli::parse_from([
            "rvfit",
            "demo",
            "--epochs",
            "8",
            "--no-noise",
            "--orders",
            "0,1",
            "--star-bases",
            "2",
            "--history",
            "out/run",
        ]);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        let sample = sample_config_from_args(&args);
        assert_eq!(sample.n_epochs, 8);
        assert!(!sample.noise);

        let config = fit_config_from_args(&args.engine);
        assert_eq!(config.orders, Some(vec![0, 1]));
        assert_eq!(config.star_options().variable_bases, 2);
        assert!(config.telluric_options().rvs_fixed);
        assert_eq!(config.optimize_options(1).history_basename, "out/run_o1");
    }

    #[test]
    fn fit_requires_data_path() {
        assert!(Cli::try_parse_from(["rvfit", "fit"]).is_err());
        let cli = Cli::try_parse_from(["rvfit", "fit", "--data", "spectra.json", "-n", "5"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.engine.iterations, 5);
        assert_eq!(args.engine.lr_rvs, 10.0);
    }
}
