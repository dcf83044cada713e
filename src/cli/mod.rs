//! Command-line parsing for `rvfit`.
//!
//! Argument parsing and command dispatch stay separate from the engine: the
//! parsed arguments are turned into plain config structs in `app`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "rvfit",
    version,
    about = "Joint radial-velocity and template fitting for multi-epoch spectra"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a data JSON file (star + telluric per order) and print a summary.
    Fit(FitArgs),
    /// Generate synthetic spectra, fit them and compare against the truth.
    Demo(DemoArgs),
}

/// Engine options shared by every command.
#[derive(Debug, Args, Clone)]
pub struct EngineArgs {
    /// Order indices to fit (comma separated). All orders when omitted.
    #[arg(long, value_delimiter = ',')]
    pub orders: Option<Vec<usize>>,

    /// Optimization iterations per order.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub iterations: usize,

    /// Variable basis vectors for the star.
    #[arg(long, default_value_t = 0)]
    pub star_bases: usize,

    /// Variable basis vectors for the tellurics.
    #[arg(long, default_value_t = 0)]
    pub telluric_bases: usize,

    /// Star RV learning rate (m/s per step).
    #[arg(long, default_value_t = 10.0)]
    pub lr_rvs: f64,

    /// Star template learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr_template: f64,

    /// Basis learning rate (both components).
    #[arg(long, default_value_t = 0.01)]
    pub lr_basis: f64,

    /// Telluric template learning rate.
    #[arg(long, default_value_t = 0.1)]
    pub telluric_lr_template: f64,

    /// Fit telluric RVs instead of holding them at zero.
    #[arg(long)]
    pub telluric_rvs_free: bool,

    /// Fit a star component only.
    #[arg(long)]
    pub star_only: bool,

    /// Per-order regularization JSON.
    #[arg(long, value_name = "JSON")]
    pub regularization: Option<PathBuf>,

    /// Record optimization history and write SVG plots with this path prefix.
    #[arg(long, value_name = "PREFIX")]
    pub history: Option<String>,

    /// Write fitted results to JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Log optimization progress at info level.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Data JSON file.
    #[arg(long, value_name = "JSON")]
    pub data: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Number of epochs.
    #[arg(long, default_value_t = 12)]
    pub epochs: usize,

    /// Number of spectral orders.
    #[arg(long, default_value_t = 2)]
    pub n_orders: usize,

    /// Pixels per order.
    #[arg(long, default_value_t = 400)]
    pub pixels: usize,

    /// Random seed for line placement, RVs and noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Signal-to-noise per pixel.
    #[arg(long, default_value_t = 200.0)]
    pub snr: f64,

    /// Generate noiseless spectra.
    #[arg(long)]
    pub no_noise: bool,

    /// Also write the generated data JSON (readable by `rvfit fit`).
    #[arg(long, value_name = "JSON")]
    pub save_data: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,
}
