//! Synthetic spectra for demos and tests.
//!
//! Every order is a log-uniform pixel grid carrying two sets of Gaussian
//! absorption lines in log flux:
//!
//! - stellar lines, Doppler shifted per epoch by the star's RV as seen from the
//!   observatory (`barycentric RV - berv`)
//! - telluric lines, at rest in the observatory and scaled by airmass
//!
//! Optional Gaussian noise is drawn from a seeded RNG so runs are reproducible.

use std::f64::consts::TAU;

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::data::{Data, OrderSpectra};
use crate::error::EngineError;
use crate::math::{TEMPLATE_STEP, log_doppler};

/// One Gaussian absorption line in log flux.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    /// Log wavelength of the line centre.
    pub center: f64,
    /// Depth in log flux (positive values absorb).
    pub depth: f64,
    /// Gaussian sigma in log wavelength.
    pub width: f64,
}

/// Sum of line profiles at log wavelength `x`.
pub fn line_profile(lines: &[Line], x: f64) -> f64 {
    lines
        .iter()
        .map(|l| {
            let d = (x - l.center) / l.width;
            -l.depth * (-0.5 * d * d).exp()
        })
        .sum()
}

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub n_epochs: usize,
    pub n_orders: usize,
    pub n_pixels: usize,
    /// Log wavelength of the first pixel of the first order.
    pub x_start: f64,
    /// Pixel spacing in log wavelength.
    pub pixel_step: f64,

    /// Semi-amplitude of the star's barycentric RV curve (m/s).
    pub rv_amplitude: f64,
    /// Semi-amplitude of the barycentric correction over the run (m/s).
    pub berv_amplitude: f64,

    pub star_lines_per_order: usize,
    pub telluric_lines_per_order: usize,
    pub line_depth: f64,
    /// Line sigma in pixels.
    pub line_width_pixels: f64,

    /// Signal-to-noise per pixel; sets the noise level and inverse variances.
    pub snr: f64,
    pub noise: bool,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            n_epochs: 12,
            n_orders: 2,
            n_pixels: 400,
            x_start: 5000.0_f64.ln(),
            pixel_step: TEMPLATE_STEP,
            rv_amplitude: 30.0,
            berv_amplitude: 20_000.0,
            star_lines_per_order: 6,
            telluric_lines_per_order: 3,
            line_depth: 0.4,
            line_width_pixels: 3.0,
            snr: 200.0,
            noise: true,
            seed: 42,
        }
    }
}

/// The values the sample was generated from.
#[derive(Debug, Clone)]
pub struct SampleTruth {
    /// Barycentric stellar RVs (m/s).
    pub barycentric_rvs: Vec<f64>,
    /// Star RVs in the observatory frame: `barycentric_rvs - bervs`.
    pub star_rvs: Vec<f64>,
    /// Per order.
    pub star_lines: Vec<Vec<Line>>,
    pub telluric_lines: Vec<Vec<Line>>,
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub data: Data,
    pub truth: SampleTruth,
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleData, EngineError> {
    if config.n_epochs == 0 || config.n_orders == 0 {
        return Err(EngineError::InvalidData("sample needs at least one epoch and one order".into()));
    }
    if config.n_pixels < 2 {
        return Err(EngineError::InvalidData("sample needs at least two pixels per order".into()));
    }
    if !(config.pixel_step.is_finite() && config.pixel_step > 0.0) {
        return Err(EngineError::InvalidData("pixel step must be positive".into()));
    }
    if !(config.snr.is_finite() && config.snr > 0.0) {
        return Err(EngineError::InvalidData("signal-to-noise must be positive".into()));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, 1.0 / config.snr)
        .map_err(|e| EngineError::InvalidData(format!("noise distribution: {e}")))?;

    let n = config.n_epochs;
    let phase: f64 = rng.gen_range(0.0..TAU);
    let period = rng.gen_range(0.3..0.9) * n as f64 + 1.0;
    let barycentric_rvs: Vec<f64> = (0..n)
        .map(|i| config.rv_amplitude * (TAU * i as f64 / period + phase).sin())
        .collect();
    let bervs: Vec<f64> = (0..n)
        .map(|i| config.berv_amplitude * (TAU * (i as f64 + 0.5) / n as f64).cos())
        .collect();
    let airms: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..1.8)).collect();
    let star_rvs: Vec<f64> = barycentric_rvs.iter().zip(&bervs).map(|(v, b)| v - b).collect();

    let width = config.line_width_pixels * config.pixel_step;
    let order_span = config.n_pixels as f64 * config.pixel_step;
    // Keep lines away from the edges so shifted profiles stay on the grid.
    let margin = 0.1 * order_span;

    let mut spectra = Vec::with_capacity(config.n_orders);
    let mut star_lines = Vec::with_capacity(config.n_orders);
    let mut telluric_lines = Vec::with_capacity(config.n_orders);
    for r in 0..config.n_orders {
        let x0 = config.x_start + r as f64 * (order_span + 50.0 * config.pixel_step);
        let mut draw_lines = |count: usize, depth_scale: f64| -> Vec<Line> {
            (0..count)
                .map(|_| Line {
                    center: x0 + rng.gen_range(margin..order_span - margin),
                    depth: config.line_depth * depth_scale * rng.gen_range(0.5..1.0),
                    width,
                })
                .collect()
        };
        let stars = draw_lines(config.star_lines_per_order, 1.0);
        let tellurics = draw_lines(config.telluric_lines_per_order, 0.5);

        let xs = DMatrix::from_fn(n, config.n_pixels, |_, j| x0 + j as f64 * config.pixel_step);
        let mut ys = DMatrix::from_fn(n, config.n_pixels, |i, j| {
            let x = xs[(i, j)];
            line_profile(&stars, x + log_doppler(star_rvs[i])) + airms[i] * line_profile(&tellurics, x)
        });
        if config.noise {
            for y in ys.iter_mut() {
                *y += noise.sample(&mut rng);
            }
        }
        let ivars = DMatrix::from_element(n, config.n_pixels, config.snr * config.snr);

        spectra.push(OrderSpectra { xs, ys, ivars });
        star_lines.push(stars);
        telluric_lines.push(tellurics);
    }

    let orders = (0..config.n_orders).map(|r| 30 + r).collect();
    let data = Data::new(orders, spectra, bervs, airms)?;
    Ok(SampleData {
        data,
        truth: SampleTruth {
            barycentric_rvs,
            star_rvs,
            star_lines,
            telluric_lines,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_follow_config() {
        let config = SampleConfig {
            n_epochs: 5,
            n_orders: 3,
            n_pixels: 50,
            ..SampleConfig::default()
        };
        let sample = generate_sample(&config).unwrap();
        assert_eq!(sample.data.n_epochs(), 5);
        assert_eq!(sample.data.n_orders(), 3);
        assert_eq!(sample.data.spectra(2).unwrap().xs.shape(), (5, 50));
        assert_eq!(sample.truth.star_lines.len(), 3);
    }

    #[test]
    fn same_seed_same_sample() {
        let config = SampleConfig::default();
        let a = generate_sample(&config).unwrap();
        let b = generate_sample(&config).unwrap();
        assert_eq!(a.data, b.data);

        let c = generate_sample(&SampleConfig { seed: 7, ..config }).unwrap();
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn noiseless_sample_matches_line_model() {
        let config = SampleConfig {
            noise: false,
            n_orders: 1,
            ..SampleConfig::default()
        };
        let sample = generate_sample(&config).unwrap();
        let s = sample.data.spectra(0).unwrap();
        let (i, j) = (3, 123);
        let x = s.xs[(i, j)];
        let expected = line_profile(&sample.truth.star_lines[0], x + log_doppler(sample.truth.star_rvs[i]))
            + sample.data.airms()[i] * line_profile(&sample.truth.telluric_lines[0], x);
        assert!((s.ys[(i, j)] - expected).abs() < 1e-15);
    }

    #[test]
    fn star_rvs_are_barycentric_minus_berv() {
        let sample = generate_sample(&SampleConfig::default()).unwrap();
        for ((s, v), b) in sample
            .truth
            .star_rvs
            .iter()
            .zip(&sample.truth.barycentric_rvs)
            .zip(sample.data.bervs())
        {
            assert!((s - (v - b)).abs() < 1e-9);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SampleConfig {
            n_pixels: 1,
            ..SampleConfig::default()
        };
        assert!(generate_sample(&config).is_err());
    }
}
