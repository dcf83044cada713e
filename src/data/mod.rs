//! Observed spectra and synthetic data generation.

pub mod sample;
pub mod spectra;

pub use sample::*;
pub use spectra::*;
