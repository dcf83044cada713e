//! `spectral-rv` library crate.
//!
//! Decomposes multi-epoch spectra into additive Doppler-shifted components
//! (e.g. a star and the atmosphere) and fits per-epoch radial velocities and
//! rest-frame templates jointly.
//!
//! The binary (`rvfit`) is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - models can be driven directly from other code

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
