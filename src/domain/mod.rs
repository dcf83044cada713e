//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - per-component configuration (`ComponentOptions`, `Regularization`, `LearningRates`)
//! - optimization run options (`OptimizeOptions`)
//! - the application-level run configuration (`FitConfig`)

pub mod types;

pub use types::*;
