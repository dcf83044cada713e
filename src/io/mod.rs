//! Input/output helpers.
//!
//! - data JSON read/write (`ingest`)
//! - per-order regularization overrides (`regularization`)
//! - results aggregation and export (`results`)

pub mod ingest;
pub mod regularization;
pub mod results;

pub use ingest::*;
pub use regularization::*;
pub use results::*;
