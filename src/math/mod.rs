//! Numerical primitives: Doppler factors, interpolation, binning, low-rank bases
//! and small least-squares helpers.

pub mod basis;
pub mod binning;
pub mod doppler;
pub mod interp;
pub mod ols;

pub use basis::*;
pub use binning::*;
pub use doppler::*;
pub use interp::*;
pub use ols::*;
