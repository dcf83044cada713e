//! Optimization machinery.
//!
//! - per-block Adam state with separate propose/commit steps (`adam`)
//! - block identifiers (`blocks`)
//! - the session returned by `Model::setup` (`session`)

pub mod adam;
pub mod blocks;
pub mod session;

pub use adam::*;
pub use blocks::*;
pub use session::*;
