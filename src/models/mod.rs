//! The fitting engine: components, the per-order model and RV uncertainties.

pub mod component;
pub mod model;
pub mod uncertainty;

pub use component::*;
pub use model::*;
pub use uncertainty::*;
