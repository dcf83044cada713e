//! Reporting: optimization history/plots and formatted terminal output.

pub mod format;
pub mod history;

pub use format::*;
pub use history::*;
