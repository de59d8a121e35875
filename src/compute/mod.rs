//! Compute module - Program evaluation, screening and constant tuning.

mod complexity;
mod dataset;
mod dimension;
mod evaluator;
mod interval;
mod optimize;
mod program;
mod screening;

pub mod evolution;

pub use complexity::*;
pub use dataset::*;
pub use dimension::*;
pub use evaluator::*;
pub use interval::*;
pub use optimize::*;
pub use program::*;
pub use screening::*;
