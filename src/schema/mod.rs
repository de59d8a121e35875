//! Schema module - Configuration and result types for symbolic regression runs.

mod config;
mod evolution;

pub use config::*;
pub use evolution::*;
