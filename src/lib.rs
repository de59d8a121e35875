//! Symbolic regression core - program evaluation, screening and Pareto archival.
//!
//! Candidate expressions are postfix bytecode programs. They are evaluated
//! over tabular datasets by a stack machine, filtered by a cascade of cheap
//! screens (dimensional analysis, interval bounds, subset MSE), selected with
//! parsimony pressure, varied by operators chosen through an epsilon-greedy
//! bandit, and kept on a Pareto front of error against complexity.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration and result types (serde serializable)
//! - `compute`: Programs, datasets, evaluators, screens and the evolutionary search
//!
//! # Example
//!
//! ```rust,no_run
//! use symreg::{
//!     compute::{Dataset, Evaluator, Instruction, Program, StackEvaluator},
//!     compute::evolution::{LogSink, RandomEngine, SubSearch},
//!     schema::SearchConfig,
//! };
//!
//! let x: Vec<f64> = (0..200).map(|i| i as f64 / 20.0).collect();
//! let y = x.iter().map(|v| 3.0 * v.sin()).collect();
//! let data = Dataset::from_columns(vec![x], y).unwrap();
//!
//! // Evaluate a hand-written program: sin(x0) * 3
//! let program = Program::new(vec![
//!     Instruction::PushVariable(0),
//!     Instruction::Sine,
//!     Instruction::PushConstant(3.0),
//!     Instruction::Multiply,
//! ]);
//! let predictions = StackEvaluator::new().evaluate(&program, &data);
//! assert_eq!(predictions.len(), 200);
//!
//! // Or search for one
//! let config = SearchConfig { random_seed: Some(7), ..Default::default() };
//! let search =
//!     SubSearch::new(0, &config, data, &RandomEngine::from_context, LogSink::default()).unwrap();
//! let result = search.run();
//! if let Some(best) = result.archive.best() {
//!     println!("{} (mse {:.3e})", best.expression, best.mse);
//! }
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{EnsembleRegressor, IslandOrchestrator, ParetoArchive, SubSearch};
pub use compute::{Dataset, Program, ScreeningCascade, StackEvaluator};
pub use schema::{DiscoveredModel, RegressionResult, SearchConfig};
