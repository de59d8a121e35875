//! Evolutionary search for symbolic regression.
//!
//! # Overview
//!
//! - **Fitness** (`fitness`): MSE, R², AIC/BIC and a reusable program scorer
//! - **Selection** (`selection`): double tournament and plain tournament
//! - **Operator bandit** (`bandit`): adaptive choice of variation operators
//! - **Baseline engine** (`genome`): random programs and subtree operators
//! - **Archive** (`archive`): Pareto front of error against complexity
//! - **Sub-search** (`search`): the generation loop tying the above together
//! - **Islands and ensembles** (`ensemble`): parallel fan-out and merge
//! - **Feature importance** (`importance`)
//!
//! # Example
//!
//! ```rust,no_run
//! use symreg::compute::Dataset;
//! use symreg::compute::evolution::IslandOrchestrator;
//! use symreg::schema::{IslandConfig, SearchConfig};
//!
//! let x: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
//! let y = x.iter().map(|v| v * v + 1.0).collect();
//! let data = Dataset::from_columns(vec![x], y).unwrap();
//!
//! let orchestrator =
//!     IslandOrchestrator::new(SearchConfig::default(), IslandConfig::default()).unwrap();
//! let result = orchestrator.run(&data).unwrap();
//!
//! for model in result.archive.iter() {
//!     println!("{:>3}  {:.4e}  {}", model.complexity, model.mse, model.expression);
//! }
//! ```

mod archive;
mod bandit;
mod ensemble;
mod fitness;
mod genome;
mod importance;
mod search;
mod selection;

pub use archive::{ArchiveError, ParetoArchive};
pub use bandit::{EpsilonGreedyBandit, GeneticOperator, OperatorBandit};
pub use ensemble::{EnsembleRegressor, IslandOrchestrator};
pub use fitness::{FitnessEvaluator, Score, aic, bic, mean_squared_error, r_squared};
pub use genome::{ProgramRng, RandomEngine};
pub use importance::{FeatureImportance, feature_importance};
pub use search::{
    CancellationToken, EngineContext, EngineFactory, LOG_TARGET, LogRecord, LogSink,
    ProgressCallback, SearchEngine, SearchError, SubSearch,
};
pub use selection::{
    DoubleTournament, SelectionCandidate, SelectionError, SelectionStrategy, Tournament,
    selection_from_config,
};
