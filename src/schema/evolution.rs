//! Search configuration and result types.
//!
//! Configures the sub-search driver, island and ensemble runs, and describes
//! the models, per-generation reports and results they produce.

use serde::{Deserialize, Serialize};

use crate::compute::evolution::{GeneticOperator, ParetoArchive, aic, bic};
use crate::compute::{ComplexityKind, Program};

use super::{ConfigError, ScreeningConfig};

/// Configuration of one independent sub-search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Individuals per generation.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Generation budget.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Best individuals copied unchanged into the next generation.
    #[serde(default = "default_elitism")]
    pub elitism: usize,
    /// Wall-clock limit in seconds, checked at generation boundaries.
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    /// Stop once the best MSE is at or below this value.
    #[serde(default)]
    pub target_mse: Option<f64>,
    /// Stop after this many generations without improvement.
    #[serde(default)]
    pub stagnation_limit: Option<usize>,
    /// Base random seed. Sub-search `i` uses `seed + i`.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Tune constants of screened survivors before scoring them.
    #[serde(default = "default_true")]
    pub optimize_constants: bool,
    /// Complexity measure recorded on discovered models.
    #[serde(default)]
    pub complexity: ComplexityKind,
    /// Error measure the Pareto archive trades off against complexity.
    #[serde(default)]
    pub archive_objective: ArchiveObjective,
    /// Program generation parameters for the baseline engine.
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub screening: ScreeningConfig,
    #[serde(default)]
    pub selection: SelectionMethod,
    #[serde(default)]
    pub bandit: BanditConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            max_generations: default_max_generations(),
            elitism: default_elitism(),
            time_limit_secs: None,
            target_mse: None,
            stagnation_limit: None,
            random_seed: None,
            optimize_constants: true,
            complexity: ComplexityKind::default(),
            archive_objective: ArchiveObjective::default(),
            engine: EngineConfig::default(),
            screening: ScreeningConfig::default(),
            selection: SelectionMethod::default(),
            bandit: BanditConfig::default(),
        }
    }
}

fn default_population_size() -> usize {
    100
}
fn default_max_generations() -> usize {
    50
}
fn default_elitism() -> usize {
    2
}
fn default_true() -> bool {
    true
}

/// Parent selection method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum SelectionMethod {
    /// Parsimony tournaments feeding one fitness tournament.
    DoubleTournament {
        #[serde(default = "default_tournament_size")]
        parsimony_size: usize,
        #[serde(default = "default_tournament_size")]
        fitness_size: usize,
    },
    /// Plain fitness tournament.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
}

impl Default for SelectionMethod {
    fn default() -> Self {
        Self::DoubleTournament {
            parsimony_size: default_tournament_size(),
            fitness_size: default_tournament_size(),
        }
    }
}

fn default_tournament_size() -> usize {
    7
}

impl SelectionMethod {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes_ok = match *self {
            Self::DoubleTournament {
                parsimony_size,
                fitness_size,
            } => parsimony_size > 0 && fitness_size > 0,
            Self::Tournament { size } => size > 0,
        };
        if sizes_ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidTournamentSize)
        }
    }
}

/// Operator bandit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Exploration probability in [0, 1].
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
        }
    }
}

fn default_epsilon() -> f64 {
    0.1
}

impl BanditConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        Ok(())
    }
}

/// Random program generation and mutation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum depth of freshly grown trees.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Offspring longer than this are replaced by a parent copy.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Range of freshly drawn constants.
    #[serde(default = "default_constant_range")]
    pub constant_range: (f64, f64),
    /// Standard deviation of Gaussian constant perturbation.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_length: default_max_length(),
            constant_range: default_constant_range(),
            mutation_strength: default_mutation_strength(),
        }
    }
}

fn default_max_depth() -> usize {
    4
}
fn default_max_length() -> usize {
    64
}
fn default_constant_range() -> (f64, f64) {
    (-5.0, 5.0)
}
fn default_mutation_strength() -> f64 {
    0.5
}

/// Error measure stored in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveObjective {
    /// Lower MSE is better.
    #[default]
    Mse,
    /// Higher R² is better.
    R2,
}

/// Bagging over bootstrap samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_number_of_models")]
    pub number_of_models: usize,
    /// Bootstrap sample size as a fraction of the dataset rows, in (0, 1].
    #[serde(default = "default_bootstrap_ratio")]
    pub bootstrap_ratio: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            number_of_models: default_number_of_models(),
            bootstrap_ratio: default_bootstrap_ratio(),
        }
    }
}

fn default_number_of_models() -> usize {
    10
}
fn default_bootstrap_ratio() -> f64 {
    1.0
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.number_of_models == 0 {
            return Err(SearchConfigError::NoModels);
        }
        if !(self.bootstrap_ratio > 0.0 && self.bootstrap_ratio <= 1.0) {
            return Err(ConfigError::InvalidSampleRatio(self.bootstrap_ratio).into());
        }
        Ok(())
    }
}

/// Island-model parallel search on the full dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IslandConfig {
    #[serde(default = "default_island_count")]
    pub island_count: usize,
}

impl Default for IslandConfig {
    fn default() -> Self {
        Self {
            island_count: default_island_count(),
        }
    }
}

fn default_island_count() -> usize {
    4
}

impl IslandConfig {
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.island_count < 2 {
            return Err(SearchConfigError::TooFewIslands(self.island_count));
        }
        Ok(())
    }
}

// ============================================================================
// Models, Progress and Results
// ============================================================================

/// A scored expression on (or offered to) the Pareto front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub expression: String,
    pub mse: f64,
    pub r2: f64,
    pub complexity: usize,
    #[serde(default)]
    pub aic: Option<f64>,
    #[serde(default)]
    pub bic: Option<f64>,
    /// Bytecode behind `expression`, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<Program>,
}

impl DiscoveredModel {
    pub fn new(expression: impl Into<String>, mse: f64, r2: f64, complexity: usize) -> Self {
        Self {
            expression: expression.into(),
            mse,
            r2,
            complexity,
            aic: None,
            bic: None,
            program: None,
        }
    }

    /// Model for `program`, using its infix rendering as the expression.
    pub fn from_program(program: Program, mse: f64, r2: f64, complexity: usize) -> Self {
        Self {
            program: Some(program.clone()),
            ..Self::new(program.to_string(), mse, r2, complexity)
        }
    }

    /// Fill AIC and BIC for `samples` rows and `parameters` free parameters.
    pub fn with_information_criteria(mut self, samples: usize, parameters: usize) -> Self {
        self.aic = Some(aic(samples, self.mse, parameters));
        self.bic = Some(bic(samples, self.mse, parameters));
        self
    }
}

/// Per-generation telemetry from one sub-search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Index of the reporting sub-search.
    pub sub_search: usize,
    pub generation: usize,
    pub best_mse: f64,
    pub best_r2: f64,
    pub best_expression: String,
    pub pareto_front_size: usize,
    /// Operator used to breed this generation; `None` for the initial population.
    pub operator: Option<GeneticOperator>,
    /// Offspring rejected by screening this generation.
    pub rejected: usize,
}

/// Per-generation statistics for plotting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHistory {
    pub best_mse: Vec<f64>,
    /// Median MSE of the population; robust to infinite errors.
    pub median_mse: Vec<f64>,
    pub front_size: Vec<usize>,
    pub rejection_rate: Vec<f64>,
}

/// Reason a sub-search stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Best MSE reached the target.
    TargetReached,
    /// Stagnation limit hit.
    Stagnation,
    /// Cancellation token set.
    Cancelled,
    /// Wall-clock limit exceeded.
    DeadlineExceeded,
}

/// Outcome of one sub-search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSearchResult {
    pub index: usize,
    pub seed: u64,
    pub archive: ParetoArchive,
    pub generations: usize,
    pub evaluations: u64,
    pub stop_reason: StopReason,
    pub history: SearchHistory,
}

/// Final merged result of an island or ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionResult {
    /// Expression of the best merged model, if any.
    pub best_expression: Option<String>,
    pub archive: ParetoArchive,
    /// Generations summed over all sub-searches.
    pub total_generations: usize,
    pub elapsed_seconds: f64,
    /// Stop reason of each sub-search, by index.
    pub stop_reasons: Vec<StopReason>,
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Elitism ({elitism}) must be smaller than the population ({population})")]
    ElitismTooLarge { elitism: usize, population: usize },
    #[error("Time limit must be positive and finite, got {0}")]
    InvalidTimeLimit(f64),
    #[error("Target MSE must be non-negative, got {0}")]
    InvalidTargetMse(f64),
    #[error("Invalid engine parameters: {0}")]
    InvalidEngine(String),
    #[error("Ensemble needs at least one model")]
    NoModels,
    #[error("Island count must be at least 2, got {0}")]
    TooFewIslands(usize),
    #[error("Component config validation failed: {0}")]
    Config(#[from] ConfigError),
}

impl SearchConfig {
    /// Validate search configuration.
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        if self.population_size < 2 {
            return Err(SearchConfigError::PopulationTooSmall);
        }
        if self.elitism >= self.population_size {
            return Err(SearchConfigError::ElitismTooLarge {
                elitism: self.elitism,
                population: self.population_size,
            });
        }
        if let Some(limit) = self.time_limit_secs
            && !(limit > 0.0 && limit.is_finite())
        {
            return Err(SearchConfigError::InvalidTimeLimit(limit));
        }
        if let Some(target) = self.target_mse
            && !(target >= 0.0)
        {
            return Err(SearchConfigError::InvalidTargetMse(target));
        }

        let engine = &self.engine;
        if engine.max_depth == 0 || engine.max_length == 0 {
            return Err(SearchConfigError::InvalidEngine(
                "max_depth and max_length must be non-zero".into(),
            ));
        }
        let (lo, hi) = engine.constant_range;
        if !(lo <= hi) {
            return Err(SearchConfigError::InvalidEngine(format!(
                "constant range min ({lo}) > max ({hi})"
            )));
        }
        // Sampling needs finite bounds with a representable span.
        if !(hi - lo).is_finite() {
            return Err(SearchConfigError::InvalidEngine(format!(
                "constant range ({lo}, {hi}) must be finite"
            )));
        }
        if !(engine.mutation_strength >= 0.0 && engine.mutation_strength.is_finite()) {
            return Err(SearchConfigError::InvalidEngine(format!(
                "mutation strength {} must be non-negative",
                engine.mutation_strength
            )));
        }

        self.screening.validate()?;
        self.selection.validate()?;
        self.bandit.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(SearchConfig::default().validate().is_ok());
        assert!(EnsembleConfig::default().validate().is_ok());
        assert!(IslandConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let config = SearchConfig {
            population_size: 1,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(SearchConfigError::PopulationTooSmall));

        let config = SearchConfig {
            bandit: BanditConfig { epsilon: 1.5 },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(SearchConfigError::Config(ConfigError::InvalidEpsilon(1.5)))
        );

        let config = SearchConfig {
            selection: SelectionMethod::Tournament { size: 0 },
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(SearchConfigError::Config(ConfigError::InvalidTournamentSize))
        );

        let config = SearchConfig {
            time_limit_secs: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SearchConfigError::InvalidTimeLimit(_))
        ));

        for constant_range in [
            (f64::NEG_INFINITY, 0.0),
            (0.0, f64::INFINITY),
            (f64::NAN, 1.0),
            (f64::MIN, f64::MAX),
        ] {
            let config = SearchConfig {
                engine: EngineConfig {
                    constant_range,
                    ..Default::default()
                },
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(SearchConfigError::InvalidEngine(_))),
                "{constant_range:?} accepted"
            );
        }
        let config = SearchConfig {
            engine: EngineConfig {
                constant_range: (-1e300, 1e300),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        assert_eq!(
            IslandConfig { island_count: 1 }.validate(),
            Err(SearchConfigError::TooFewIslands(1))
        );
        assert!(matches!(
            EnsembleConfig {
                number_of_models: 3,
                bootstrap_ratio: 0.0
            }
            .validate(),
            Err(SearchConfigError::Config(ConfigError::InvalidSampleRatio(_)))
        ));
    }

    #[test]
    fn test_serialization() {
        let config = SearchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.population_size, config.population_size);
        assert_eq!(parsed.selection, config.selection);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "population_size": 20, "selection": { "method": "Tournament" } }"#;
        let parsed: SearchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.population_size, 20);
        assert_eq!(parsed.selection, SelectionMethod::Tournament { size: 7 });
        assert_eq!(parsed.bandit.epsilon, 0.1);
        assert!(parsed.optimize_constants);
    }

    #[test]
    fn test_information_criteria() {
        let model = DiscoveredModel::new("x0", 0.5, 0.9, 3).with_information_criteria(100, 2);
        let expected_aic = 100.0 * 0.5f64.ln() + 4.0;
        let expected_bic = 100.0 * 0.5f64.ln() + 2.0 * 100.0f64.ln();
        assert!((model.aic.unwrap() - expected_aic).abs() < 1e-12);
        assert!((model.bic.unwrap() - expected_bic).abs() < 1e-12);
    }
}
