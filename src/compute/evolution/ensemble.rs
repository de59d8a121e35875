//! Parallel fan-out of sub-searches.
//!
//! [`IslandOrchestrator`] runs several sub-searches on the same data;
//! [`EnsembleRegressor`] runs one per bootstrap sample. Both join every
//! sub-search and merge their archives into a single [`RegressionResult`].

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::compute::{Dataset, StackEvaluator};
use crate::schema::{
    ArchiveObjective, DiscoveredModel, EnsembleConfig, IslandConfig, RegressionResult,
    SearchConfig, SubSearchResult,
};

use super::archive::ParetoArchive;
use super::fitness::FitnessEvaluator;
use super::genome::RandomEngine;
use super::search::{
    CancellationToken, EngineContext, EngineFactory, LogSink, ProgressCallback, SearchEngine,
    SearchError, SubSearch, deadline_after,
};

/// Settings shared by island and ensemble runs.
struct Fanout {
    config: SearchConfig,
    factory: Arc<EngineFactory>,
    log: LogSink,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Fanout {
    fn new(config: SearchConfig) -> Self {
        Self {
            config,
            factory: Arc::new(RandomEngine::from_context),
            log: LogSink::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    fn set_engine_factory(
        &mut self,
        factory: impl Fn(EngineContext) -> Box<dyn SearchEngine> + Send + Sync + 'static,
    ) {
        self.factory = Arc::new(factory);
    }

    /// Config with the base seed pinned so every sub-search derives from it.
    fn seeded_config(&self) -> SearchConfig {
        let mut config = self.config.clone();
        config.random_seed = Some(config.random_seed.unwrap_or_else(rand::random));
        config
    }

    fn sub_search(
        &self,
        index: usize,
        config: &SearchConfig,
        data: Dataset,
        deadline: Option<Instant>,
    ) -> Result<SubSearch, SearchError> {
        let mut sub = SubSearch::new(index, config, data, self.factory.as_ref(), self.log.clone())?
            .with_cancellation(self.cancel.clone())
            .with_deadline(deadline);
        if let Some(progress) = &self.progress {
            sub = sub.with_progress(Arc::clone(progress));
        }
        Ok(sub)
    }
}

fn finish(
    results: Vec<SubSearchResult>,
    archive: ParetoArchive,
    start: Instant,
) -> RegressionResult {
    RegressionResult {
        best_expression: archive.best().map(|m| m.expression.clone()),
        archive,
        total_generations: results.iter().map(|r| r.generations).sum(),
        elapsed_seconds: start.elapsed().as_secs_f64(),
        stop_reasons: results.iter().map(|r| r.stop_reason).collect(),
    }
}

// ============================================================================
// Islands
// ============================================================================

/// Independent sub-searches over the same dataset, merged at the end.
pub struct IslandOrchestrator {
    fanout: Fanout,
    islands: IslandConfig,
}

impl IslandOrchestrator {
    pub fn new(config: SearchConfig, islands: IslandConfig) -> Result<Self, SearchError> {
        config.validate()?;
        islands.validate()?;
        Ok(Self {
            fanout: Fanout::new(config),
            islands,
        })
    }

    /// Use `factory` to build the engine of every sub-search.
    pub fn with_engine_factory(
        mut self,
        factory: impl Fn(EngineContext) -> Box<dyn SearchEngine> + Send + Sync + 'static,
    ) -> Self {
        self.fanout.set_engine_factory(factory);
        self
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.fanout.log = log;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.fanout.progress = Some(callback);
        self
    }

    /// Get the run-wide cancellation handle.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.fanout.cancel.clone()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.fanout.config
    }

    pub fn run(&self, data: &Dataset) -> Result<RegressionResult, SearchError> {
        let start = Instant::now();
        let config = self.fanout.seeded_config();
        let deadline = deadline_after(config.time_limit_secs);

        let subs = (0..self.islands.island_count)
            .map(|index| self.fanout.sub_search(index, &config, data.clone(), deadline))
            .collect::<Result<Vec<_>, _>>()?;

        self.fanout.log.info(format_args!(
            "running {} islands, base seed {}",
            subs.len(),
            config.random_seed.unwrap_or_default()
        ));

        let results: Vec<SubSearchResult> = subs.into_par_iter().map(SubSearch::run).collect();
        let archive = ParetoArchive::merge(results.iter().map(|r| &r.archive));

        let result = finish(results, archive, start);
        self.fanout.log.info(format_args!(
            "islands merged into a front of {} in {:.2}s",
            result.archive.len(),
            result.elapsed_seconds
        ));
        Ok(result)
    }
}

// ============================================================================
// Ensembles
// ============================================================================

/// Bagging: one sub-search per bootstrap sample. Members are re-scored on
/// the full dataset and merged on R².
pub struct EnsembleRegressor {
    fanout: Fanout,
    ensemble: EnsembleConfig,
}

impl EnsembleRegressor {
    pub fn new(config: SearchConfig, ensemble: EnsembleConfig) -> Result<Self, SearchError> {
        config.validate()?;
        ensemble.validate()?;
        Ok(Self {
            fanout: Fanout::new(config),
            ensemble,
        })
    }

    /// Use `factory` to build the engine of every sub-search.
    pub fn with_engine_factory(
        mut self,
        factory: impl Fn(EngineContext) -> Box<dyn SearchEngine> + Send + Sync + 'static,
    ) -> Self {
        self.fanout.set_engine_factory(factory);
        self
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.fanout.log = log;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.fanout.progress = Some(callback);
        self
    }

    /// Get the run-wide cancellation handle.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.fanout.cancel.clone()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.fanout.config
    }

    pub fn run(&self, data: &Dataset) -> Result<RegressionResult, SearchError> {
        let start = Instant::now();
        let config = self.fanout.seeded_config();
        let base_seed = config.random_seed.unwrap_or_default();
        let deadline = deadline_after(config.time_limit_secs);

        let subs = (0..self.ensemble.number_of_models)
            .map(|index| -> Result<SubSearch, SearchError> {
                let seed = base_seed.wrapping_add(index as u64);
                let sample = data.bootstrap_sample(self.ensemble.bootstrap_ratio, seed)?;
                self.fanout.sub_search(index, &config, sample, deadline)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.fanout.log.info(format_args!(
            "running {} ensemble members on {}-row bootstrap samples",
            subs.len(),
            ((data.rows() as f64 * self.ensemble.bootstrap_ratio).round() as usize).max(1)
        ));

        let full = FitnessEvaluator::new(data.clone());
        let (results, members): (Vec<SubSearchResult>, Vec<ParetoArchive>) = subs
            .into_par_iter()
            .map(|sub| {
                let result = sub.run();
                let member = rescore(&result.archive, &full);
                (result, member)
            })
            .unzip();
        let archive = ParetoArchive::merge(&members);

        let result = finish(results, archive, start);
        self.fanout.log.info(format_args!(
            "ensemble merged into a front of {} in {:.2}s",
            result.archive.len(),
            result.elapsed_seconds
        ));
        Ok(result)
    }
}

/// Re-score every model of `archive` on `full` into an R² archive. Models
/// without bytecode keep their in-sample scores.
fn rescore(archive: &ParetoArchive, full: &FitnessEvaluator) -> ParetoArchive {
    let mut evaluator = StackEvaluator::new();
    let mut buffer = Vec::new();
    let samples = full.targets().len();
    let models = archive.iter().map(|model| match &model.program {
        Some(program) => {
            let score = full.score(program, &mut evaluator, &mut buffer);
            DiscoveredModel::from_program(program.clone(), score.mse, score.r2, model.complexity)
                .with_information_criteria(samples, program.constants().len())
        }
        None => model.clone(),
    });
    ParetoArchive::from_models(ArchiveObjective::R2, models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SearchConfigError, StopReason};

    fn quadratic_data() -> Dataset {
        let x: Vec<f64> = (0..50).map(|i| i as f64 / 10.0 - 2.5).collect();
        let y = x.iter().map(|v| v * v).collect();
        Dataset::from_columns(vec![x], y).unwrap()
    }

    fn config() -> SearchConfig {
        SearchConfig {
            population_size: 16,
            max_generations: 4,
            random_seed: Some(99),
            ..Default::default()
        }
    }

    #[test]
    fn test_island_count_validated() {
        let err = IslandOrchestrator::new(config(), IslandConfig { island_count: 1 })
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::Config(SearchConfigError::TooFewIslands(1))));
    }

    #[test]
    fn test_ensemble_needs_models() {
        let ensemble = EnsembleConfig {
            number_of_models: 0,
            ..Default::default()
        };
        assert!(matches!(
            EnsembleRegressor::new(config(), ensemble),
            Err(SearchError::Config(SearchConfigError::NoModels))
        ));
    }

    #[test]
    fn test_islands_merge_every_front() {
        let orchestrator =
            IslandOrchestrator::new(config(), IslandConfig { island_count: 3 }).unwrap();
        let result = orchestrator.run(&quadratic_data()).unwrap();

        assert_eq!(result.stop_reasons, vec![StopReason::MaxGenerations; 3]);
        assert_eq!(result.total_generations, 12);
        assert!(!result.archive.is_empty());
        assert_eq!(
            result.best_expression.as_deref(),
            result.archive.best().map(|m| m.expression.as_str())
        );
        // One model per complexity level, error strictly falling.
        for pair in result.archive.models().windows(2) {
            assert!(pair[0].complexity < pair[1].complexity);
            assert!(pair[0].mse > pair[1].mse);
        }
    }

    #[test]
    fn test_ensemble_rescores_on_full_data() {
        let data = quadratic_data();
        let ensemble = EnsembleConfig {
            number_of_models: 3,
            bootstrap_ratio: 0.5,
        };
        let result = EnsembleRegressor::new(config(), ensemble)
            .unwrap()
            .run(&data)
            .unwrap();

        assert_eq!(result.archive.objective(), ArchiveObjective::R2);
        assert_eq!(result.stop_reasons.len(), 3);

        let full = FitnessEvaluator::new(data);
        let mut evaluator = StackEvaluator::new();
        let mut buffer = Vec::new();
        for model in result.archive.iter() {
            let program = model.program.as_ref().unwrap();
            let score = full.score(program, &mut evaluator, &mut buffer);
            assert_eq!(score.r2, model.r2);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let orchestrator =
            IslandOrchestrator::new(config(), IslandConfig { island_count: 2 }).unwrap();
        orchestrator.cancel_handle().cancel();
        let result = orchestrator.run(&quadratic_data()).unwrap();
        assert_eq!(result.stop_reasons, vec![StopReason::Cancelled; 2]);
        assert_eq!(result.total_generations, 0);
    }
}
