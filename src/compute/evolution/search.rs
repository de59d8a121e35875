//! Sub-search driver.
//!
//! A [`SubSearch`] is one independent evolutionary search: a pluggable
//! [`SearchEngine`] proposes programs, the screening cascade filters them,
//! survivors are scored in parallel and offered to a Pareto archive, and the
//! operator bandit learns which variation operator pays off.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::prelude::*;
use rayon::prelude::*;

use crate::compute::{
    ComplexityMetric, ConstantOptimizer, Dataset, DatasetError, GaussNewtonOptimizer, Program,
    ScreeningCascade, StackEvaluator,
};
use crate::schema::{
    DiscoveredModel, EngineConfig, GenerationReport, SearchConfig, SearchConfigError,
    SearchHistory, StopReason, SubSearchResult,
};

use super::archive::ParetoArchive;
use super::bandit::{EpsilonGreedyBandit, GeneticOperator, OperatorBandit};
use super::fitness::{FitnessEvaluator, Score};
use super::selection::{SelectionCandidate, SelectionStrategy, selection_from_config};

/// Target used for every log record emitted by the search.
pub const LOG_TARGET: &str = "symreg";

/// Errors that prevent a search from starting.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid search configuration: {0}")]
    Config(#[from] SearchConfigError),
    #[error("Invalid dataset: {0}")]
    Dataset(#[from] DatasetError),
}

// ============================================================================
// Logging, Cancellation and Progress
// ============================================================================

/// A log message as delivered to a [`LogSink`] callback.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: log::Level,
    /// Index of the emitting sub-search, if any.
    pub source: Option<usize>,
    pub message: &'a str,
}

type LogCallback = Arc<dyn Fn(&LogRecord<'_>) + Send + Sync>;

/// Forwards search diagnostics to the `log` facade and, optionally, to a
/// caller-supplied callback.
#[derive(Clone, Default)]
pub struct LogSink {
    callback: Option<LogCallback>,
    source: Option<usize>,
}

impl LogSink {
    pub fn new(callback: impl Fn(&LogRecord<'_>) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            source: None,
        }
    }

    /// Same sink, tagging records with sub-search `index`.
    pub fn with_source(&self, index: usize) -> Self {
        Self {
            callback: self.callback.clone(),
            source: Some(index),
        }
    }

    pub fn source(&self) -> Option<usize> {
        self.source
    }

    pub fn log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        match self.source {
            Some(index) => log::log!(target: LOG_TARGET, level, "[{index}] {args}"),
            None => log::log!(target: LOG_TARGET, level, "{args}"),
        }
        if let Some(callback) = &self.callback {
            let message = args.to_string();
            callback(&LogRecord {
                level,
                source: self.source,
                message: &message,
            });
        }
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Trace, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Warn, args);
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("callback", &self.callback.is_some())
            .field("source", &self.source)
            .finish()
    }
}

/// Shared stop flag, checked at generation boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Receives one report per generation, possibly from several threads.
pub type ProgressCallback = Arc<dyn Fn(&GenerationReport) + Send + Sync>;

// ============================================================================
// Search Engines
// ============================================================================

/// Proposes programs: the initial population and offspring of selected
/// parents.
pub trait SearchEngine: Send {
    fn name(&self) -> &'static str;

    fn initial_population(&mut self, size: usize) -> Vec<Program>;

    /// One offspring of `parents` under `operator`. `parents` holds
    /// `operator.parents()` programs.
    fn breed(&mut self, operator: GeneticOperator, parents: &[Program]) -> Program;
}

/// Everything an engine factory needs to build the engine of one sub-search.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Sub-search index.
    pub index: usize,
    pub seed: u64,
    pub feature_count: usize,
    pub config: EngineConfig,
    pub log: LogSink,
}

/// Builds one engine per sub-search.
pub type EngineFactory = dyn Fn(EngineContext) -> Box<dyn SearchEngine> + Send + Sync;

// ============================================================================
// Sub-search
// ============================================================================

#[derive(Debug, Clone)]
struct Individual {
    id: u64,
    program: Program,
    score: Score,
    complexity: usize,
}

/// Instant `limit_secs` from now; `None` when unset or unrepresentable.
pub(crate) fn deadline_after(limit_secs: Option<f64>) -> Option<Instant> {
    limit_secs
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .and_then(|limit| Instant::now().checked_add(limit))
}

/// Relative MSE improvement from `previous` to `current`, never negative.
fn improvement(previous: f64, current: f64) -> f64 {
    if !(current < previous) {
        return 0.0;
    }
    if previous.is_finite() && previous > 0.0 {
        (previous - current) / previous
    } else {
        1.0
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}

/// One independent evolutionary search over a dataset.
pub struct SubSearch {
    index: usize,
    seed: u64,
    config: SearchConfig,
    fitness: FitnessEvaluator,
    engine: Box<dyn SearchEngine>,
    cascade: ScreeningCascade,
    evaluator: StackEvaluator,
    selection: Box<dyn SelectionStrategy>,
    bandit: Box<dyn OperatorBandit>,
    optimizer: Option<Box<dyn ConstantOptimizer>>,
    complexity: Box<dyn ComplexityMetric>,
    archive: ParetoArchive,
    population: Vec<Individual>,
    history: SearchHistory,
    generation: usize,
    evaluations: u64,
    best_mse: f64,
    stagnation_count: usize,
    next_id: u64,
    log: LogSink,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    progress: Option<ProgressCallback>,
}

impl SubSearch {
    /// Build sub-search `index` over `data`. Its seed is the configured base
    /// seed plus `index`; component seeds are drawn from that.
    pub fn new(
        index: usize,
        config: &SearchConfig,
        data: Dataset,
        factory: &EngineFactory,
        log: LogSink,
    ) -> Result<Self, SearchError> {
        config.validate()?;

        let base = config.random_seed.unwrap_or_else(rand::random);
        let seed = base.wrapping_add(index as u64);
        let mut seeder = StdRng::seed_from_u64(seed);
        let log = log.with_source(index);

        let engine = factory(EngineContext {
            index,
            seed: seeder.next_u64(),
            feature_count: data.feature_count(),
            config: config.engine,
            log: log.clone(),
        });
        let selection = selection_from_config(&config.selection, seeder.next_u64())
            .map_err(SearchConfigError::from)?;
        let bandit = EpsilonGreedyBandit::from_config(&config.bandit, seeder.next_u64())
            .map_err(SearchConfigError::from)?;
        let cascade =
            ScreeningCascade::from_config(&config.screening).map_err(SearchConfigError::from)?;
        let optimizer = config
            .optimize_constants
            .then(|| Box::new(GaussNewtonOptimizer::default()) as Box<dyn ConstantOptimizer>);
        let deadline = deadline_after(config.time_limit_secs);

        log.debug(format_args!(
            "sub-search seed {seed}, engine {}, screens [{}]",
            engine.name(),
            cascade.check_names().join(", ")
        ));

        Ok(Self {
            index,
            seed,
            config: config.clone(),
            fitness: FitnessEvaluator::new(data),
            engine,
            cascade,
            evaluator: StackEvaluator::new(),
            selection,
            bandit: Box::new(bandit),
            optimizer,
            complexity: config.complexity.metric(),
            archive: ParetoArchive::new(config.archive_objective),
            population: Vec::new(),
            history: SearchHistory::default(),
            generation: 0,
            evaluations: 0,
            best_mse: f64::INFINITY,
            stagnation_count: 0,
            next_id: 0,
            log,
            cancel: CancellationToken::new(),
            deadline,
            progress: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Override the deadline derived from `time_limit_secs`.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_selection(mut self, selection: Box<dyn SelectionStrategy>) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_bandit(mut self, bandit: Box<dyn OperatorBandit>) -> Self {
        self.bandit = bandit;
        self
    }

    pub fn with_cascade(mut self, cascade: ScreeningCascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Replace the constant optimizer; `None` disables tuning.
    pub fn with_optimizer(mut self, optimizer: Option<Box<dyn ConstantOptimizer>>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn archive(&self) -> &ParetoArchive {
        &self.archive
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Screen `programs`, score the survivors in parallel and offer them to
    /// the archive. Returns the scored individuals and the rejection count.
    fn evaluate(&mut self, programs: Vec<Program>) -> (Vec<Individual>, usize) {
        let mut survivors = Vec::with_capacity(programs.len());
        let mut rejected = Vec::new();
        for program in programs {
            let outcome = self.cascade.screen(&program, &mut self.evaluator, self.fitness.data());
            if outcome.passed {
                survivors.push(program);
            } else {
                rejected.push(program);
            }
        }

        let fitness = &self.fitness;
        let optimizer = self.optimizer.as_deref();
        let log = &self.log;
        let scored: Vec<(Program, Score)> = survivors
            .into_par_iter()
            .map_init(
                || (StackEvaluator::new(), Vec::<f64>::new()),
                |(evaluator, buffer), mut program| {
                    let mut score = fitness.score(&program, evaluator, buffer);
                    if let Some(optimizer) = optimizer
                        && score.mse.is_finite()
                        && score.mse > 0.0
                    {
                        match optimizer.optimize(&program, fitness.data()) {
                            Ok(Some(tuned)) => {
                                let tuned_score = fitness.score(&tuned, evaluator, buffer);
                                if tuned_score.mse < score.mse {
                                    program = tuned;
                                    score = tuned_score;
                                }
                            }
                            Ok(None) => {}
                            Err(err) => log.debug(format_args!(
                                "{} skipped for {program}: {err}",
                                optimizer.name()
                            )),
                        }
                    }
                    (program, score)
                },
            )
            .collect();
        self.evaluations += scored.len() as u64;

        let rejected_count = rejected.len();
        let samples = self.fitness.targets().len();
        let mut individuals = Vec::with_capacity(scored.len() + rejected_count);
        for (program, score) in scored {
            let complexity = self.complexity.complexity(&program);
            if score.mse.is_finite() {
                let model =
                    DiscoveredModel::from_program(program.clone(), score.mse, score.r2, complexity)
                        .with_information_criteria(samples, program.constants().len());
                self.archive.add(model);
            }
            individuals.push(self.individual(program, score, complexity));
        }
        // Rejected programs stay in the gene pool with the worst score.
        for program in rejected {
            let complexity = self.complexity.complexity(&program);
            individuals.push(self.individual(program, Score::WORST, complexity));
        }
        (individuals, rejected_count)
    }

    fn individual(&mut self, program: Program, score: Score, complexity: usize) -> Individual {
        let id = self.next_id;
        self.next_id += 1;
        Individual {
            id,
            program,
            score,
            complexity,
        }
    }

    fn initialize(&mut self) -> usize {
        let programs = self.engine.initial_population(self.config.population_size);
        let (population, rejected) = self.evaluate(programs);
        self.population = population;
        self.best_mse = self.population_best_mse();
        rejected
    }

    fn population_best_mse(&self) -> f64 {
        self.population
            .iter()
            .map(|i| i.score.mse)
            .fold(f64::INFINITY, f64::min)
    }

    fn step_generation(&mut self) -> (GeneticOperator, usize) {
        let operator = self.bandit.select_operator();
        let offspring = self.config.population_size - self.config.elitism;
        let per_child = operator.parents();

        let candidates: Vec<SelectionCandidate> = self
            .population
            .iter()
            .map(|i| SelectionCandidate::new(i.id, i.score.mse, i.complexity))
            .collect();
        let selected = self
            .selection
            .select_indices(&candidates, offspring * per_child);
        let children: Vec<Program> = match selected {
            Ok(parents) => parents
                .chunks(per_child)
                .map(|chunk| {
                    let parents: Vec<Program> =
                        chunk.iter().map(|&i| self.population[i].program.clone()).collect();
                    self.engine.breed(operator, &parents)
                })
                .collect(),
            Err(err) => {
                self.log.warn(format_args!("{err}, reseeding population"));
                self.engine.initial_population(offspring)
            }
        };

        let (mut next, rejected) = self.evaluate(children);

        self.population.sort_by(|a, b| {
            a.score
                .mse
                .total_cmp(&b.score.mse)
                .then(a.complexity.cmp(&b.complexity))
        });
        let elites = self.config.elitism.min(self.population.len());
        next.extend(self.population.drain(..elites));
        self.population = next;

        let previous = self.best_mse;
        let current = self.population_best_mse();
        self.bandit.observe_reward(operator, improvement(previous, current));
        if current < previous {
            self.best_mse = current;
            self.stagnation_count = 0;
        } else {
            self.stagnation_count += 1;
        }
        self.generation += 1;
        (operator, rejected)
    }

    fn record(&mut self, operator: Option<GeneticOperator>, rejected: usize, bred: usize) {
        let mut errors: Vec<f64> = self.population.iter().map(|i| i.score.mse).collect();
        self.history.best_mse.push(self.best_mse);
        self.history.median_mse.push(median(&mut errors));
        self.history.front_size.push(self.archive.len());
        self.history
            .rejection_rate
            .push(if bred == 0 { 0.0 } else { rejected as f64 / bred as f64 });

        let best = self
            .population
            .iter()
            .min_by(|a, b| a.score.mse.total_cmp(&b.score.mse));
        let report = GenerationReport {
            sub_search: self.index,
            generation: self.generation,
            best_mse: self.best_mse,
            best_r2: best.map_or(f64::NEG_INFINITY, |i| i.score.r2),
            best_expression: best
                .map(|i| i.program.to_string())
                .unwrap_or_default(),
            pareto_front_size: self.archive.len(),
            operator,
            rejected,
        };
        self.log.debug(format_args!(
            "generation {}: best mse {:.6e}, front {}, rejected {rejected}/{bred}",
            report.generation, report.best_mse, report.pareto_front_size
        ));
        if let Some(progress) = &self.progress {
            progress(&report);
        }
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Some(StopReason::DeadlineExceeded);
        }
        if self.generation >= self.config.max_generations {
            return Some(StopReason::MaxGenerations);
        }
        if let Some(target) = self.config.target_mse
            && self.best_mse <= target
        {
            return Some(StopReason::TargetReached);
        }
        if let Some(limit) = self.config.stagnation_limit
            && self.stagnation_count >= limit
        {
            return Some(StopReason::Stagnation);
        }
        None
    }

    /// Run until a stop condition holds. The archive is valid at every
    /// generation boundary, so a cancelled run still returns its best front.
    pub fn run(mut self) -> SubSearchResult {
        self.log.info(format_args!(
            "starting: population {}, {} generations max",
            self.config.population_size, self.config.max_generations
        ));

        let rejected = self.initialize();
        self.record(None, rejected, self.config.population_size);

        let offspring = self.config.population_size - self.config.elitism;
        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }
            let (operator, rejected) = self.step_generation();
            self.record(Some(operator), rejected, offspring);
        };

        self.log.info(format_args!(
            "stopped after {} generations ({stop_reason:?}): best mse {:.6e}, front {}, {} evaluations",
            self.generation,
            self.best_mse,
            self.archive.len(),
            self.evaluations
        ));
        for (check, count) in self.cascade.rejection_counts() {
            self.log.debug(format_args!("{check} screen rejected {count}"));
        }

        SubSearchResult {
            index: self.index,
            seed: self.seed,
            archive: self.archive,
            generations: self.generation,
            evaluations: self.evaluations,
            stop_reason,
            history: self.history,
        }
    }
}

impl fmt::Debug for SubSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubSearch")
            .field("index", &self.index)
            .field("seed", &self.seed)
            .field("engine", &self.engine.name())
            .field("generation", &self.generation)
            .field("best_mse", &self.best_mse)
            .field("front", &self.archive.len())
            .finish()
    }
}
