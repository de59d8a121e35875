//! Tiered screening: cheap checks run before full evaluation.

use crate::schema::{ConfigError, ScreeningConfig};

use super::evolution::mean_squared_error;
use super::{Dataset, DimensionalCheck, Evaluator, Instruction, IntervalCheck, Program};

/// Result of a single screening check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub passed: bool,
    /// Cheap fitness estimate (lower is better), when the check produces one.
    pub estimated_fitness: Option<f64>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            estimated_fitness: None,
        }
    }

    pub fn pass_with_estimate(estimate: f64) -> Self {
        Self {
            passed: true,
            estimated_fitness: Some(estimate),
        }
    }

    pub fn fail() -> Self {
        Self {
            passed: false,
            estimated_fitness: Some(f64::INFINITY),
        }
    }
}

/// A cheap validity or quality check applied to a candidate program.
///
/// Checks may keep internal caches, hence `&mut self`. Each sub-search owns
/// its own instances.
pub trait TieredCheck: Send {
    fn name(&self) -> &'static str;

    fn check(
        &mut self,
        program: &Program,
        evaluator: &mut dyn Evaluator,
        data: &Dataset,
    ) -> CheckResult;
}

/// Structural check that limits how deeply sines nest.
///
/// Depth counts the sines on the deepest root-to-leaf path, so with a limit of
/// one both `sin(sin(x0))` and `sin(x0 + sin(x1))` are rejected while
/// `sin(x0) * sin(x1)` passes. Malformed programs are rejected.
#[derive(Debug, Clone)]
pub struct GrammarCheck {
    max_sine_depth: usize,
    depths: Vec<usize>,
}

impl GrammarCheck {
    pub const DEFAULT_MAX_SINE_DEPTH: usize = 1;

    pub fn new(max_sine_depth: usize) -> Self {
        Self {
            max_sine_depth,
            depths: Vec::new(),
        }
    }

    pub fn accepts(&mut self, program: &Program) -> bool {
        self.depths.clear();
        for inst in program.instructions() {
            let depth = match inst {
                Instruction::PushConstant(_) | Instruction::PushVariable(_) => 0,
                Instruction::Sine => match self.depths.pop() {
                    Some(arg) => arg + 1,
                    None => return false,
                },
                _ => match (self.depths.pop(), self.depths.pop()) {
                    (Some(rhs), Some(lhs)) => lhs.max(rhs),
                    _ => return false,
                },
            };
            if depth > self.max_sine_depth {
                return false;
            }
            self.depths.push(depth);
        }
        self.depths.len() == 1
    }
}

impl Default for GrammarCheck {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_SINE_DEPTH)
    }
}

impl TieredCheck for GrammarCheck {
    fn name(&self) -> &'static str {
        "grammar"
    }

    fn check(&mut self, program: &Program, _: &mut dyn Evaluator, _: &Dataset) -> CheckResult {
        if self.accepts(program) {
            CheckResult::pass()
        } else {
            CheckResult::fail()
        }
    }
}

/// Evaluates the program on a small fixed random sample of rows and rejects
/// it when the sample MSE is `NaN` or above a threshold.
///
/// The sample is drawn once per dataset row count and reused.
#[derive(Debug)]
pub struct SubsetCheck {
    ratio: f64,
    threshold: f64,
    seed: u64,
    sample: Option<(usize, Dataset, Vec<f64>)>,
    predictions: Vec<f64>,
}

impl SubsetCheck {
    pub const DEFAULT_RATIO: f64 = 0.05;
    pub const DEFAULT_THRESHOLD: f64 = 1000.0;
    pub const DEFAULT_SEED: u64 = 42;

    pub fn new(ratio: f64, threshold: f64, seed: u64) -> Result<Self, ConfigError> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::InvalidSampleRatio(ratio));
        }
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        Ok(Self {
            ratio,
            threshold,
            seed,
            sample: None,
            predictions: Vec::new(),
        })
    }

    /// Cached sample and its targets, refreshed when the row count changes.
    fn sample_for(&mut self, data: &Dataset) -> Option<(&Dataset, &[f64])> {
        let rows = data.rows();
        let stale = !matches!(&self.sample, Some((cached_rows, _, _)) if *cached_rows == rows);
        if stale {
            match data.bootstrap_sample(self.ratio, self.seed) {
                Ok(sample) => {
                    log::trace!("drew {} screening rows from {rows}", sample.rows());
                    let targets = sample.targets().collect();
                    self.sample = Some((rows, sample, targets));
                }
                Err(err) => {
                    log::warn!("subset screening disabled: {err}");
                    self.sample = None;
                }
            }
        }
        self.sample
            .as_ref()
            .map(|(_, sample, targets)| (sample, targets.as_slice()))
    }
}

impl Default for SubsetCheck {
    fn default() -> Self {
        Self {
            ratio: Self::DEFAULT_RATIO,
            threshold: Self::DEFAULT_THRESHOLD,
            seed: Self::DEFAULT_SEED,
            sample: None,
            predictions: Vec::new(),
        }
    }
}

impl TieredCheck for SubsetCheck {
    fn name(&self) -> &'static str {
        "subset"
    }

    fn check(
        &mut self,
        program: &Program,
        evaluator: &mut dyn Evaluator,
        data: &Dataset,
    ) -> CheckResult {
        let threshold = self.threshold;
        let mut predictions = std::mem::take(&mut self.predictions);

        let result = match self.sample_for(data) {
            Some((sample, targets)) => {
                predictions.resize(sample.rows(), 0.0);
                evaluator.evaluate_into(program, sample, &mut predictions);
                let mse = mean_squared_error(&predictions, targets);
                if mse.is_nan() || mse > threshold {
                    CheckResult::fail()
                } else {
                    CheckResult::pass_with_estimate(mse)
                }
            }
            None => CheckResult::pass(),
        };

        self.predictions = predictions;
        result
    }
}

/// Outcome of running the whole cascade on one program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenOutcome {
    pub passed: bool,
    /// `+inf` on rejection; otherwise the last check estimate, or `0.0` if none.
    pub estimated_fitness: f64,
}

/// Ordered list of checks that short-circuits on the first failure.
#[derive(Default)]
pub struct ScreeningCascade {
    checks: Vec<Box<dyn TieredCheck>>,
    screened: u64,
    rejections: Vec<u64>,
}

impl ScreeningCascade {
    /// Empty cascade: every program passes with estimate `0.0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the cascade described by `config`, in the order grammar,
    /// dimensional, interval, subset sample.
    pub fn from_config(config: &ScreeningConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut cascade = Self::new();

        if let Some(depth) = config.max_sine_depth {
            cascade.push(GrammarCheck::new(depth));
        }

        if let Some(dimensional) = &config.dimensional {
            cascade.push(DimensionalCheck::new(
                dimensional.features.clone(),
                dimensional.target,
            ));
        }
        if config.interval {
            cascade.push(IntervalCheck::new());
        }
        if config.subset {
            cascade.push(SubsetCheck::new(
                config.sample_ratio,
                config.sample_threshold,
                config.sample_seed,
            )?);
        }

        Ok(cascade)
    }

    /// Append a check to the end of the cascade.
    pub fn push(&mut self, check: impl TieredCheck + 'static) {
        self.checks.push(Box::new(check));
        self.rejections.push(0);
    }

    pub fn with_check(mut self, check: impl TieredCheck + 'static) -> Self {
        self.push(check);
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Names of the checks in cascade order.
    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run the checks in order, stopping at the first failure.
    pub fn screen(
        &mut self,
        program: &Program,
        evaluator: &mut dyn Evaluator,
        data: &Dataset,
    ) -> ScreenOutcome {
        self.screened += 1;
        let mut estimate = None;

        for (check, rejected) in self
            .checks
            .iter_mut()
            .zip(self.rejections.iter_mut())
        {
            let result = check.check(program, evaluator, data);
            if !result.passed {
                *rejected += 1;
                return ScreenOutcome {
                    passed: false,
                    estimated_fitness: f64::INFINITY,
                };
            }
            if result.estimated_fitness.is_some() {
                estimate = result.estimated_fitness;
            }
        }

        ScreenOutcome {
            passed: true,
            estimated_fitness: estimate.unwrap_or(0.0),
        }
    }

    /// Programs screened so far.
    pub fn screened(&self) -> u64 {
        self.screened
    }

    /// Rejection count per check, in cascade order.
    pub fn rejection_counts(&self) -> Vec<(&'static str, u64)> {
        self.checks
            .iter()
            .zip(&self.rejections)
            .map(|(check, count)| (check.name(), *count))
            .collect()
    }
}

impl std::fmt::Debug for ScreeningCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreeningCascade")
            .field("checks", &self.check_names())
            .field("screened", &self.screened)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::compute::{DimensionalType, Instruction::*, StackEvaluator};
    use crate::schema::DimensionalConfig;

    /// y = 2x over x in 1..=100.
    fn linear() -> Dataset {
        let rows: Vec<Vec<f64>> = (1..=100).map(|i| vec![i as f64]).collect();
        let target = (1..=100).map(|i| 2.0 * i as f64).collect();
        Dataset::from_rows(&rows, target).unwrap()
    }

    /// Records how often it ran and returns a fixed result.
    struct Fixed {
        result: CheckResult,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl TieredCheck for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn check(&mut self, _: &Program, _: &mut dyn Evaluator, _: &Dataset) -> CheckResult {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.result
        }
    }

    fn fixed(result: CheckResult) -> (Fixed, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        let calls = std::sync::Arc::default();
        (
            Fixed {
                result,
                calls: std::sync::Arc::clone(&calls),
            },
            calls,
        )
    }

    #[test]
    fn test_empty_cascade_passes_with_zero_estimate() {
        let outcome = ScreeningCascade::new().screen(
            &Program::new(vec![PushVariable(0)]),
            &mut StackEvaluator::new(),
            &linear(),
        );
        assert_eq!(
            outcome,
            ScreenOutcome {
                passed: true,
                estimated_fitness: 0.0
            }
        );
    }

    #[test]
    fn test_short_circuits_on_first_failure() {
        let (first, first_calls) = fixed(CheckResult::fail());
        let (second, second_calls) = fixed(CheckResult::pass());
        let mut cascade = ScreeningCascade::new().with_check(first).with_check(second);

        let outcome = cascade.screen(
            &Program::new(vec![PushVariable(0)]),
            &mut StackEvaluator::new(),
            &linear(),
        );
        assert!(!outcome.passed);
        assert_eq!(outcome.estimated_fitness, f64::INFINITY);
        assert_eq!(first_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(second_calls.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert_eq!(cascade.rejection_counts(), vec![("fixed", 1), ("fixed", 0)]);
    }

    #[test]
    fn test_last_estimate_wins() {
        let (a, _) = fixed(CheckResult::pass_with_estimate(5.0));
        let (b, _) = fixed(CheckResult::pass_with_estimate(3.0));
        let (c, _) = fixed(CheckResult::pass());
        let mut cascade = ScreeningCascade::new().with_check(a).with_check(b).with_check(c);
        let outcome = cascade.screen(
            &Program::new(vec![PushVariable(0)]),
            &mut StackEvaluator::new(),
            &linear(),
        );
        assert!(outcome.passed);
        assert_eq!(outcome.estimated_fitness, 3.0);
    }

    #[test]
    fn test_subset_check_uses_target() {
        let data = linear();
        let mut evaluator = StackEvaluator::new();
        let mut check = SubsetCheck::new(0.1, 1000.0, 42).unwrap();

        // Exact fit: MSE against the target is zero.
        let exact = Program::new(vec![PushConstant(2.0), PushVariable(0), Multiply]);
        let result = check.check(&exact, &mut evaluator, &data);
        assert!(result.passed);
        assert_eq!(result.estimated_fitness, Some(0.0));

        // Constant zero has a large error against y = 2x.
        let zero = Program::new(vec![PushConstant(0.0)]);
        let result = check.check(&zero, &mut evaluator, &data);
        assert!(!result.passed);
    }

    #[test]
    fn test_subset_check_rejects_nan() {
        let data = linear();
        let nan = Program::new(vec![PushConstant(f64::NAN)]);
        let result = SubsetCheck::default().check(&nan, &mut StackEvaluator::new(), &data);
        assert!(!result.passed);
    }

    #[test]
    fn test_subset_check_rejects_bad_config() {
        assert!(matches!(
            SubsetCheck::new(0.0, 1000.0, 42),
            Err(ConfigError::InvalidSampleRatio(_))
        ));
        assert!(matches!(
            SubsetCheck::new(1.5, 1000.0, 42),
            Err(ConfigError::InvalidSampleRatio(_))
        ));
        assert!(matches!(
            SubsetCheck::new(0.5, f64::NAN, 42),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_from_config_order() {
        let config = ScreeningConfig {
            dimensional: Some(DimensionalConfig {
                features: HashMap::from([(0, DimensionalType::length())]),
                target: DimensionalType::length(),
            }),
            max_sine_depth: Some(1),
            ..Default::default()
        };
        let cascade = ScreeningCascade::from_config(&config).unwrap();
        assert_eq!(
            cascade.check_names(),
            vec!["grammar", "dimensional", "interval", "subset"]
        );

        // No dimensional metadata: the check is not added at all.
        let cascade = ScreeningCascade::from_config(&ScreeningConfig::default()).unwrap();
        assert_eq!(cascade.check_names(), vec!["interval", "subset"]);
    }

    #[test]
    fn test_grammar_check_limits_nested_sines() {
        let mut check = GrammarCheck::default();
        let data = linear();
        let mut evaluator = StackEvaluator::new();

        let nested = Program::new(vec![PushVariable(0), Sine, Sine]);
        assert!(!check.check(&nested, &mut evaluator, &data).passed);

        // sin(x0 + sin(x0)): the inner sine sits below another one.
        let indirect = Program::new(vec![PushVariable(0), PushVariable(0), Sine, Add, Sine]);
        assert!(!check.accepts(&indirect));

        // sin(x0) * sin(x0): siblings, not nested.
        let siblings = Program::new(vec![PushVariable(0), Sine, PushVariable(0), Sine, Multiply]);
        let result = check.check(&siblings, &mut evaluator, &data);
        assert!(result.passed);
        assert_eq!(result.estimated_fitness, None);

        assert!(!check.accepts(&Program::new(vec![PushVariable(0), Add])));
        assert!(GrammarCheck::new(2).accepts(&nested));
        assert!(!GrammarCheck::new(0).accepts(&Program::new(vec![PushVariable(0), Sine])));
    }

    #[test]
    fn test_cascade_grammar_rejection_counted() {
        let config = ScreeningConfig {
            max_sine_depth: Some(1),
            ..ScreeningConfig::disabled()
        };
        let mut cascade = ScreeningCascade::from_config(&config).unwrap();
        let mut evaluator = StackEvaluator::new();
        let data = linear();

        let nested = Program::new(vec![PushVariable(0), Sine, Sine]);
        assert!(!cascade.screen(&nested, &mut evaluator, &data).passed);
        let single = Program::new(vec![PushVariable(0), Sine]);
        assert!(cascade.screen(&single, &mut evaluator, &data).passed);
        assert_eq!(cascade.rejection_counts(), vec![("grammar", 1)]);
    }

    #[test]
    fn test_cascade_rejects_unbounded_before_sampling() {
        let mut cascade = ScreeningCascade::from_config(&ScreeningConfig::default()).unwrap();
        let program = Program::new(vec![
            PushConstant(1.0),
            PushVariable(0),
            PushVariable(0),
            Subtract,
            Divide,
        ]);
        let outcome = cascade.screen(&program, &mut StackEvaluator::new(), &linear());
        assert!(!outcome.passed);
        assert_eq!(cascade.rejection_counts()[0], ("interval", 1));
        assert_eq!(cascade.screened(), 1);
    }
}
