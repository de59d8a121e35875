//! Random program generation and variation operators.
//!
//! Provides the baseline [`RandomEngine`]: grow-style random trees in postfix
//! form, subtree crossover, point, subtree and hoist mutation.

use rand::prelude::*;

use crate::compute::{Instruction, Program};
use crate::schema::EngineConfig;

use super::bandit::GeneticOperator;
use super::search::{EngineContext, LogSink, SearchEngine};

const BINARY_OPS: [Instruction; 4] = [
    Instruction::Add,
    Instruction::Subtract,
    Instruction::Multiply,
    Instruction::Divide,
];

/// Probability that a grown interior node is cut short to a leaf.
const EARLY_LEAF_PROBABILITY: f64 = 0.3;

/// Random number generator wrapper for program operations.
pub struct ProgramRng {
    rng: StdRng,
    feature_count: usize,
    config: EngineConfig,
}

impl ProgramRng {
    /// Create from seed.
    pub fn new(seed: u64, feature_count: usize, config: EngineConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            feature_count,
            config,
        }
    }

    /// Generate a random well-formed program of depth at most `max_depth`.
    pub fn random_program(&mut self, max_depth: usize) -> Program {
        let mut out = Vec::new();
        self.grow(max_depth, &mut out);
        Program::new(out)
    }

    fn grow(&mut self, depth: usize, out: &mut Vec<Instruction>) {
        if depth <= 1 || self.rng.gen_bool(EARLY_LEAF_PROBABILITY) {
            let leaf = self.random_leaf();
            out.push(leaf);
            return;
        }

        // Sine gets one slot in five.
        let choice = self.rng.gen_range(0..BINARY_OPS.len() + 1);
        match BINARY_OPS.get(choice) {
            Some(op) => {
                self.grow(depth - 1, out);
                self.grow(depth - 1, out);
                out.push(*op);
            }
            None => {
                self.grow(depth - 1, out);
                out.push(Instruction::Sine);
            }
        }
    }

    fn random_leaf(&mut self) -> Instruction {
        if self.feature_count > 0 && self.rng.gen_bool(0.5) {
            Instruction::PushVariable(self.rng.gen_range(0..self.feature_count))
        } else {
            Instruction::PushConstant(self.uniform(self.config.constant_range))
        }
    }

    /// Uniform random in bounds.
    fn uniform(&mut self, bounds: (f64, f64)) -> f64 {
        if bounds.0 >= bounds.1 {
            return bounds.0;
        }
        self.rng.gen_range(bounds.0..=bounds.1)
    }

    /// Gaussian mutation: add noise to a constant.
    pub fn gaussian_mutate(&mut self, value: f64) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        value + noise * self.config.mutation_strength
    }

    /// Random subtree `(start, end)` of `program`, inclusive.
    fn random_subtree(&mut self, program: &Program) -> (usize, usize) {
        let end = self.rng.gen_range(0..program.len());
        let start = program.subtree_start(end).unwrap_or(end);
        (start, end)
    }

    /// Replace a random subtree of `receiver` with a random subtree of `donor`.
    pub fn crossover(&mut self, receiver: &Program, donor: &Program) -> Program {
        let a = receiver.instructions();
        let b = donor.instructions();
        if a.is_empty() || b.is_empty() {
            return receiver.clone();
        }
        let (s, e) = self.random_subtree(receiver);
        let (ds, de) = self.random_subtree(donor);

        let mut child = Vec::with_capacity(a.len() - (e - s + 1) + (de - ds + 1));
        child.extend_from_slice(&a[..s]);
        child.extend_from_slice(&b[ds..=de]);
        child.extend_from_slice(&a[e + 1..]);
        Program::new(child)
    }

    /// Change one instruction in place, keeping its arity.
    pub fn point_mutation(&mut self, program: &Program) -> Program {
        let mut child = program.instructions().to_vec();
        if child.is_empty() {
            return program.clone();
        }
        let at = self.rng.gen_range(0..child.len());
        child[at] = match child[at] {
            Instruction::PushConstant(v) if self.rng.gen_bool(0.7) => {
                Instruction::PushConstant(self.gaussian_mutate(v))
            }
            Instruction::PushConstant(_) | Instruction::PushVariable(_) => self.random_leaf(),
            Instruction::Sine => Instruction::Sine,
            _ => BINARY_OPS[self.rng.gen_range(0..BINARY_OPS.len())],
        };
        Program::new(child)
    }

    /// Replace a random subtree with a freshly grown one.
    pub fn subtree_mutation(&mut self, program: &Program) -> Program {
        let a = program.instructions();
        if a.is_empty() {
            return self.random_program(self.config.max_depth);
        }
        let (s, e) = self.random_subtree(program);
        let mut fresh = Vec::new();
        self.grow((self.config.max_depth / 2).max(1), &mut fresh);

        let mut child = Vec::with_capacity(a.len() + fresh.len());
        child.extend_from_slice(&a[..s]);
        child.extend(fresh);
        child.extend_from_slice(&a[e + 1..]);
        Program::new(child)
    }

    /// Replace the program with one of its own subtrees.
    pub fn hoist_mutation(&mut self, program: &Program) -> Program {
        let a = program.instructions();
        if a.is_empty() {
            return program.clone();
        }
        let (s, e) = self.random_subtree(program);
        Program::new(a[s..=e].to_vec())
    }
}

/// Baseline engine: random initial programs and untargeted variation.
pub struct RandomEngine {
    rng: ProgramRng,
    config: EngineConfig,
    log: LogSink,
}

impl RandomEngine {
    pub fn new(feature_count: usize, config: EngineConfig, seed: u64, log: LogSink) -> Self {
        Self {
            rng: ProgramRng::new(seed, feature_count, config),
            config,
            log,
        }
    }

    /// Engine factory entry point.
    pub fn from_context(context: EngineContext) -> Box<dyn SearchEngine> {
        context.log.debug(format_args!(
            "random engine over {} features, seed {}",
            context.feature_count, context.seed
        ));
        Box::new(Self::new(
            context.feature_count,
            context.config,
            context.seed,
            context.log,
        ))
    }
}

impl SearchEngine for RandomEngine {
    fn name(&self) -> &'static str {
        "random"
    }

    fn initial_population(&mut self, size: usize) -> Vec<Program> {
        // Ramped depths give a spread of sizes.
        (0..size)
            .map(|i| self.rng.random_program(1 + i % self.config.max_depth.max(1)))
            .collect()
    }

    fn breed(&mut self, operator: GeneticOperator, parents: &[Program]) -> Program {
        let Some(first) = parents.first() else {
            return self.rng.random_program(self.config.max_depth);
        };
        let child = match operator {
            GeneticOperator::Crossover => {
                let donor = parents.get(1).unwrap_or(first);
                self.rng.crossover(first, donor)
            }
            GeneticOperator::PointMutation => self.rng.point_mutation(first),
            GeneticOperator::SubtreeMutation => self.rng.subtree_mutation(first),
            GeneticOperator::HoistMutation => self.rng.hoist_mutation(first),
        };

        if child.len() > self.config.max_length {
            self.log.trace(format_args!(
                "{operator} offspring of length {} over limit, keeping parent",
                child.len()
            ));
            return first.clone();
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng(seed: u64) -> ProgramRng {
        ProgramRng::new(seed, 3, EngineConfig::default())
    }

    #[test]
    fn test_random_program() {
        let mut rng = rng(42);
        for depth in 1..6 {
            let program = rng.random_program(depth);
            assert!(program.validate(Some(3)).is_ok(), "{program:?}");
        }
        // Depth 1 is a single leaf.
        assert_eq!(rng.random_program(1).len(), 1);
    }

    #[test]
    fn test_operators_preserve_well_formedness() {
        let mut rng = rng(7);
        for _ in 0..200 {
            let a = rng.random_program(5);
            let b = rng.random_program(5);
            for child in [
                rng.crossover(&a, &b),
                rng.point_mutation(&a),
                rng.subtree_mutation(&a),
                rng.hoist_mutation(&a),
            ] {
                assert!(child.validate(Some(3)).is_ok(), "{a} / {b} -> {child:?}");
            }
        }
    }

    #[test]
    fn test_hoist_shrinks_or_keeps() {
        let mut rng = rng(3);
        for _ in 0..50 {
            let program = rng.random_program(5);
            assert!(rng.hoist_mutation(&program).len() <= program.len());
        }
    }

    #[test]
    fn test_point_mutation_keeps_length() {
        let mut rng = rng(11);
        let program = rng.random_program(4);
        assert_eq!(rng.point_mutation(&program).len(), program.len());
    }

    #[test]
    fn test_engine_respects_length_limit() {
        let config = EngineConfig {
            max_length: 3,
            ..Default::default()
        };
        let mut engine = RandomEngine::new(2, config, 5, LogSink::default());
        let parent = Program::new(vec![Instruction::PushVariable(0)]);
        for _ in 0..50 {
            let child =
                engine.breed(GeneticOperator::SubtreeMutation, std::slice::from_ref(&parent));
            assert!(child.len() <= 3);
        }
    }

    #[test]
    fn test_seeded_determinism() {
        let mut a = RandomEngine::new(2, EngineConfig::default(), 9, LogSink::default());
        let mut b = RandomEngine::new(2, EngineConfig::default(), 9, LogSink::default());
        assert_eq!(a.initial_population(10), b.initial_population(10));
    }
}
