//! Adaptive choice of genetic operators.

use std::collections::BTreeMap;
use std::fmt;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{BanditConfig, ConfigError};

/// Variation operators a search engine can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeneticOperator {
    Crossover,
    PointMutation,
    SubtreeMutation,
    HoistMutation,
}

impl GeneticOperator {
    /// All operators in enumeration order.
    pub const ALL: [Self; 4] = [
        Self::Crossover,
        Self::PointMutation,
        Self::SubtreeMutation,
        Self::HoistMutation,
    ];

    /// Number of parents the operator consumes.
    pub fn parents(self) -> usize {
        match self {
            Self::Crossover => 2,
            _ => 1,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for GeneticOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Crossover => "crossover",
            Self::PointMutation => "point mutation",
            Self::SubtreeMutation => "subtree mutation",
            Self::HoistMutation => "hoist mutation",
        };
        f.write_str(name)
    }
}

/// Learns which operator produces the most improvement.
pub trait OperatorBandit: Send {
    fn select_operator(&mut self) -> GeneticOperator;

    fn observe_reward(&mut self, operator: GeneticOperator, reward: f64);

    /// Current preference distribution over operators.
    fn probabilities(&self) -> BTreeMap<GeneticOperator, f64>;
}

/// Epsilon-greedy bandit with optimistic initial values and sample-average
/// updates.
#[derive(Debug)]
pub struct EpsilonGreedyBandit {
    epsilon: f64,
    q: [f64; 4],
    counts: [u64; 4],
    rng: StdRng,
}

impl EpsilonGreedyBandit {
    pub const INITIAL_VALUE: f64 = 1.0;

    pub fn new(epsilon: f64, seed: u64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(ConfigError::InvalidEpsilon(epsilon));
        }
        Ok(Self {
            epsilon,
            q: [Self::INITIAL_VALUE; 4],
            counts: [0; 4],
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn from_config(config: &BanditConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::new(config.epsilon, seed)
    }

    /// Estimated value of `operator`.
    pub fn value(&self, operator: GeneticOperator) -> f64 {
        self.q[operator.index()]
    }

    /// Rewards observed for `operator`.
    pub fn count(&self, operator: GeneticOperator) -> u64 {
        self.counts[operator.index()]
    }

    /// Operator with the highest value; the first in enumeration order on ties.
    fn greedy(&self) -> GeneticOperator {
        let mut best = GeneticOperator::ALL[0];
        for op in GeneticOperator::ALL.into_iter().skip(1) {
            if self.q[op.index()] > self.q[best.index()] {
                best = op;
            }
        }
        best
    }
}

impl OperatorBandit for EpsilonGreedyBandit {
    fn select_operator(&mut self) -> GeneticOperator {
        if self.rng.r#gen::<f64>() < self.epsilon {
            GeneticOperator::ALL[self.rng.gen_range(0..GeneticOperator::ALL.len())]
        } else {
            self.greedy()
        }
    }

    /// Non-finite rewards are ignored.
    fn observe_reward(&mut self, operator: GeneticOperator, reward: f64) {
        if !reward.is_finite() {
            return;
        }
        let i = operator.index();
        self.counts[i] += 1;
        self.q[i] += (reward - self.q[i]) / self.counts[i] as f64;
    }

    fn probabilities(&self) -> BTreeMap<GeneticOperator, f64> {
        let mut sum: f64 = self.q.iter().map(|q| q.max(0.0)).sum();
        if sum <= 0.0 {
            sum = 1e-9;
        }
        GeneticOperator::ALL
            .into_iter()
            .map(|op| (op, self.q[op.index()].max(0.0) / sum))
            .collect()
    }
}
