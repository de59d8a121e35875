//! Structural complexity scores for programs.

use serde::{Deserialize, Serialize};

use super::{Instruction, Program};

/// Scores the structural complexity of a program. Higher is more complex.
pub trait ComplexityMetric: Send + Sync {
    fn complexity(&self, program: &Program) -> usize;
}

/// Number of instructions (equivalently, expression tree nodes).
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeCount;

impl ComplexityMetric for NodeCount {
    fn complexity(&self, program: &Program) -> usize {
        program.len()
    }
}

/// Node count plus a per-operator penalty that grows with non-linearity.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorPenalty;

impl OperatorPenalty {
    pub fn penalty(instruction: &Instruction) -> usize {
        match instruction {
            Instruction::PushConstant(_) | Instruction::PushVariable(_) => 0,
            Instruction::Add | Instruction::Subtract => 1,
            Instruction::Multiply => 2,
            Instruction::Divide => 3,
            Instruction::Sine => 5,
        }
    }
}

impl ComplexityMetric for OperatorPenalty {
    fn complexity(&self, program: &Program) -> usize {
        program.len()
            + program
                .instructions()
                .iter()
                .map(Self::penalty)
                .sum::<usize>()
    }
}

/// Serializable choice of complexity metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityKind {
    #[default]
    NodeCount,
    OperatorPenalty,
}

impl ComplexityKind {
    pub fn metric(self) -> Box<dyn ComplexityMetric> {
        match self {
            Self::NodeCount => Box::new(NodeCount),
            Self::OperatorPenalty => Box::new(OperatorPenalty),
        }
    }
}
