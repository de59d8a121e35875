//! Stack-machine evaluation of programs over datasets.
//!
//! The hot path walks the instruction list once per row using a single
//! stack buffer that is sized once per call and reused for every row.

use rayon::prelude::*;

use super::{Dataset, Instruction, Program, ProgramError};

/// Denominators with magnitude at or below this value make `Divide` yield `1.0`.
pub const PROTECTED_DIVISION_EPSILON: f64 = 1e-9;

/// Protected division: near-zero denominators produce the sentinel `1.0`.
#[inline(always)]
pub fn protected_div(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() <= PROTECTED_DIVISION_EPSILON {
        1.0
    } else {
        numerator / denominator
    }
}

/// Evaluates programs against a dataset, one output per row.
pub trait Evaluator: Send {
    /// Display name of the evaluation backend.
    fn name(&self) -> &'static str;

    /// Evaluate `program` over every row of `data`, writing into `out`.
    ///
    /// `out` must hold at least `data.rows()` values.
    fn evaluate_into(&mut self, program: &Program, data: &Dataset, out: &mut [f64]);

    /// Evaluate `program` over every row of `data`.
    fn evaluate(&mut self, program: &Program, data: &Dataset) -> Vec<f64> {
        let mut out = vec![0.0; data.rows()];
        self.evaluate_into(program, data, &mut out);
        out
    }
}

/// Scalar stack evaluator with a reusable value stack.
///
/// Well-formed programs are assumed. A malformed program panics on a slice
/// bounds check rather than reading out of bounds; use
/// [`StackEvaluator::evaluate_checked`] when programs are untrusted.
#[derive(Debug, Default)]
pub struct StackEvaluator {
    stack: Vec<f64>,
}

impl StackEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the program first, then evaluate. Never panics on malformed input.
    pub fn evaluate_checked(
        &mut self,
        program: &Program,
        data: &Dataset,
    ) -> Result<Vec<f64>, ProgramError> {
        program.validate(Some(data.feature_count()))?;
        Ok(self.evaluate(program, data))
    }

    /// Evaluate a single row. Used by tests and small callers.
    pub fn evaluate_row(&mut self, program: &Program, data: &Dataset, row: usize) -> f64 {
        self.prepare(program);
        run_row(program.instructions(), &mut self.stack, data, row)
    }

    #[inline]
    fn prepare(&mut self, program: &Program) {
        // Instruction count bounds the stack depth of any well-formed program.
        let needed = program.len().max(1);
        if self.stack.len() < needed {
            self.stack.resize(needed, 0.0);
        }
    }
}

impl Evaluator for StackEvaluator {
    fn name(&self) -> &'static str {
        "scalar stack"
    }

    fn evaluate_into(&mut self, program: &Program, data: &Dataset, out: &mut [f64]) {
        debug_assert!(
            program.validate(Some(data.feature_count())).is_ok(),
            "malformed program: {program:?}"
        );
        self.prepare(program);

        let instructions = program.instructions();
        let rows = data.rows();
        for (row, slot) in out.iter_mut().take(rows).enumerate() {
            *slot = run_row(instructions, &mut self.stack, data, row);
        }
    }
}

#[inline]
fn run_row(instructions: &[Instruction], stack: &mut [f64], data: &Dataset, row: usize) -> f64 {
    let mut sp = 0usize;

    for inst in instructions {
        match *inst {
            Instruction::PushConstant(v) => {
                stack[sp] = v;
                sp += 1;
            }
            Instruction::PushVariable(i) => {
                stack[sp] = data.feature(row, i);
                sp += 1;
            }
            Instruction::Add => {
                sp -= 1;
                stack[sp - 1] += stack[sp];
            }
            Instruction::Subtract => {
                sp -= 1;
                stack[sp - 1] -= stack[sp];
            }
            Instruction::Multiply => {
                sp -= 1;
                stack[sp - 1] *= stack[sp];
            }
            Instruction::Divide => {
                sp -= 1;
                stack[sp - 1] = protected_div(stack[sp - 1], stack[sp]);
            }
            Instruction::Sine => {
                stack[sp - 1] = stack[sp - 1].sin();
            }
        }
    }

    stack[sp - 1]
}

/// Evaluates many programs in parallel, one stack buffer per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchEvaluator;

impl BatchEvaluator {
    /// Evaluate every program over `data`; result `i` belongs to `programs[i]`.
    pub fn evaluate_batch(&self, programs: &[Program], data: &Dataset) -> Vec<Vec<f64>> {
        programs
            .par_iter()
            .map_init(StackEvaluator::new, |evaluator, program| {
                evaluator.evaluate(program, data)
            })
            .collect()
    }
}
