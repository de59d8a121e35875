//! Postfix bytecode programs.
//!
//! A [`Program`] is an immutable sequence of [`Instruction`]s in postfix
//! (stack) order. Programs are produced by a search engine and consumed by
//! the evaluators, screens and optimizers in this crate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single stack-machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Push a literal constant.
    PushConstant(f64),
    /// Push the value of a feature column for the current row.
    PushVariable(usize),
    Add,
    Subtract,
    Multiply,
    /// Protected division (see [`PROTECTED_DIVISION_EPSILON`](super::PROTECTED_DIVISION_EPSILON)).
    Divide,
    Sine,
}

impl Instruction {
    /// Number of operands popped.
    #[inline]
    pub fn arity(&self) -> usize {
        match self {
            Self::PushConstant(_) | Self::PushVariable(_) => 0,
            Self::Sine => 1,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => 2,
        }
    }

    /// Net change in stack depth after executing this instruction.
    #[inline]
    pub fn stack_effect(&self) -> isize {
        1 - self.arity() as isize
    }

    /// Whether this instruction is a leaf (pushes without popping).
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.arity() == 0
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Sine => "sin",
            Self::PushConstant(_) | Self::PushVariable(_) => "",
        }
    }
}

/// Structural problems found by [`Program::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("Program is empty")]
    Empty,
    #[error("Stack underflow at instruction {position}: needs {needed} operand(s), found {available}")]
    StackUnderflow {
        position: usize,
        needed: usize,
        available: usize,
    },
    #[error("Program leaves {remaining} values on the stack, expected exactly 1")]
    UnbalancedStack { remaining: usize },
    #[error("Instruction {position} reads feature {feature} but only {feature_count} exist")]
    FeatureOutOfRange {
        position: usize,
        feature: usize,
        feature_count: usize,
    },
}

/// Immutable postfix program. Cloning shares the instruction storage.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Instruction>", into = "Vec<Instruction>")]
pub struct Program {
    instructions: Arc<[Instruction]>,
}

impl Program {
    /// Create a program from instructions.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// The instruction sequence.
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Validate stack discipline and, when `feature_count` is given, variable indices.
    pub fn validate(&self, feature_count: Option<usize>) -> Result<(), ProgramError> {
        if self.instructions.is_empty() {
            return Err(ProgramError::Empty);
        }

        let mut depth = 0usize;
        for (position, inst) in self.instructions.iter().enumerate() {
            let needed = inst.arity();
            if depth < needed {
                return Err(ProgramError::StackUnderflow {
                    position,
                    needed,
                    available: depth,
                });
            }
            if let (Instruction::PushVariable(feature), Some(count)) = (inst, feature_count)
                && *feature >= count
            {
                return Err(ProgramError::FeatureOutOfRange {
                    position,
                    feature: *feature,
                    feature_count: count,
                });
            }
            depth = depth - needed + 1;
        }

        if depth != 1 {
            return Err(ProgramError::UnbalancedStack { remaining: depth });
        }
        Ok(())
    }

    /// Maximum stack depth reached while executing. Bounded by `len()`.
    pub fn max_stack_depth(&self) -> usize {
        let mut depth = 0isize;
        let mut max = 0isize;
        for inst in self.instructions.iter() {
            depth += inst.stack_effect();
            max = max.max(depth);
        }
        max.max(0) as usize
    }

    /// Positions of all `PushConstant` instructions.
    pub fn constant_positions(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(i, inst)| matches!(inst, Instruction::PushConstant(_)).then_some(i))
            .collect()
    }

    /// Current values of all constants, in program order.
    pub fn constants(&self) -> Vec<f64> {
        self.instructions
            .iter()
            .filter_map(|inst| match inst {
                Instruction::PushConstant(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Copy of this program with constants replaced in program order.
    ///
    /// Extra values are ignored; missing values leave the constant unchanged.
    pub fn with_constants(&self, values: &[f64]) -> Self {
        let mut values = values.iter();
        let instructions: Vec<Instruction> = self
            .instructions
            .iter()
            .map(|inst| match inst {
                Instruction::PushConstant(old) => {
                    Instruction::PushConstant(values.next().copied().unwrap_or(*old))
                }
                other => *other,
            })
            .collect();
        Self::new(instructions)
    }

    /// Sorted, de-duplicated feature indices read by this program.
    pub fn variables(&self) -> Vec<usize> {
        let mut vars: Vec<usize> = self
            .instructions
            .iter()
            .filter_map(|inst| match inst {
                Instruction::PushVariable(i) => Some(*i),
                _ => None,
            })
            .collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    /// Start index of the subtree ending at `end` (inclusive range `start..=end`).
    ///
    /// Returns `None` if `end` is out of range or the prefix is malformed.
    pub fn subtree_start(&self, end: usize) -> Option<usize> {
        subtree_start(&self.instructions, end)
    }
}

/// Start of the postfix subtree ending at `end` within `instructions`.
fn subtree_start(instructions: &[Instruction], end: usize) -> Option<usize> {
    if end >= instructions.len() {
        return None;
    }
    let mut needed = 1usize;
    let mut i = end;
    loop {
        needed = needed - 1 + instructions[i].arity();
        if needed == 0 {
            return Some(i);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

impl From<Program> for Vec<Instruction> {
    fn from(program: Program) -> Self {
        program.instructions.to_vec()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("expression", &self.to_string())
            .field("len", &self.len())
            .finish()
    }
}

/// Infix rendering, e.g. `sin((x0 * x1))`. Malformed programs render as `<malformed>`.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack: Vec<String> = Vec::with_capacity(self.max_stack_depth());
        for inst in self.instructions.iter() {
            let rendered = match inst {
                Instruction::PushConstant(v) => format!("{v}"),
                Instruction::PushVariable(i) => format!("x{i}"),
                Instruction::Sine => match stack.pop() {
                    Some(arg) => format!("sin({arg})"),
                    None => return f.write_str("<malformed>"),
                },
                binary => match (stack.pop(), stack.pop()) {
                    (Some(rhs), Some(lhs)) => format!("({lhs} {} {rhs})", binary.symbol()),
                    _ => return f.write_str("<malformed>"),
                },
            };
            stack.push(rendered);
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(expr), true) => f.write_str(&expr),
            _ => f.write_str("<malformed>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Instruction::*;
    use super::*;

    #[test]
    fn test_validate_well_formed() {
        let program = Program::new(vec![PushVariable(0), PushVariable(1), Multiply, Sine]);
        assert!(program.validate(Some(2)).is_ok());
        assert_eq!(program.max_stack_depth(), 2);
    }

    #[test]
    fn test_validate_errors() {
        assert_eq!(Program::new(vec![]).validate(None), Err(ProgramError::Empty));

        let underflow = Program::new(vec![PushConstant(1.0), Add]);
        assert_eq!(
            underflow.validate(None),
            Err(ProgramError::StackUnderflow {
                position: 1,
                needed: 2,
                available: 1
            })
        );

        let unbalanced = Program::new(vec![PushConstant(1.0), PushConstant(2.0)]);
        assert_eq!(
            unbalanced.validate(None),
            Err(ProgramError::UnbalancedStack { remaining: 2 })
        );

        let out_of_range = Program::new(vec![PushVariable(3)]);
        assert!(matches!(
            out_of_range.validate(Some(2)),
            Err(ProgramError::FeatureOutOfRange { feature: 3, .. })
        ));
    }

    #[test]
    fn test_display() {
        let program = Program::new(vec![
            PushVariable(0),
            PushConstant(1.5),
            Add,
            PushVariable(1),
            Divide,
            Sine,
        ]);
        assert_eq!(program.to_string(), "sin(((x0 + 1.5) / x1))");
        assert_eq!(Program::new(vec![Add]).to_string(), "<malformed>");
    }

    #[test]
    fn test_constants_roundtrip() {
        let program = Program::new(vec![
            PushConstant(1.0),
            PushVariable(0),
            PushConstant(2.0),
            Multiply,
            Add,
        ]);
        assert_eq!(program.constant_positions(), vec![0, 2]);
        assert_eq!(program.constants(), vec![1.0, 2.0]);

        let updated = program.with_constants(&[5.0]);
        assert_eq!(updated.constants(), vec![5.0, 2.0]);
        // Original untouched.
        assert_eq!(program.constants(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_subtree_start() {
        // (x0 + 1) * sin(x1)
        let program = Program::new(vec![
            PushVariable(0),
            PushConstant(1.0),
            Add,
            PushVariable(1),
            Sine,
            Multiply,
        ]);
        assert_eq!(program.subtree_start(5), Some(0));
        assert_eq!(program.subtree_start(4), Some(3));
        assert_eq!(program.subtree_start(2), Some(0));
        assert_eq!(program.subtree_start(1), Some(1));
        assert_eq!(program.subtree_start(6), None);
    }

    #[test]
    fn test_variables_dedup() {
        let program = Program::new(vec![
            PushVariable(2),
            PushVariable(0),
            Add,
            PushVariable(2),
            Multiply,
        ]);
        assert_eq!(program.variables(), vec![0, 2]);
    }

    #[test]
    fn test_serde_as_instruction_list() {
        let program = Program::new(vec![PushVariable(0), Sine]);
        let json = serde_json::to_string(&program).unwrap();
        let parsed: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, program);
    }
}
