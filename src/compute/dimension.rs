//! Physical-dimension analysis of programs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CheckResult, Dataset, Evaluator, Instruction, Program, TieredCheck};

/// Number of base dimensions tracked: length, mass, time.
pub const BASE_DIMENSIONS: usize = 3;

/// Exponents over the base dimensions, or an unknown dimension.
///
/// `Unknown` is absorbing: any operation involving it yields `Unknown` and
/// never causes a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionalType {
    Known([i8; BASE_DIMENSIONS]),
    Unknown,
}

impl DimensionalType {
    pub const DIMENSIONLESS: Self = Self::Known([0; BASE_DIMENSIONS]);

    pub const fn new(length: i8, mass: i8, time: i8) -> Self {
        Self::Known([length, mass, time])
    }

    pub const fn length() -> Self {
        Self::new(1, 0, 0)
    }

    pub const fn mass() -> Self {
        Self::new(0, 1, 0)
    }

    pub const fn time() -> Self {
        Self::new(0, 0, 1)
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Dimension of a product: exponents add. Exponents that leave the `i8`
    /// range make the result `Unknown`.
    pub fn mul(self, rhs: Self) -> Self {
        self.combine(rhs, i8::checked_add)
    }

    /// Dimension of a quotient: exponents subtract.
    pub fn div(self, rhs: Self) -> Self {
        self.combine(rhs, i8::checked_sub)
    }

    fn combine(self, rhs: Self, op: fn(i8, i8) -> Option<i8>) -> Self {
        match (self, rhs) {
            (Self::Known(a), Self::Known(b)) => {
                let mut out = [0i8; BASE_DIMENSIONS];
                for (slot, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
                    match op(*x, *y) {
                        Some(exponent) => *slot = exponent,
                        None => return Self::Unknown,
                    }
                }
                Self::Known(out)
            }
            _ => Self::Unknown,
        }
    }
}

impl Default for DimensionalType {
    fn default() -> Self {
        Self::DIMENSIONLESS
    }
}

impl fmt::Display for DimensionalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("?"),
            Self::Known(exponents) => {
                let [l, m, t] = *exponents;
                write!(f, "L^{l} M^{m} T^{t}")
            }
        }
    }
}

/// Infer the output dimension of `program`.
///
/// Returns `None` when an addition, subtraction or sine sees incompatible
/// known dimensions, or the program is malformed.
pub fn infer_dimension(
    program: &Program,
    features: &HashMap<usize, DimensionalType>,
) -> Option<DimensionalType> {
    use DimensionalType::Unknown;

    let mut stack: Vec<DimensionalType> = Vec::with_capacity(program.len());
    for inst in program.instructions() {
        let dim = match *inst {
            Instruction::PushConstant(_) => DimensionalType::DIMENSIONLESS,
            Instruction::PushVariable(i) => features.get(&i).copied().unwrap_or(Unknown),
            Instruction::Sine => {
                let arg = stack.pop()?;
                if !(arg.is_dimensionless() || arg.is_unknown()) {
                    return None;
                }
                DimensionalType::DIMENSIONLESS
            }
            binary => {
                let rhs = stack.pop()?;
                let lhs = stack.pop()?;
                match binary {
                    Instruction::Add | Instruction::Subtract => match (lhs, rhs) {
                        (Unknown, _) | (_, Unknown) => Unknown,
                        (a, b) if a == b => a,
                        _ => return None,
                    },
                    Instruction::Multiply => lhs.mul(rhs),
                    _ => lhs.div(rhs),
                }
            }
        };
        stack.push(dim);
    }
    stack.pop()
}

/// Rejects programs that mix incompatible physical units or whose output
/// dimension differs from the target's.
#[derive(Debug, Clone)]
pub struct DimensionalCheck {
    features: HashMap<usize, DimensionalType>,
    target: DimensionalType,
}

impl DimensionalCheck {
    /// Features missing from `features` are treated as `Unknown`.
    pub fn new(features: HashMap<usize, DimensionalType>, target: DimensionalType) -> Self {
        Self { features, target }
    }

    pub fn target(&self) -> DimensionalType {
        self.target
    }

    /// Whether `program` is dimensionally consistent with the target.
    pub fn accepts(&self, program: &Program) -> bool {
        match infer_dimension(program, &self.features) {
            Some(DimensionalType::Unknown) => true,
            Some(dim) => dim == self.target,
            None => false,
        }
    }
}

impl TieredCheck for DimensionalCheck {
    fn name(&self) -> &'static str {
        "dimensional"
    }

    fn check(
        &mut self,
        program: &Program,
        _evaluator: &mut dyn Evaluator,
        _data: &Dataset,
    ) -> CheckResult {
        if self.accepts(program) {
            CheckResult::pass()
        } else {
            CheckResult::fail()
        }
    }
}
