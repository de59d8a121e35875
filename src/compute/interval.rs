//! Interval arithmetic and interval-based program screening.

use super::{CheckResult, Dataset, Evaluator, Instruction, Program, TieredCheck};

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    /// The whole real line.
    pub const UNBOUNDED: Self = Self {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    #[inline]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Degenerate interval `[v, v]`.
    #[inline]
    pub const fn point(value: f64) -> Self {
        Self::new(value, value)
    }

    /// No `NaN` bound and `min <= max`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.min.is_nan() && !self.max.is_nan() && self.min <= self.max
    }

    /// Valid with both bounds finite.
    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.is_valid() && self.min.is_finite() && self.max.is_finite()
    }

    /// Whether zero lies within (or on the edge of) the interval.
    #[inline]
    pub fn contains_zero(&self) -> bool {
        self.min <= 0.0 && self.max >= 0.0
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.min + rhs.min, self.max + rhs.max)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.min - rhs.max, self.max - rhs.min)
    }

    pub fn mul(self, rhs: Self) -> Self {
        let corners = [
            self.min * rhs.min,
            self.min * rhs.max,
            self.max * rhs.min,
            self.max * rhs.max,
        ];
        // NaN corners (0 * inf) must surface as an invalid interval.
        if corners.iter().any(|c| c.is_nan()) {
            return Self::new(f64::NAN, f64::NAN);
        }
        let min = corners.iter().copied().fold(f64::INFINITY, f64::min);
        let max = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self::new(min, max)
    }

    /// Denominators touching zero give [`Interval::UNBOUNDED`].
    pub fn div(self, rhs: Self) -> Self {
        if rhs.contains_zero() {
            return Self::UNBOUNDED;
        }
        self.mul(Self::new(1.0 / rhs.max, 1.0 / rhs.min))
    }

    /// Always `[-1, 1]`.
    ///
    /// Tight bounds would need the periodic structure of sine; the loose bound
    /// is sufficient for screening.
    pub fn sin(self) -> Self {
        Self::new(-1.0, 1.0)
    }
}

/// Interval output bound of `program` given per-feature bounds.
///
/// Returns `None` as soon as any intermediate interval is invalid.
pub fn interval_bound(program: &Program, feature_bounds: &[Interval]) -> Option<Interval> {
    let mut stack: Vec<Interval> = Vec::with_capacity(program.len());

    for inst in program.instructions() {
        let value = match *inst {
            Instruction::PushConstant(v) => Interval::point(v),
            Instruction::PushVariable(i) => feature_bounds.get(i).copied()?,
            Instruction::Sine => stack.pop()?.sin(),
            binary => {
                let rhs = stack.pop()?;
                let lhs = stack.pop()?;
                match binary {
                    Instruction::Add => lhs.add(rhs),
                    Instruction::Subtract => lhs.sub(rhs),
                    Instruction::Multiply => lhs.mul(rhs),
                    _ => lhs.div(rhs),
                }
            }
        };

        if !value.is_valid() {
            return None;
        }
        stack.push(value);
    }

    stack.pop()
}

/// Rejects programs whose output range over the observed feature domain is
/// unbounded or invalid.
///
/// The feature bound table is computed on first use and recomputed only when
/// the dataset row count changes.
#[derive(Debug, Default)]
pub struct IntervalCheck {
    bounds: Option<(usize, Vec<Interval>)>,
}

impl IntervalCheck {
    pub fn new() -> Self {
        Self::default()
    }

    fn bounds_for(&mut self, data: &Dataset) -> &[Interval] {
        let rows = data.rows();
        let stale = !matches!(&self.bounds, Some((cached_rows, _)) if *cached_rows == rows);
        if stale {
            log::trace!("computing feature bounds for {rows} rows");
            self.bounds = Some((rows, data.feature_bounds()));
        }
        match &self.bounds {
            Some((_, bounds)) => bounds,
            None => &[],
        }
    }
}

impl TieredCheck for IntervalCheck {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn check(
        &mut self,
        program: &Program,
        _evaluator: &mut dyn Evaluator,
        data: &Dataset,
    ) -> CheckResult {
        let bounds = self.bounds_for(data);
        match interval_bound(program, bounds) {
            Some(output) if output.is_bounded() => CheckResult::pass(),
            _ => CheckResult::fail(),
        }
    }
}
