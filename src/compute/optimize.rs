//! Numerical tuning of program constants.

use super::evolution::mean_squared_error;
use super::{Dataset, Evaluator, Program, StackEvaluator};

/// Constant optimization failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizeError {
    #[error("Normal equations are ill-conditioned: pivot {pivot:e} below threshold {threshold:e}")]
    IllConditioned { pivot: f64, threshold: f64 },
}

/// Tunes the constants of a program to reduce its error on a dataset.
///
/// Implementations never modify `program`; an improved copy is returned.
pub trait ConstantOptimizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(Some(p))` when `p` has strictly lower MSE than `program`,
    /// `Ok(None)` when no improvement was found.
    fn optimize(&self, program: &Program, data: &Dataset) -> Result<Option<Program>, OptimizeError>;
}

/// Damped Gauss-Newton least squares with a forward-difference Jacobian.
#[derive(Debug, Clone)]
pub struct GaussNewtonOptimizer {
    /// Outer iterations.
    pub max_iterations: usize,
    /// Levenberg damping added to the diagonal of the normal equations.
    pub damping: f64,
    /// Relative finite-difference step.
    pub step: f64,
    /// Pivots smaller than this abort with [`OptimizeError::IllConditioned`].
    pub condition_threshold: f64,
}

impl Default for GaussNewtonOptimizer {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            damping: 1e-6,
            step: 1e-5,
            condition_threshold: 1e-12,
        }
    }
}

impl GaussNewtonOptimizer {
    fn residuals(
        evaluator: &mut StackEvaluator,
        program: &Program,
        data: &Dataset,
        targets: &[f64],
        out: &mut [f64],
    ) {
        evaluator.evaluate_into(program, data, out);
        for (r, y) in out.iter_mut().zip(targets) {
            *r -= y;
        }
    }
}

impl ConstantOptimizer for GaussNewtonOptimizer {
    fn name(&self) -> &'static str {
        "gauss-newton"
    }

    fn optimize(
        &self,
        program: &Program,
        data: &Dataset,
    ) -> Result<Option<Program>, OptimizeError> {
        let mut constants = program.constants();
        let k = constants.len();
        if k == 0 {
            return Ok(None);
        }

        let targets: Vec<f64> = data.targets().collect();
        let n = targets.len();
        let mut evaluator = StackEvaluator::new();
        let mut predictions = vec![0.0; n];

        evaluator.evaluate_into(program, data, &mut predictions);
        let initial = mean_squared_error(&predictions, &targets);
        if !initial.is_finite() {
            return Ok(None);
        }

        let mut best = initial;
        let mut current = program.clone();
        let mut residual = vec![0.0; n];
        let mut perturbed = vec![0.0; n];
        // Column-major Jacobian, n rows per constant.
        let mut jacobian = vec![0.0; n * k];

        for _ in 0..self.max_iterations {
            Self::residuals(&mut evaluator, &current, data, &targets, &mut residual);

            for j in 0..k {
                let h = self.step * constants[j].abs().max(1.0);
                let mut shifted = constants.clone();
                shifted[j] += h;
                let trial = current.with_constants(&shifted);
                Self::residuals(&mut evaluator, &trial, data, &targets, &mut perturbed);
                let column = &mut jacobian[j * n..(j + 1) * n];
                for ((d, hi), lo) in column.iter_mut().zip(&perturbed).zip(&residual) {
                    *d = (hi - lo) / h;
                }
            }

            // (J^T J + damping * I) delta = -J^T r
            let mut normal = vec![0.0; k * k];
            let mut rhs = vec![0.0; k];
            for a in 0..k {
                let col_a = &jacobian[a * n..(a + 1) * n];
                rhs[a] = -col_a.iter().zip(&residual).map(|(j, r)| j * r).sum::<f64>();
                for b in a..k {
                    let col_b = &jacobian[b * n..(b + 1) * n];
                    let dot: f64 = col_a.iter().zip(col_b).map(|(x, y)| x * y).sum();
                    normal[a * k + b] = dot;
                    normal[b * k + a] = dot;
                }
                normal[a * k + a] += self.damping;
            }

            let delta = solve(&mut normal, &mut rhs, k, self.condition_threshold)?;
            if delta.iter().any(|d| !d.is_finite()) {
                break;
            }

            let candidate: Vec<f64> = constants.iter().zip(&delta).map(|(c, d)| c + d).collect();
            let trial = current.with_constants(&candidate);
            evaluator.evaluate_into(&trial, data, &mut predictions);
            let loss = mean_squared_error(&predictions, &targets);

            if loss < best {
                best = loss;
                constants = candidate;
                current = trial;
            } else {
                break;
            }
        }

        Ok((best < initial).then_some(current))
    }
}

/// Solve the dense `size`x`size` system in place by Gaussian elimination with
/// partial pivoting.
fn solve(
    matrix: &mut [f64],
    rhs: &mut [f64],
    size: usize,
    threshold: f64,
) -> Result<Vec<f64>, OptimizeError> {
    for col in 0..size {
        let pivot_row = (col..size)
            .max_by(|&a, &b| matrix[a * size + col].abs().total_cmp(&matrix[b * size + col].abs()))
            .unwrap_or(col);
        let pivot = matrix[pivot_row * size + col];
        if !(pivot.abs() >= threshold) {
            return Err(OptimizeError::IllConditioned { pivot, threshold });
        }

        if pivot_row != col {
            for c in 0..size {
                matrix.swap(col * size + c, pivot_row * size + c);
            }
            rhs.swap(col, pivot_row);
        }

        for row in col + 1..size {
            let factor = matrix[row * size + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..size {
                matrix[row * size + c] -= factor * matrix[col * size + c];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; size];
    for row in (0..size).rev() {
        let tail: f64 = (row + 1..size).map(|c| matrix[row * size + c] * x[c]).sum();
        x[row] = (rhs[row] - tail) / matrix[row * size + row];
    }
    Ok(x)
}
