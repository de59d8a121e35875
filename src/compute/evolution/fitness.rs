//! Error metrics and information criteria for scoring programs.

use crate::compute::{Dataset, Evaluator, Program};

/// Mean squared error. Any non-finite prediction makes the error `+inf`.
///
/// Empty input yields `+inf`.
pub fn mean_squared_error(predictions: &[f64], targets: &[f64]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return f64::INFINITY;
    }

    let mut sum = 0.0;
    for (p, y) in predictions.iter().zip(targets) {
        if !p.is_finite() {
            return f64::INFINITY;
        }
        let diff = p - y;
        sum += diff * diff;
    }
    let mse = sum / n as f64;
    if mse.is_nan() { f64::INFINITY } else { mse }
}

/// Coefficient of determination, `1 - SSE / SST`.
///
/// A constant target has `SST = 0`; the result is then `1.0` for a perfect fit
/// and `0.0` otherwise.
pub fn r_squared(predictions: &[f64], targets: &[f64]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    let mean = targets[..n].iter().sum::<f64>() / n as f64;
    let sst: f64 = targets[..n].iter().map(|y| (y - mean).powi(2)).sum();
    r_squared_with(predictions, targets, sst)
}

fn r_squared_with(predictions: &[f64], targets: &[f64], sst: f64) -> f64 {
    let mut sse = 0.0;
    for (p, y) in predictions.iter().zip(targets) {
        if !p.is_finite() {
            return f64::NEG_INFINITY;
        }
        sse += (p - y).powi(2);
    }
    if sst > 0.0 {
        1.0 - sse / sst
    } else if sse == 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Substitute for an exactly-zero MSE in the log-likelihood terms.
fn log_mse(samples: usize, mse: f64) -> Option<f64> {
    if samples == 0 || mse.is_nan() || mse < 0.0 {
        return None;
    }
    let mse = if mse == 0.0 { f64::from_bits(1) } else { mse };
    Some(samples as f64 * mse.ln())
}

/// Akaike information criterion, `n ln(mse) + 2k`.
///
/// `NaN` for zero samples, `NaN` or negative MSE.
pub fn aic(samples: usize, mse: f64, parameters: usize) -> f64 {
    match log_mse(samples, mse) {
        Some(term) => term + 2.0 * parameters as f64,
        None => f64::NAN,
    }
}

/// Bayesian information criterion, `n ln(mse) + k ln(n)`.
///
/// `NaN` for zero samples, `NaN` or negative MSE.
pub fn bic(samples: usize, mse: f64, parameters: usize) -> f64 {
    match log_mse(samples, mse) {
        Some(term) => term + parameters as f64 * (samples as f64).ln(),
        None => f64::NAN,
    }
}

/// MSE and R² of one program on one dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub mse: f64,
    pub r2: f64,
}

impl Score {
    /// Score of a program that could not be evaluated.
    pub const WORST: Self = Self {
        mse: f64::INFINITY,
        r2: f64::NEG_INFINITY,
    };
}

/// Scores programs against a fixed dataset, caching target statistics.
#[derive(Debug, Clone)]
pub struct FitnessEvaluator {
    data: Dataset,
    targets: Vec<f64>,
    sst: f64,
}

impl FitnessEvaluator {
    /// Create a new fitness evaluator for `data`.
    pub fn new(data: Dataset) -> Self {
        let targets: Vec<f64> = data.targets().collect();
        let mean = data.target_mean();
        let sst = targets.iter().map(|y| (y - mean).powi(2)).sum();
        Self { data, targets, sst }
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Score precomputed predictions.
    pub fn score_predictions(&self, predictions: &[f64]) -> Score {
        Score {
            mse: mean_squared_error(predictions, &self.targets),
            r2: r_squared_with(predictions, &self.targets, self.sst),
        }
    }

    /// Evaluate `program` with `evaluator` into `buffer` and score it.
    pub fn score(
        &self,
        program: &Program,
        evaluator: &mut dyn Evaluator,
        buffer: &mut Vec<f64>,
    ) -> Score {
        buffer.resize(self.data.rows(), 0.0);
        evaluator.evaluate_into(program, &self.data, buffer);
        self.score_predictions(buffer)
    }
}
