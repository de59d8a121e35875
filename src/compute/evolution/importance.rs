//! Feature importance from a Pareto front.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::schema::DiscoveredModel;

use super::archive::ParetoArchive;

/// Share of explained variance attributed to one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub index: usize,
    pub name: String,
    /// Normalized score; scores of all features sum to 1 unless every
    /// weight is zero.
    pub score: f64,
}

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"x(\d+)").expect("variable pattern"));

/// Distinct `x<i>` references in an infix expression.
fn expression_variables(expression: &str) -> Vec<usize> {
    let mut vars: Vec<usize> = VARIABLE
        .captures_iter(expression)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    vars.sort_unstable();
    vars.dedup();
    vars
}

fn model_variables(model: &DiscoveredModel) -> Vec<usize> {
    match &model.program {
        Some(program) => program.variables(),
        None => expression_variables(&model.expression),
    }
}

/// Each model adds `max(R², 0)` to every distinct feature it reads; totals are
/// normalized by the summed weight and sorted by descending score.
///
/// Features without a name in `names` are called `x<i>`. References past
/// `feature_count` are ignored. An empty archive yields no scores.
pub fn feature_importance(
    archive: &ParetoArchive,
    feature_count: usize,
    names: &[String],
) -> Vec<FeatureImportance> {
    if archive.is_empty() || feature_count == 0 {
        return Vec::new();
    }

    let mut totals = vec![0.0; feature_count];
    let mut total_weight = 0.0;

    for model in archive {
        let weight = if model.r2.is_nan() { 0.0 } else { model.r2.max(0.0) };
        total_weight += weight;
        for var in model_variables(model) {
            if let Some(total) = totals.get_mut(var) {
                *total += weight;
            }
        }
    }

    let mut importances: Vec<FeatureImportance> = totals
        .into_iter()
        .enumerate()
        .map(|(index, total)| FeatureImportance {
            index,
            name: names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("x{index}")),
            score: if total_weight > 0.0 { total / total_weight } else { 0.0 },
        })
        .collect();
    // Stable: ties stay in feature order.
    importances.sort_by(|a, b| b.score.total_cmp(&a.score));
    importances
}
