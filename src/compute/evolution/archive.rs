//! Pareto archive of accuracy/complexity trade-offs.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{ArchiveObjective, DiscoveredModel};

/// Archive persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Archive JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Non-dominated set of models over (complexity, error).
///
/// Models are kept sorted by complexity. Walking them in order, complexity
/// strictly increases and error strictly improves, so the last model is the
/// most accurate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ArchiveData", into = "ArchiveData")]
pub struct ParetoArchive {
    objective: ArchiveObjective,
    models: Vec<DiscoveredModel>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveData {
    #[serde(default)]
    objective: ArchiveObjective,
    models: Vec<DiscoveredModel>,
}

impl From<ArchiveData> for ParetoArchive {
    fn from(data: ArchiveData) -> Self {
        Self::from_models(data.objective, data.models)
    }
}

impl From<ParetoArchive> for ArchiveData {
    fn from(archive: ParetoArchive) -> Self {
        Self {
            objective: archive.objective,
            models: archive.models,
        }
    }
}

impl ParetoArchive {
    pub fn new(objective: ArchiveObjective) -> Self {
        Self {
            objective,
            models: Vec::new(),
        }
    }

    /// Archive holding the non-dominated subset of `models`.
    pub fn from_models(
        objective: ArchiveObjective,
        models: impl IntoIterator<Item = DiscoveredModel>,
    ) -> Self {
        let mut archive = Self::new(objective);
        for model in models {
            archive.add(model);
        }
        archive
    }

    pub fn objective(&self) -> ArchiveObjective {
        self.objective
    }

    /// Error of `model` under this archive's objective; lower is better and
    /// `NaN` maps to `+inf`.
    pub fn error(&self, model: &DiscoveredModel) -> f64 {
        objective_error(self.objective, model)
    }

    /// Whether `a` Pareto-dominates `b`.
    pub fn dominates(&self, a: &DiscoveredModel, b: &DiscoveredModel) -> bool {
        let (ea, eb) = (self.error(a), self.error(b));
        ea <= eb && a.complexity <= b.complexity && (ea < eb || a.complexity < b.complexity)
    }

    /// Offer a model. Returns `true` if it joined the front.
    ///
    /// Rejected when its error is not finite or an existing model dominates or
    /// equals it; otherwise every model it dominates is evicted.
    pub fn add(&mut self, model: DiscoveredModel) -> bool {
        let error = self.error(&model);
        if error == f64::INFINITY {
            return false;
        }
        let covered = self
            .models
            .iter()
            .any(|m| m.complexity <= model.complexity && self.error(m) <= error);
        if covered {
            return false;
        }

        let objective = self.objective;
        self.models.retain(|m| {
            !(model.complexity <= m.complexity && error <= objective_error(objective, m))
        });
        let at = self.models.partition_point(|m| m.complexity < model.complexity);
        self.models.insert(at, model);
        true
    }

    /// Combine several archives into one front.
    ///
    /// Keeps the best model per complexity, then walks complexities in
    /// ascending order keeping only models that strictly improve on every
    /// simpler one. The objective of the first archive is used.
    pub fn merge<'a>(archives: impl IntoIterator<Item = &'a ParetoArchive>) -> ParetoArchive {
        let mut archives = archives.into_iter().peekable();
        let objective = archives.peek().map(|a| a.objective).unwrap_or_default();

        let mut pool: Vec<DiscoveredModel> =
            archives.flat_map(|a| a.models.iter().cloned()).collect();
        // Stable: among equal complexity and error the first seen wins.
        pool.sort_by(|a, b| {
            a.complexity
                .cmp(&b.complexity)
                .then(objective_error(objective, a).total_cmp(&objective_error(objective, b)))
        });

        let mut merged = Vec::new();
        let mut best = f64::INFINITY;
        let mut last_complexity = None;
        for model in pool {
            if last_complexity == Some(model.complexity) {
                continue;
            }
            last_complexity = Some(model.complexity);

            let error = objective_error(objective, &model);
            if error < best {
                best = error;
                merged.push(model);
            }
        }

        Self {
            objective,
            models: merged,
        }
    }

    /// Most accurate model, or `None` when empty.
    pub fn best(&self) -> Option<&DiscoveredModel> {
        self.models.last()
    }

    /// Most accurate model with complexity at most `max_complexity`.
    pub fn best_by_complexity(&self, max_complexity: usize) -> Option<&DiscoveredModel> {
        self.models
            .iter()
            .rev()
            .find(|m| m.complexity <= max_complexity)
    }

    /// Models in ascending complexity.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredModel> {
        self.models.iter()
    }

    pub fn models(&self) -> &[DiscoveredModel] {
        &self.models
    }

    pub fn into_models(self) -> Vec<DiscoveredModel> {
        self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }

    /// Write the archive as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ArchiveError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read an archive written by [`ParetoArchive::save_json`]. Dominated
    /// entries in the file are dropped.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write `Complexity,MSE,R2,Expression` rows in complexity order.
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ArchiveError> {
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        writeln!(out, "Complexity,MSE,R2,Expression")?;
        for model in &self.models {
            writeln!(
                out,
                "{},{},{},\"{}\"",
                model.complexity,
                model.mse,
                model.r2,
                model.expression.replace('"', "\"\"")
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ParetoArchive {
    type Item = &'a DiscoveredModel;
    type IntoIter = std::slice::Iter<'a, DiscoveredModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

fn objective_error(objective: ArchiveObjective, model: &DiscoveredModel) -> f64 {
    let error = match objective {
        ArchiveObjective::Mse => model.mse,
        ArchiveObjective::R2 => -model.r2,
    };
    if error.is_nan() { f64::INFINITY } else { error }
}
