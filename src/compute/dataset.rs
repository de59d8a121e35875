//! Column-major datasets with zero-copy row views.
//!
//! A [`Dataset`] owns its feature columns and target behind shared storage.
//! Subsets (bootstrap samples, screening samples, explicit index lists) are
//! views that share the same storage and only carry a row index table.

use std::sync::Arc;

use rand::prelude::*;

use super::Interval;

/// Dataset construction and sampling errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset must have at least one row and one feature")]
    Empty,
    #[error("Feature column {column} has {found} rows, expected {expected}")]
    RaggedColumn {
        column: usize,
        expected: usize,
        found: usize,
    },
    #[error("Row {row} has {found} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Target has {found} rows, expected {expected}")]
    TargetLength { expected: usize, found: usize },
    #[error("Sample ratio must be positive and finite, got {0}")]
    InvalidSampleRatio(f64),
    #[error("Row index {index} out of range for {rows} rows")]
    RowOutOfRange { index: usize, rows: usize },
    #[error("Expected {expected} feature names, got {found}")]
    FeatureNames { expected: usize, found: usize },
}

#[derive(Debug)]
struct Columns {
    features: Vec<Vec<f64>>,
    target: Vec<f64>,
    names: Vec<String>,
}

/// Feature matrix plus target, optionally restricted to a subset of rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Arc<Columns>,
    /// Physical row for each logical row, or `None` for the identity mapping.
    rows: Option<Arc<[usize]>>,
}

impl Dataset {
    /// Build from column-major features and a target.
    pub fn from_columns(features: Vec<Vec<f64>>, target: Vec<f64>) -> Result<Self, DatasetError> {
        if features.is_empty() || target.is_empty() {
            return Err(DatasetError::Empty);
        }
        let expected = target.len();
        for (column, values) in features.iter().enumerate() {
            if values.len() != expected {
                return Err(DatasetError::RaggedColumn {
                    column,
                    expected,
                    found: values.len(),
                });
            }
        }

        let names = (0..features.len()).map(|i| format!("x{i}")).collect();
        Ok(Self {
            columns: Arc::new(Columns {
                features,
                target,
                names,
            }),
            rows: None,
        })
    }

    /// Build from row-major features and a target.
    pub fn from_rows(rows: &[Vec<f64>], target: Vec<f64>) -> Result<Self, DatasetError> {
        let Some(first) = rows.first() else {
            return Err(DatasetError::Empty);
        };
        if rows.len() != target.len() {
            return Err(DatasetError::TargetLength {
                expected: rows.len(),
                found: target.len(),
            });
        }

        let width = first.len();
        let mut features = vec![Vec::with_capacity(rows.len()); width];
        for (row, values) in rows.iter().enumerate() {
            if values.len() != width {
                return Err(DatasetError::RaggedRow {
                    row,
                    expected: width,
                    found: values.len(),
                });
            }
            for (column, value) in values.iter().enumerate() {
                features[column].push(*value);
            }
        }

        Self::from_columns(features, target)
    }

    /// Replace the default `x0..xN` feature names.
    pub fn with_feature_names(self, names: Vec<String>) -> Result<Self, DatasetError> {
        let expected = self.feature_count();
        if names.len() != expected {
            return Err(DatasetError::FeatureNames {
                expected,
                found: names.len(),
            });
        }
        let columns = Columns {
            features: self.columns.features.clone(),
            target: self.columns.target.clone(),
            names,
        };
        Ok(Self {
            columns: Arc::new(columns),
            rows: self.rows,
        })
    }

    /// Number of logical rows in this view.
    #[inline]
    pub fn rows(&self) -> usize {
        match &self.rows {
            Some(indices) => indices.len(),
            None => self.columns.target.len(),
        }
    }

    /// Number of feature columns.
    #[inline]
    pub fn feature_count(&self) -> usize {
        self.columns.features.len()
    }

    /// Feature names in column order.
    pub fn feature_names(&self) -> &[String] {
        &self.columns.names
    }

    /// Whether this dataset is a subset view over shared storage.
    pub fn is_view(&self) -> bool {
        self.rows.is_some()
    }

    #[inline]
    fn physical_row(&self, row: usize) -> usize {
        match &self.rows {
            Some(indices) => indices[row],
            None => row,
        }
    }

    /// Feature value at a logical row.
    #[inline]
    pub fn feature(&self, row: usize, feature: usize) -> f64 {
        self.columns.features[feature][self.physical_row(row)]
    }

    /// Target value at a logical row.
    #[inline]
    pub fn target(&self, row: usize) -> f64 {
        self.columns.target[self.physical_row(row)]
    }

    /// Iterator over target values in logical row order.
    pub fn targets(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows()).map(move |row| self.target(row))
    }

    /// Zero-copy view over the given logical rows of this dataset.
    pub fn view(&self, indices: &[usize]) -> Result<Self, DatasetError> {
        let rows = self.rows();
        let physical = indices
            .iter()
            .map(|&index| {
                if index < rows {
                    Ok(self.physical_row(index))
                } else {
                    Err(DatasetError::RowOutOfRange { index, rows })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if physical.is_empty() {
            return Err(DatasetError::Empty);
        }

        Ok(Self {
            columns: Arc::clone(&self.columns),
            rows: Some(physical.into()),
        })
    }

    /// Sample `max(1, round(rows * ratio))` rows with replacement.
    ///
    /// Composes with existing views: sampling a view draws from the view's rows.
    pub fn bootstrap_sample(&self, ratio: f64, seed: u64) -> Result<Self, DatasetError> {
        if !(ratio > 0.0 && ratio.is_finite()) {
            return Err(DatasetError::InvalidSampleRatio(ratio));
        }

        let rows = self.rows();
        let samples = ((rows as f64 * ratio).round() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let indices: Vec<usize> = (0..samples)
            .map(|_| self.physical_row(rng.gen_range(0..rows)))
            .collect();

        Ok(Self {
            columns: Arc::clone(&self.columns),
            rows: Some(indices.into()),
        })
    }

    /// Observed `[min, max]` of every feature over this view's rows.
    pub fn feature_bounds(&self) -> Vec<Interval> {
        (0..self.feature_count())
            .map(|feature| {
                let (min, max) = (0..self.rows()).fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(min, max), row| {
                        let v = self.feature(row, feature);
                        (min.min(v), max.max(v))
                    },
                );
                Interval::new(min, max)
            })
            .collect()
    }

    /// Mean of the target over this view.
    pub fn target_mean(&self) -> f64 {
        let n = self.rows();
        if n == 0 {
            return 0.0;
        }
        self.targets().sum::<f64>() / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Dataset {
        Dataset::from_rows(
            &[vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0], vec![4.0, 40.0]],
            vec![0.1, 0.2, 0.3, 0.4],
        )
        .unwrap()
    }

    #[test]
    fn test_from_rows_layout() {
        let data = small();
        assert_eq!(data.rows(), 4);
        assert_eq!(data.feature_count(), 2);
        assert_eq!(data.feature(2, 1), 30.0);
        assert_eq!(data.target(3), 0.4);
        assert_eq!(data.feature_names(), &["x0".to_string(), "x1".to_string()]);
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(Dataset::from_rows(&[], vec![]).unwrap_err(), DatasetError::Empty);
        assert!(matches!(
            Dataset::from_rows(&[vec![1.0], vec![1.0, 2.0]], vec![0.0, 0.0]),
            Err(DatasetError::RaggedRow { row: 1, .. })
        ));
        assert!(matches!(
            Dataset::from_columns(vec![vec![1.0, 2.0]], vec![0.0]),
            Err(DatasetError::RaggedColumn { column: 0, .. })
        ));
        assert!(matches!(
            Dataset::from_rows(&[vec![1.0]], vec![0.0, 1.0]),
            Err(DatasetError::TargetLength { .. })
        ));
    }

    #[test]
    fn test_view_composes() {
        let data = small();
        let view = data.view(&[3, 1]).unwrap();
        assert!(view.is_view());
        assert_eq!(view.rows(), 2);
        assert_eq!(view.feature(0, 0), 4.0);

        let nested = view.view(&[1]).unwrap();
        assert_eq!(nested.feature(0, 0), 2.0);
        assert_eq!(nested.target(0), 0.2);

        assert!(matches!(
            view.view(&[2]),
            Err(DatasetError::RowOutOfRange { index: 2, rows: 2 })
        ));
    }

    #[test]
    fn test_bootstrap_sample_size_and_determinism() {
        let data = small();
        let a = data.bootstrap_sample(0.5, 7).unwrap();
        let b = data.bootstrap_sample(0.5, 7).unwrap();
        assert_eq!(a.rows(), 2);
        let a_vals: Vec<f64> = a.targets().collect();
        let b_vals: Vec<f64> = b.targets().collect();
        assert_eq!(a_vals, b_vals);

        // Tiny ratios still yield one row.
        assert_eq!(data.bootstrap_sample(0.01, 1).unwrap().rows(), 1);
        assert!(matches!(
            data.bootstrap_sample(0.0, 1),
            Err(DatasetError::InvalidSampleRatio(_))
        ));
    }

    #[test]
    fn test_feature_bounds() {
        let bounds = small().feature_bounds();
        assert_eq!(bounds[0], Interval::new(1.0, 4.0));
        assert_eq!(bounds[1], Interval::new(10.0, 40.0));
    }
}
