//! Tabular face-measurement data: CSV loading and the seeded train/test split.
//!
//! One column holds the identity label; every other column is a numeric
//! feature. Column order in the header defines feature order.

use crate::types::{FeatureVector, LabeledSample};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Label column used by the measurement spreadsheets.
pub const DEFAULT_LABEL_COLUMN: &str = "Name";

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed table: {0}")]
    Csv(#[from] csv::Error),
    #[error("label column {0:?} not found in header")]
    MissingLabelColumn(String),
    #[error("table has no feature columns besides the label")]
    NoFeatureColumns,
    #[error("table has no data rows")]
    Empty,
    #[error("row {row}: label is empty")]
    MissingLabel { row: usize },
    #[error("row {row}: column {column:?} is empty")]
    MissingValue { row: usize, column: String },
    #[error("row {row}: column {column:?} has non-numeric value {value:?}")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },
}

/// Labeled feature rows plus the names of the feature columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    samples: Vec<LabeledSample>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>, samples: Vec<LabeledSample>) -> Self {
        Self {
            feature_names,
            samples,
        }
    }

    /// Load a CSV file with a header row.
    pub fn load_csv(path: &Path, label_column: &str) -> Result<Self, SchemaError> {
        let file = File::open(path).map_err(|source| SchemaError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let dataset = Self::from_csv_reader(file, label_column)?;

        tracing::info!(
            path = %path.display(),
            rows = dataset.len(),
            features = dataset.dim(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Parse CSV from any reader. Rows are numbered from 1, excluding the header.
    pub fn from_csv_reader<R: Read>(reader: R, label_column: &str) -> Result<Self, SchemaError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let label_idx = headers
            .iter()
            .position(|h| h == label_column)
            .ok_or_else(|| SchemaError::MissingLabelColumn(label_column.to_string()))?;

        let feature_cols: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != label_idx)
            .map(|(i, h)| (i, h.to_string()))
            .collect();
        if feature_cols.is_empty() {
            return Err(SchemaError::NoFeatureColumns);
        }

        let mut samples = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let row = i + 1;

            let label = record.get(label_idx).unwrap_or_default();
            if label.is_empty() {
                return Err(SchemaError::MissingLabel { row });
            }

            let mut values = Vec::with_capacity(feature_cols.len());
            for (col, name) in &feature_cols {
                let cell = record.get(*col).unwrap_or_default();
                if cell.is_empty() {
                    return Err(SchemaError::MissingValue {
                        row,
                        column: name.clone(),
                    });
                }
                let value = cell
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| SchemaError::NonNumeric {
                        row,
                        column: name.clone(),
                        value: cell.to_string(),
                    })?;
                values.push(value);
            }

            samples.push(LabeledSample::new(values, label));
        }

        if samples.is_empty() {
            return Err(SchemaError::Empty);
        }

        Ok(Self {
            feature_names: feature_cols.into_iter().map(|(_, name)| name).collect(),
            samples,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of feature columns.
    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    /// Shuffle with a seeded RNG and split into (train, test).
    ///
    /// The test side gets `ceil(len * test_fraction)` rows, but the train side
    /// always keeps at least one row. The same seed yields the same split.
    pub fn split(self, test_fraction: f64, seed: u64) -> (Vec<LabeledSample>, Vec<LabeledSample>) {
        let mut samples = self.samples;
        let total = samples.len();

        let n_test = ((total as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
        let n_test = n_test.min(total.saturating_sub(1));

        let mut rng = StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let test = samples.split_off(total - n_test);

        tracing::debug!(
            train = samples.len(),
            test = test.len(),
            seed,
            "dataset split"
        );

        (samples, test)
    }
}

/// Feature vectors of a sample slice, in order.
pub fn features_of(samples: &[LabeledSample]) -> impl Iterator<Item = &FeatureVector> + Clone {
    samples.iter().map(|s| &s.features)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Name,eye_distance,nose_width,jaw_width
alice,6.1,3.2,12.0
bob,5.8,3.6,13.1
alice,6.0,3.1,11.9
";

    fn load(text: &str) -> Result<Dataset, SchemaError> {
        Dataset::from_csv_reader(text.as_bytes(), DEFAULT_LABEL_COLUMN)
    }

    #[test]
    fn test_parse_table() {
        let ds = load(TABLE).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.feature_names(), &["eye_distance", "nose_width", "jaw_width"]);
        assert_eq!(ds.samples()[1].label, "bob");
        assert_eq!(ds.samples()[1].features.as_slice(), &[5.8, 3.6, 13.1]);
    }

    #[test]
    fn test_label_column_anywhere() {
        let ds = load("a,Name,b\n1, carol ,2\n").unwrap();
        assert_eq!(ds.feature_names(), &["a", "b"]);
        assert_eq!(ds.samples()[0].label, "carol");
        assert_eq!(ds.samples()[0].features.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_missing_label_column() {
        let err = load("Person,a\nx,1\n").unwrap_err();
        assert!(matches!(err, SchemaError::MissingLabelColumn(ref c) if c == "Name"));
    }

    #[test]
    fn test_non_numeric_feature() {
        let err = load("Name,a,b\nx,1,2\ny,3,tall\n").unwrap_err();
        match err {
            SchemaError::NonNumeric { row, column, value } => {
                assert_eq!(row, 2);
                assert_eq!(column, "b");
                assert_eq!(value, "tall");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_value() {
        let err = load("Name,a,b\nx,,2\n").unwrap_err();
        assert!(matches!(err, SchemaError::MissingValue { row: 1, ref column } if column == "a"));
    }

    #[test]
    fn test_nan_is_rejected() {
        let err = load("Name,a\nx,NaN\n").unwrap_err();
        assert!(matches!(err, SchemaError::NonNumeric { .. }));
    }

    #[test]
    fn test_ragged_row_is_csv_error() {
        let err = load("Name,a,b\nx,1\n").unwrap_err();
        assert!(matches!(err, SchemaError::Csv(_)));
    }

    #[test]
    fn test_empty_and_featureless() {
        assert!(matches!(load("Name,a\n").unwrap_err(), SchemaError::Empty));
        assert!(matches!(load("Name\nx\n").unwrap_err(), SchemaError::NoFeatureColumns));
    }

    fn numbered(n: usize) -> Dataset {
        let samples = (0..n)
            .map(|i| LabeledSample::new(vec![i as f32], format!("p{i}")))
            .collect();
        Dataset::new(vec!["x".into()], samples)
    }

    #[test]
    fn test_split_sizes() {
        let (train, test) = numbered(10).split(0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        // ceil(11 * 0.2) = 3
        let (train, test) = numbered(11).split(0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 3);
    }

    #[test]
    fn test_split_preserves_all_rows() {
        let (train, test) = numbered(37).split(0.2, 7);
        let mut labels: Vec<String> = train.iter().chain(&test).map(|s| s.label.clone()).collect();
        labels.sort();
        let mut expected: Vec<String> = (0..37).map(|i| format!("p{i}")).collect();
        expected.sort();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_split_deterministic_for_seed() {
        let a = numbered(20).split(0.2, 42);
        let b = numbered(20).split(0.2, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_tiny_dataset_keeps_training_row() {
        let (train, test) = numbered(1).split(0.2, 42);
        assert_eq!(train.len(), 1);
        assert!(test.is_empty());
    }
}
