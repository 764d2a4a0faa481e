//! Training: split, standardize on the train side only, fit 1-NN, score.

use crate::classifier::{ClassifierError, DistanceMetric, KnnClassifier, TrainedClassifier};
use crate::dataset::{features_of, Dataset};
use crate::scaler::{ScalerError, StandardScaler};
use crate::types::LabeledSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TEST_FRACTION: f64 = 0.2;
const DEFAULT_SEED: u64 = 42;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("test fraction must be in [0, 1), got {0}")]
    InvalidTestFraction(f64),
    #[error("scaler: {0}")]
    Scaler(#[from] ScalerError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainConfig {
    /// Share of rows held out for the accuracy estimate.
    pub test_fraction: f64,
    /// Seed for the train/test shuffle.
    pub seed: u64,
    pub metric: DistanceMetric,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Summary of a training run, persisted alongside the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Held-out accuracy in [0, 1]; `None` when no rows were held out.
    pub accuracy: Option<f64>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub classes: usize,
    pub seed: u64,
    pub feature_names: Vec<String>,
}

/// Output of [`train`]: the fitted classifier/scaler pair and its report.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub classifier: TrainedClassifier,
    pub report: TrainingReport,
}

/// Fit a scaler and 1-NN classifier on `dataset`.
///
/// The scaler sees only the training rows; the held-out rows are transformed
/// with it and used to estimate accuracy.
pub fn train(dataset: Dataset, config: &TrainConfig) -> Result<TrainedModel, TrainError> {
    if !(0.0..1.0).contains(&config.test_fraction) {
        return Err(TrainError::InvalidTestFraction(config.test_fraction));
    }

    let feature_names = dataset.feature_names().to_vec();
    let (train_rows, test_rows) = dataset.split(config.test_fraction, config.seed);

    let scaler = StandardScaler::fit(features_of(&train_rows))?;
    let train_scaled = scale_all(&scaler, &train_rows)?;
    let test_scaled = scale_all(&scaler, &test_rows)?;

    let knn = KnnClassifier::fit(train_scaled, config.metric)?;
    let accuracy = knn.score(&test_scaled)?;

    let report = TrainingReport {
        accuracy,
        train_samples: train_rows.len(),
        test_samples: test_rows.len(),
        classes: knn.classes().len(),
        seed: config.seed,
        feature_names,
    };

    tracing::info!(
        train = report.train_samples,
        test = report.test_samples,
        classes = report.classes,
        accuracy = ?report.accuracy,
        metric = %config.metric,
        "training complete"
    );

    Ok(TrainedModel {
        classifier: TrainedClassifier::new(knn, scaler)?,
        report,
    })
}

fn scale_all(
    scaler: &StandardScaler,
    rows: &[LabeledSample],
) -> Result<Vec<LabeledSample>, ScalerError> {
    rows.iter()
        .map(|s| {
            scaler
                .transform(&s.features)
                .map(|scaled| LabeledSample::new(scaled, s.label.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NearestNeighbor;
    use approx::assert_relative_eq;

    /// Two well-separated identities, 10 rows each.
    fn clustered() -> Dataset {
        let mut samples = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            samples.push(LabeledSample::new(vec![1.0 + jitter, 50.0 - jitter], "alice"));
            samples.push(LabeledSample::new(vec![9.0 - jitter, 20.0 + jitter], "bob"));
        }
        Dataset::new(vec!["a".into(), "b".into()], samples)
    }

    #[test]
    fn test_train_separable_perfect_accuracy() {
        let model = train(clustered(), &TrainConfig::default()).unwrap();
        assert_eq!(model.report.train_samples, 16);
        assert_eq!(model.report.test_samples, 4);
        assert_eq!(model.report.classes, 2);
        assert_eq!(model.report.accuracy, Some(1.0));
        assert_eq!(model.classifier.knn().samples().len(), 16);
    }

    #[test]
    fn test_scaler_fit_on_train_rows_only() {
        let config = TrainConfig::default();
        let model = train(clustered(), &config).unwrap();

        let (train_rows, _) = clustered().split(config.test_fraction, config.seed);
        let expected = StandardScaler::fit(features_of(&train_rows)).unwrap();
        assert_eq!(model.classifier.scaler(), &expected);
    }

    #[test]
    fn test_reference_set_is_scaled() {
        let model = train(clustered(), &TrainConfig::default()).unwrap();
        let dim = model.classifier.dim();
        let n = model.classifier.knn().samples().len() as f32;
        for d in 0..dim {
            let mean: f32 = model
                .classifier
                .knn()
                .samples()
                .iter()
                .map(|s| s.features.as_slice()[d])
                .sum::<f32>()
                / n;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_raw_query_resolves_through_scaler() {
        let model = train(clustered(), &TrainConfig::default()).unwrap();
        let n = model.classifier.nearest(&vec![9.0, 20.0].into()).unwrap();
        assert_eq!(n.label, "bob");
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = train(clustered(), &TrainConfig::default()).unwrap();
        let b = train(clustered(), &TrainConfig::default()).unwrap();
        assert_eq!(a.classifier.knn(), b.classifier.knn());
        assert_eq!(a.report, b.report);
    }

    #[test]
    fn test_no_holdout_reports_no_accuracy() {
        let config = TrainConfig { test_fraction: 0.0, ..TrainConfig::default() };
        let model = train(clustered(), &config).unwrap();
        assert_eq!(model.report.test_samples, 0);
        assert_eq!(model.report.accuracy, None);
    }

    #[test]
    fn test_invalid_test_fraction() {
        let config = TrainConfig { test_fraction: 1.0, ..TrainConfig::default() };
        assert!(matches!(
            train(clustered(), &config),
            Err(TrainError::InvalidTestFraction(_))
        ));
    }
}
