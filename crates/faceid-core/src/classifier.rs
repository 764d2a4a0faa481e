//! k=1 nearest-neighbor classifier over a labeled reference set.

use crate::scaler::{ScalerError, StandardScaler};
use crate::types::{FeatureVector, LabeledSample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("reference set is empty")]
    EmptyReferenceSet,
    #[error("dimension mismatch: trained on {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Scaler(ScalerError),
}

impl From<ScalerError> for ClassifierError {
    fn from(e: ScalerError) -> Self {
        match e {
            ScalerError::DimensionMismatch { expected, actual } => {
                ClassifierError::DimensionMismatch { expected, actual }
            }
            ScalerError::Empty => ClassifierError::EmptyReferenceSet,
            e @ ScalerError::InvalidParameter { .. } => ClassifierError::Scaler(e),
        }
    }
}

/// Distance used to rank reference samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => 1.0 - a.cosine_similarity(b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other} (expected euclidean or cosine)")),
        }
    }
}

/// The closest reference sample to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub label: String,
    pub distance: f32,
    /// Position of the sample in the reference set.
    pub index: usize,
}

/// Nearest-neighbor lookup: `nearest(query) -> (label, distance)`.
pub trait NearestNeighbor {
    fn nearest(&self, query: &FeatureVector) -> Result<Neighbor, ClassifierError>;

    /// Dimensionality queries must have.
    fn dim(&self) -> usize;
}

impl<T: NearestNeighbor + ?Sized> NearestNeighbor for Box<T> {
    fn nearest(&self, query: &FeatureVector) -> Result<Neighbor, ClassifierError> {
        (**self).nearest(query)
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

/// Brute-force 1-NN classifier.
///
/// Every reference sample is compared on every query. Ties resolve to the
/// sample that appears first in the reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct KnnClassifier {
    samples: Vec<LabeledSample>,
    metric: DistanceMetric,
    dim: usize,
}

impl KnnClassifier {
    /// Number of neighbors consulted per query.
    pub const K: usize = 1;

    /// Store the reference set. All samples must share one dimensionality.
    pub fn fit(samples: Vec<LabeledSample>, metric: DistanceMetric) -> Result<Self, ClassifierError> {
        let dim = samples
            .first()
            .ok_or(ClassifierError::EmptyReferenceSet)?
            .features
            .dim();

        if let Some(bad) = samples.iter().find(|s| s.features.dim() != dim) {
            return Err(ClassifierError::DimensionMismatch {
                expected: dim,
                actual: bad.features.dim(),
            });
        }

        tracing::debug!(samples = samples.len(), dim, %metric, "fitted 1-NN classifier");
        Ok(Self { samples, metric, dim })
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Distinct labels in the reference set, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.samples.iter().map(|s| s.label.as_str()).collect();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    /// Label of the nearest reference sample, with no distance threshold.
    pub fn predict(&self, query: &FeatureVector) -> Result<&str, ClassifierError> {
        let neighbor = self.nearest_index(query)?;
        Ok(&self.samples[neighbor.0].label)
    }

    /// Fraction of `test` samples whose predicted label equals their own.
    ///
    /// Returns `None` for an empty test set.
    pub fn score(&self, test: &[LabeledSample]) -> Result<Option<f64>, ClassifierError> {
        if test.is_empty() {
            return Ok(None);
        }
        let mut correct = 0usize;
        for sample in test {
            if self.predict(&sample.features)? == sample.label {
                correct += 1;
            }
        }
        Ok(Some(correct as f64 / test.len() as f64))
    }

    fn nearest_index(&self, query: &FeatureVector) -> Result<(usize, f32), ClassifierError> {
        if query.dim() != self.dim {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.dim,
                actual: query.dim(),
            });
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, sample) in self.samples.iter().enumerate() {
            let d = self.metric.distance(query, &sample.features);
            if best_idx.is_none() || d < best_dist {
                best_dist = d;
                best_idx = Some(i);
            }
        }

        best_idx
            .map(|i| (i, best_dist))
            .ok_or(ClassifierError::EmptyReferenceSet)
    }
}

impl NearestNeighbor for KnnClassifier {
    fn nearest(&self, query: &FeatureVector) -> Result<Neighbor, ClassifierError> {
        let (index, distance) = self.nearest_index(query)?;
        Ok(Neighbor {
            label: self.samples[index].label.clone(),
            distance,
            index,
        })
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// A fitted classifier paired with the scaler its reference set was built with.
///
/// Queries are given in raw feature space and scaled before the lookup.
#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    knn: KnnClassifier,
    scaler: StandardScaler,
}

impl TrainedClassifier {
    pub fn new(knn: KnnClassifier, scaler: StandardScaler) -> Result<Self, ClassifierError> {
        if knn.dim() != scaler.dim() {
            return Err(ClassifierError::DimensionMismatch {
                expected: knn.dim(),
                actual: scaler.dim(),
            });
        }
        Ok(Self { knn, scaler })
    }

    pub fn knn(&self) -> &KnnClassifier {
        &self.knn
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn dim(&self) -> usize {
        self.knn.dim()
    }
}

impl NearestNeighbor for TrainedClassifier {
    fn nearest(&self, query: &FeatureVector) -> Result<Neighbor, ClassifierError> {
        let scaled = self.scaler.transform(query)?;
        self.knn.nearest(&scaled)
    }

    fn dim(&self) -> usize {
        self.knn.dim()
    }
}
