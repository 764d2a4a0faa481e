//! Identification decision: nearest neighbor plus a distance threshold.

use crate::classifier::{ClassifierError, NearestNeighbor};
use crate::types::{FeatureVector, IdentificationResult, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default maximum distance at which the nearest identity is accepted.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// How a nearest-neighbor distance is turned into a display confidence.
///
/// Neither mapping is a calibrated probability. Both return 100 at distance 0
/// and never increase as distance grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceMapping {
    /// `(1 - d) * 100`, clamped to [0, 100].
    #[default]
    Linear,
    /// `100 / (1 + d)`. Stays above zero for any finite distance.
    Inverse,
}

impl ConfidenceMapping {
    /// A NaN distance has confidence 0.
    pub fn confidence(&self, distance: f32) -> f32 {
        if distance.is_nan() {
            return 0.0;
        }
        let d = distance.max(0.0);
        match self {
            ConfidenceMapping::Linear => ((1.0 - d) * 100.0).clamp(0.0, 100.0),
            ConfidenceMapping::Inverse => 100.0 / (1.0 + d),
        }
    }
}

impl fmt::Display for ConfidenceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceMapping::Linear => f.write_str("linear"),
            ConfidenceMapping::Inverse => f.write_str("inverse"),
        }
    }
}

impl FromStr for ConfidenceMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ConfidenceMapping::Linear),
            "inverse" => Ok(ConfidenceMapping::Inverse),
            other => Err(format!("unknown confidence mapping: {other} (expected linear or inverse)")),
        }
    }
}

/// Accept the nearest identity when its distance is within `threshold`
/// (inclusive); otherwise report [`Identity::Unknown`]. A non-finite distance
/// is always unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentificationPolicy {
    pub threshold: f32,
    pub mapping: ConfidenceMapping,
}

impl Default for IdentificationPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DISTANCE_THRESHOLD,
            mapping: ConfidenceMapping::default(),
        }
    }
}

impl IdentificationPolicy {
    pub fn new(threshold: f32, mapping: ConfidenceMapping) -> Self {
        Self { threshold, mapping }
    }

    /// Identify one feature vector against the reference set behind `index`.
    pub fn identify<N>(&self, index: &N, query: &FeatureVector) -> Result<IdentificationResult, ClassifierError>
    where
        N: NearestNeighbor + ?Sized,
    {
        let neighbor = index.nearest(query)?;
        let identity = if neighbor.distance.is_finite() && neighbor.distance <= self.threshold {
            Identity::Known(neighbor.label)
        } else {
            Identity::Unknown
        };

        Ok(IdentificationResult {
            identity,
            confidence: self.mapping.confidence(neighbor.distance),
            distance: neighbor.distance,
        })
    }

    /// Identify each vector independently, preserving order.
    pub fn identify_all<N>(
        &self,
        index: &N,
        queries: &[FeatureVector],
    ) -> Result<Vec<IdentificationResult>, ClassifierError>
    where
        N: NearestNeighbor + ?Sized,
    {
        queries.iter().map(|q| self.identify(index, q)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{DistanceMetric, KnnClassifier};
    use crate::types::LabeledSample;
    use approx::assert_relative_eq;

    fn reference() -> KnnClassifier {
        KnnClassifier::fit(
            vec![
                LabeledSample::new(vec![0.0, 0.0], "A"),
                LabeledSample::new(vec![10.0, 10.0], "B"),
            ],
            DistanceMetric::Euclidean,
        )
        .unwrap()
    }

    #[test]
    fn test_close_query_is_known() {
        let result = IdentificationPolicy::default()
            .identify(&reference(), &vec![0.1, 0.1].into())
            .unwrap();
        assert_eq!(result.identity, Identity::Known("A".into()));
        assert_relative_eq!(result.distance, 0.141_421_36, epsilon = 1e-5);
        assert_relative_eq!(result.confidence, 85.857_864, epsilon = 1e-3);
    }

    #[test]
    fn test_far_query_is_unknown() {
        let result = IdentificationPolicy::default()
            .identify(&reference(), &vec![5.0, 5.0].into())
            .unwrap();
        assert_eq!(result.identity, Identity::Unknown);
        assert!(result.distance > DEFAULT_DISTANCE_THRESHOLD);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_exact_match_full_confidence() {
        for mapping in [ConfidenceMapping::Linear, ConfidenceMapping::Inverse] {
            let policy = IdentificationPolicy::new(DEFAULT_DISTANCE_THRESHOLD, mapping);
            let result = policy.identify(&reference(), &vec![10.0, 10.0].into()).unwrap();
            assert_eq!(result.identity, Identity::Known("B".into()));
            assert_eq!(result.distance, 0.0);
            assert_eq!(result.confidence, 100.0);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let knn = KnnClassifier::fit(
            vec![LabeledSample::new(vec![0.0], "edge")],
            DistanceMetric::Euclidean,
        )
        .unwrap();
        let policy = IdentificationPolicy::new(0.5, ConfidenceMapping::Linear);

        let at = policy.identify(&knn, &vec![0.5].into()).unwrap();
        assert_eq!(at.identity, Identity::Known("edge".into()));

        let past = policy.identify(&knn, &vec![0.5001].into()).unwrap();
        assert_eq!(past.identity, Identity::Unknown);
    }

    #[test]
    fn test_unknown_regardless_of_nearest_class() {
        let policy = IdentificationPolicy::default();
        for q in [[0.7f32, 0.0], [10.0, 10.7], [3.0, -3.0], [-20.0, 40.0]] {
            let result = policy.identify(&reference(), &q.to_vec().into()).unwrap();
            assert_eq!(result.identity, Identity::Unknown, "query {q:?}");
        }
    }

    #[test]
    fn test_confidence_monotonic_non_increasing() {
        for mapping in [ConfidenceMapping::Linear, ConfidenceMapping::Inverse] {
            let mut prev = f32::INFINITY;
            for step in 0..400 {
                let c = mapping.confidence(step as f32 * 0.01);
                assert!(c <= prev, "{mapping}: confidence rose at step {step}");
                assert!((0.0..=100.0).contains(&c));
                prev = c;
            }
        }
    }

    #[test]
    fn test_linear_clamps_large_distance() {
        assert_eq!(ConfidenceMapping::Linear.confidence(7.07), 0.0);
        assert!(ConfidenceMapping::Inverse.confidence(7.07) > 0.0);
    }

    #[test]
    fn test_nan_query_is_unknown_with_zero_confidence() {
        let knn = KnnClassifier::fit(
            vec![LabeledSample::new(vec![0.0, 0.0], "A")],
            DistanceMetric::Euclidean,
        )
        .unwrap();
        for mapping in [ConfidenceMapping::Linear, ConfidenceMapping::Inverse] {
            let policy = IdentificationPolicy::new(DEFAULT_DISTANCE_THRESHOLD, mapping);
            let result = policy.identify(&knn, &vec![f32::NAN, 0.0].into()).unwrap();
            assert_eq!(result.identity, Identity::Unknown);
            assert_eq!(result.confidence, 0.0, "{mapping}");
            assert_eq!(result.caption(), "Unknown (0.00%)");
        }
    }

    #[test]
    fn test_non_finite_distance_confidence() {
        for mapping in [ConfidenceMapping::Linear, ConfidenceMapping::Inverse] {
            assert_eq!(mapping.confidence(f32::NAN), 0.0);
            assert_eq!(mapping.confidence(f32::INFINITY), 0.0);
        }
    }

    #[test]
    fn test_identify_all_preserves_order() {
        let results = IdentificationPolicy::default()
            .identify_all(
                &reference(),
                &[vec![10.0, 10.1].into(), vec![5.0, 5.0].into(), vec![0.0, 0.2].into()],
            )
            .unwrap();
        let labels: Vec<String> = results.iter().map(|r| r.identity.to_string()).collect();
        assert_eq!(labels, vec!["B", "Unknown", "A"]);
    }

    #[test]
    fn test_mapping_parse() {
        assert_eq!("Inverse".parse::<ConfidenceMapping>(), Ok(ConfidenceMapping::Inverse));
        assert!("sigmoid".parse::<ConfidenceMapping>().is_err());
    }
}
