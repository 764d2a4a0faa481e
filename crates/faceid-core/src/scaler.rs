//! Per-feature standardization (zero mean, unit variance).

use crate::types::FeatureVector;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScalerError {
    #[error("cannot fit a scaler on an empty sample set")]
    Empty,
    #[error("dimension mismatch: scaler expects {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid scaler {name}[{index}] = {value}")]
    InvalidParameter { name: &'static str, index: usize, value: f32 },
}

/// Fitted standardization transform: `(x - mean) / scale` per feature.
///
/// Scale is the population standard deviation. Constant features get a scale
/// of 1.0, so they are centered but never divided by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl StandardScaler {
    /// Fit mean and scale over `rows`. All rows must share one dimensionality.
    pub fn fit<'a, I>(rows: I) -> Result<Self, ScalerError>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
        I::IntoIter: Clone,
    {
        let rows = rows.into_iter();
        let dim = rows.clone().next().ok_or(ScalerError::Empty)?.dim();

        let mut sum = vec![0.0f64; dim];
        let mut count = 0usize;
        for row in rows.clone() {
            if row.dim() != dim {
                return Err(ScalerError::DimensionMismatch { expected: dim, actual: row.dim() });
            }
            for (acc, &x) in sum.iter_mut().zip(row.as_slice()) {
                *acc += x as f64;
            }
            count += 1;
        }
        let mean: Vec<f64> = sum.iter().map(|s| s / count as f64).collect();

        let mut sq = vec![0.0f64; dim];
        for row in rows {
            for ((acc, &x), m) in sq.iter_mut().zip(row.as_slice()).zip(&mean) {
                *acc += (x as f64 - m).powi(2);
            }
        }
        let scale = sq
            .iter()
            .map(|s| {
                let std = (s / count as f64).sqrt();
                if std > f64::EPSILON { std as f32 } else { 1.0 }
            })
            .collect();

        tracing::debug!(dim, samples = count, "fitted standard scaler");

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            scale,
        })
    }

    /// Build a scaler from known parameters.
    ///
    /// Every mean must be finite and every scale finite and positive.
    pub fn from_parts(mean: Vec<f32>, scale: Vec<f32>) -> Result<Self, ScalerError> {
        if mean.len() != scale.len() {
            return Err(ScalerError::DimensionMismatch {
                expected: mean.len(),
                actual: scale.len(),
            });
        }
        if let Some((index, &value)) = mean.iter().enumerate().find(|(_, m)| !m.is_finite()) {
            return Err(ScalerError::InvalidParameter { name: "mean", index, value });
        }
        if let Some((index, &value)) = scale.iter().enumerate().find(|(_, s)| !(s.is_finite() && **s > 0.0)) {
            return Err(ScalerError::InvalidParameter { name: "scale", index, value });
        }
        Ok(Self { mean, scale })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn scale(&self) -> &[f32] {
        &self.scale
    }

    pub fn transform(&self, v: &FeatureVector) -> Result<FeatureVector, ScalerError> {
        if v.dim() != self.dim() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.dim(),
                actual: v.dim(),
            });
        }
        Ok(v.as_slice()
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((x, m), s)| (x - m) / s)
            .collect::<Vec<f32>>()
            .into())
    }

    /// SHA-256 hex digest over mean and scale. Ties a classifier to the scaler
    /// its reference set was transformed with.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.dim() as u64).to_le_bytes());
        for x in self.mean.iter().chain(&self.scale) {
            hasher.update(x.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rows(data: &[&[f32]]) -> Vec<FeatureVector> {
        data.iter().map(|r| FeatureVector::new(r.to_vec())).collect()
    }

    #[test]
    fn test_fit_mean_and_population_std() {
        let data = rows(&[&[1.0, 10.0], &[3.0, 10.0], &[5.0, 10.0]]);
        let scaler = StandardScaler::fit(&data).unwrap();

        assert_relative_eq!(scaler.mean()[0], 3.0);
        assert_relative_eq!(scaler.mean()[1], 10.0);
        // population std of [1, 3, 5] = sqrt(8/3)
        assert_relative_eq!(scaler.scale()[0], (8.0f32 / 3.0).sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_constant_feature_gets_unit_scale() {
        let data = rows(&[&[7.0], &[7.0]]);
        let scaler = StandardScaler::fit(&data).unwrap();
        assert_eq!(scaler.scale(), &[1.0]);

        let out = scaler.transform(&FeatureVector::new(vec![7.0])).unwrap();
        assert_eq!(out.as_slice(), &[0.0]);
    }

    #[test]
    fn test_transform_standardizes() {
        let data = rows(&[&[0.0], &[2.0]]);
        let scaler = StandardScaler::fit(&data).unwrap();
        let out = scaler.transform(&FeatureVector::new(vec![2.0])).unwrap();
        assert_relative_eq!(out.as_slice()[0], 1.0);
    }

    #[test]
    fn test_fit_empty() {
        let data: Vec<FeatureVector> = Vec::new();
        assert!(matches!(StandardScaler::fit(&data), Err(ScalerError::Empty)));
    }

    #[test]
    fn test_fit_ragged_rows() {
        let data = rows(&[&[1.0, 2.0], &[1.0]]);
        assert!(matches!(
            StandardScaler::fit(&data),
            Err(ScalerError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_transform_dimension_mismatch() {
        let scaler = StandardScaler::from_parts(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let err = scaler.transform(&FeatureVector::new(vec![1.0])).unwrap_err();
        assert!(matches!(err, ScalerError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_from_parts_rejects_bad_parameters() {
        for scale in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let err = StandardScaler::from_parts(vec![0.0, 0.0], vec![1.0, scale]).unwrap_err();
            assert!(
                matches!(err, ScalerError::InvalidParameter { name: "scale", index: 1, .. }),
                "scale {scale} accepted"
            );
        }
        let err = StandardScaler::from_parts(vec![f32::NAN], vec![1.0]).unwrap_err();
        assert!(matches!(err, ScalerError::InvalidParameter { name: "mean", index: 0, .. }));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = StandardScaler::from_parts(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();
        let b = StandardScaler::from_parts(vec![1.0, 2.0], vec![3.0, 4.0]).unwrap();
        let c = StandardScaler::from_parts(vec![1.0, 2.0], vec![3.0, 4.5]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
