use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for a face whose nearest reference sample is too far away.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Five facial keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Keypoints = [(f32, f32); 5];

/// Bounding box for a detected face, with optional facial keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Keypoints>,
}

impl BoundingBox {
    /// Integer (left, top, width, height) clipped to an image of the given size.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<(i32, i32, u32, u32)> {
        let left = self.x.round().max(0.0);
        let top = self.y.round().max(0.0);
        let right = (self.x + self.width).round().min(image_width as f32);
        let bottom = (self.y + self.height).round().min(image_height as f32);

        if right <= left || bottom <= top {
            return None;
        }
        Some((
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// A fixed-length feature vector: a face embedding or one row of face measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance. Both vectors must have the same dimensionality.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Zero vectors have similarity 0.
    pub fn cosine_similarity(&self, other: &FeatureVector) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Scale to unit L2 norm. A zero vector is returned unchanged.
    pub fn l2_normalized(mut self) -> Self {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
        self
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// A reference sample: feature vector plus the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub features: FeatureVector,
    pub label: String,
}

impl LabeledSample {
    pub fn new(features: impl Into<FeatureVector>, label: impl Into<String>) -> Self {
        Self {
            features: features.into(),
            label: label.into(),
        }
    }
}

/// Who a face was identified as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn as_str(&self) -> &str {
        match self {
            Identity::Known(label) => label,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the identification policy for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationResult {
    pub identity: Identity,
    /// Display confidence in [0, 100]. Not a calibrated probability.
    pub confidence: f32,
    /// Distance to the nearest reference sample.
    pub distance: f32,
}

impl IdentificationResult {
    /// Text drawn next to the face, e.g. `alice (87.50%)`.
    pub fn caption(&self) -> String {
        format!("{} ({:.2}%)", self.identity, self.confidence)
    }
}

/// A face found in one frame, with the embedding extracted for it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub features: FeatureVector,
}

/// A detection together with its identification.
#[derive(Debug, Clone)]
pub struct IdentifiedFace {
    pub detection: Detection,
    pub result: IdentificationResult,
}

/// A captured color frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = FeatureVector::new(vec![0.0, 0.0]);
        let b = FeatureVector::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = FeatureVector::new(vec![1.0, 0.0]);
        let b = FeatureVector::new(vec![0.0, 1.0]);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = FeatureVector::new(vec![0.0, 0.0]);
        let b = FeatureVector::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn test_l2_normalized() {
        let v = FeatureVector::new(vec![3.0, 4.0]).l2_normalized();
        assert!((v.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((v.as_slice()[1] - 0.8).abs() < 1e-6);

        let zero = FeatureVector::new(vec![0.0, 0.0]).l2_normalized();
        assert_eq!(zero.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::Known("alice".into()).to_string(), "alice");
        assert_eq!(Identity::Unknown.to_string(), UNKNOWN_LABEL);
        assert!(!Identity::Unknown.is_known());
    }

    #[test]
    fn test_caption_format() {
        let result = IdentificationResult {
            identity: Identity::Known("bob".into()),
            confidence: 87.5,
            distance: 0.125,
        };
        assert_eq!(result.caption(), "bob (87.50%)");
    }

    #[test]
    fn test_clip_to_inside() {
        let bbox = BoundingBox {
            x: 10.2, y: 20.0, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(bbox.clip_to(640, 480), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clip_to_partially_outside() {
        let bbox = BoundingBox {
            x: -10.0, y: 450.0, width: 50.0, height: 50.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(bbox.clip_to(640, 480), Some((0, 450, 40, 30)));
    }

    #[test]
    fn test_clip_to_fully_outside() {
        let bbox = BoundingBox {
            x: 700.0, y: 0.0, width: 50.0, height: 50.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(bbox.clip_to(640, 480), None);
    }
}
