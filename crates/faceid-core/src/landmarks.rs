//! Facial landmark localization: image + face box → five keypoints.

use crate::alignment::{ALIGNED_SIZE, REFERENCE_KEYPOINTS};
use crate::types::{BoundingBox, Keypoints};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("face box carries no keypoints; the detector must emit them")]
    NoKeypoints,
    #[error("face box has non-positive size {width}x{height}")]
    DegenerateBox { width: f32, height: f32 },
}

/// Predicts the five facial keypoints for a detected face.
pub trait LandmarkPredictor {
    fn predict(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Keypoints, LandmarkError>;
}

/// Places the canonical keypoint layout inside the face box.
///
/// A fallback for detectors without keypoint heads: the result is only as
/// good as the box is tight and upright.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanShapePredictor;

impl LandmarkPredictor for MeanShapePredictor {
    fn predict(&mut self, _image: &GrayImage, face: &BoundingBox) -> Result<Keypoints, LandmarkError> {
        if face.width <= 0.0 || face.height <= 0.0 {
            return Err(LandmarkError::DegenerateBox {
                width: face.width,
                height: face.height,
            });
        }
        let sx = face.width / ALIGNED_SIZE as f32;
        let sy = face.height / ALIGNED_SIZE as f32;
        Ok(REFERENCE_KEYPOINTS.map(|(x, y)| (face.x + x * sx, face.y + y * sy)))
    }
}

/// Uses the keypoints SCRFD emits alongside each box.
///
/// Boxes without keypoints are an error unless the mean-shape fallback is
/// enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetectorKeypoints {
    fallback: Option<MeanShapePredictor>,
}

impl DetectorKeypoints {
    pub fn strict() -> Self {
        Self { fallback: None }
    }

    pub fn with_mean_shape_fallback() -> Self {
        Self {
            fallback: Some(MeanShapePredictor),
        }
    }
}

impl LandmarkPredictor for DetectorKeypoints {
    fn predict(&mut self, image: &GrayImage, face: &BoundingBox) -> Result<Keypoints, LandmarkError> {
        match (face.landmarks, self.fallback.as_mut()) {
            (Some(kps), _) => Ok(kps),
            (None, Some(mean_shape)) => mean_shape.predict(image, face),
            (None, None) => Err(LandmarkError::NoKeypoints),
        }
    }
}
