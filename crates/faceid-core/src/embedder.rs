//! Face embedding via ONNX Runtime.
//!
//! The face is aligned to the canonical 112×112 crop from its keypoints, then
//! passed through an ArcFace-style network. The output is L2-normalized.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{FeatureVector, Keypoints};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;

/// Embedding length expected when none is configured.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("face embedding model unavailable at {path}: {reason}")]
    ModelUnavailable { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a face (color frame plus keypoints) into a fixed-length vector.
pub trait FaceEmbedder {
    fn embed(&mut self, image: &RgbImage, keypoints: &Keypoints) -> Result<FeatureVector, EmbedderError>;

    /// Length of every vector [`embed`](Self::embed) returns.
    fn dim(&self) -> usize;
}

/// ONNX face-embedding network taking a 1×3×112×112 RGB tensor.
pub struct OnnxEmbedder {
    session: Session,
    dim: usize,
}

impl OnnxEmbedder {
    /// Load the model at `model_path`; every output must have `dim` values.
    pub fn load(model_path: &str, dim: usize) -> Result<Self, EmbedderError> {
        let unavailable = |reason: String| EmbedderError::ModelUnavailable {
            path: model_path.to_string(),
            reason,
        };

        if !Path::new(model_path).exists() {
            return Err(unavailable("file not found".into()));
        }

        let session = open_session(model_path).map_err(|e| unavailable(e.to_string()))?;

        tracing::info!(
            path = model_path,
            dim,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, dim })
    }

    /// NCHW float tensor from an aligned RGB crop.
    fn preprocess(aligned: &RgbImage) -> Array4<f32> {
        let size = ALIGNED_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in aligned.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= size || y >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, y, x]] = (pixel.0[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }
        tensor
    }
}

fn open_session(model_path: &str) -> Result<Session, EmbedderError> {
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?)
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, image: &RgbImage, keypoints: &Keypoints) -> Result<FeatureVector, EmbedderError> {
        let aligned = alignment::align_face(image, keypoints);
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.dim {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.dim,
                actual: raw.len(),
            });
        }

        Ok(FeatureVector::new(raw.to_vec()).l2_normalized())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
