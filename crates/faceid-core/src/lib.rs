//! faceid-core — 1-NN face identification.
//!
//! Training turns a table of labeled face measurements into a scaled
//! nearest-neighbor reference set. Identification runs camera frames through
//! SCRFD detection, keypoint alignment and an ONNX embedding model, then
//! accepts the nearest identity when it lies within a distance threshold.

pub mod alignment;
pub mod annotate;
pub mod artifact;
pub mod classifier;
pub mod dataset;
pub mod detector;
pub mod embedder;
pub mod landmarks;
pub mod pipeline;
pub mod policy;
pub mod scaler;
pub mod trainer;
pub mod types;

use std::path::PathBuf;

pub use classifier::{DistanceMetric, KnnClassifier, NearestNeighbor, Neighbor, TrainedClassifier};
pub use dataset::{Dataset, SchemaError};
pub use pipeline::{
    run_live, CancellationToken, DisplaySurface, FrameSource, IdentifierContext, KeyPress, RunOptions,
    RunSummary, StopReason,
};
pub use policy::{ConfidenceMapping, IdentificationPolicy};
pub use scaler::StandardScaler;
pub use types::{
    BoundingBox, Detection, FeatureVector, Frame, IdentificationResult, IdentifiedFace, Identity,
    LabeledSample,
};

/// `$XDG_DATA_HOME/faceid/models`, falling back to `~/.local/share/faceid/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid/models")
}
