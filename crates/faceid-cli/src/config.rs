use anyhow::{Context, Result};
use faceid_core::ConfidenceMapping;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CLASSIFIER_PATH: &str = "knn_model.json";
const DEFAULT_SCALER_PATH: &str = "scaler_model.json";
const DEFAULT_PREVIEW_PATH: &str = "faceid-preview.png";
const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const EMBEDDER_MODEL_FILE: &str = "face_embedding_128.onnx";

/// Optional settings read from the TOML file named by `FACEID_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    model_dir: Option<PathBuf>,
    detector_model: Option<PathBuf>,
    embedder_model: Option<PathBuf>,
    embedding_dim: Option<usize>,
    classifier_path: Option<PathBuf>,
    scaler_path: Option<PathBuf>,
    distance_threshold: Option<f32>,
    detection_threshold: Option<f32>,
    confidence_mapping: Option<ConfidenceMapping>,
    preview_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
}

/// Resolved settings: environment over config file over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub width: u32,
    pub height: u32,
    /// Directory holding the ONNX models.
    pub model_dir: PathBuf,
    pub detector_model: PathBuf,
    pub embedder_model: PathBuf,
    /// Length of embedder output; must match the trained classifier.
    pub embedding_dim: usize,
    pub classifier_path: PathBuf,
    pub scaler_path: PathBuf,
    /// Maximum nearest-neighbor distance accepted as a known identity.
    pub distance_threshold: f32,
    /// Minimum SCRFD score for a face box.
    pub detection_threshold: f32,
    pub confidence_mapping: ConfidenceMapping,
    /// Where the live preview frame is written.
    pub preview_path: PathBuf,
    /// Caption font; a system font is searched for when unset.
    pub font_path: Option<PathBuf>,
}

impl Config {
    /// Read `FACEID_CONFIG` (if set) and the `FACEID_*` environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEID_CONFIG").map(PathBuf::from));

        let Some(path) = path else {
            return Ok(Self::from_env());
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let file: FileConfig =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");

        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Load configuration from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::resolve(FileConfig::default(), |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| env(key).map(PathBuf::from);

        let model_dir = path("FACEID_MODEL_DIR")
            .or(file.model_dir)
            .unwrap_or_else(faceid_core::default_model_dir);

        let detector_model = path("FACEID_DETECTOR_MODEL")
            .or(file.detector_model)
            .unwrap_or_else(|| model_dir.join(DETECTOR_MODEL_FILE));
        let embedder_model = path("FACEID_EMBEDDER_MODEL")
            .or(file.embedder_model)
            .unwrap_or_else(|| model_dir.join(EMBEDDER_MODEL_FILE));

        Self {
            camera_device: env("FACEID_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: parse_var(&env, "FACEID_WIDTH").or(file.width).unwrap_or(640),
            height: parse_var(&env, "FACEID_HEIGHT").or(file.height).unwrap_or(480),
            model_dir,
            detector_model,
            embedder_model,
            embedding_dim: parse_var(&env, "FACEID_EMBEDDING_DIM")
                .or(file.embedding_dim)
                .unwrap_or(faceid_core::embedder::DEFAULT_EMBEDDING_DIM),
            classifier_path: path("FACEID_CLASSIFIER_PATH")
                .or(file.classifier_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSIFIER_PATH)),
            scaler_path: path("FACEID_SCALER_PATH")
                .or(file.scaler_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCALER_PATH)),
            distance_threshold: parse_var(&env, "FACEID_DISTANCE_THRESHOLD")
                .or(file.distance_threshold)
                .unwrap_or(faceid_core::policy::DEFAULT_DISTANCE_THRESHOLD),
            detection_threshold: parse_var(&env, "FACEID_DETECTION_THRESHOLD")
                .or(file.detection_threshold)
                .unwrap_or(faceid_core::detector::DEFAULT_DETECTION_THRESHOLD),
            confidence_mapping: parse_var(&env, "FACEID_CONFIDENCE_MAPPING")
                .or(file.confidence_mapping)
                .unwrap_or_default(),
            preview_path: path("FACEID_PREVIEW_PATH")
                .or(file.preview_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH)),
            font_path: path("FACEID_FONT").or(file.font_path),
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.detector_model.to_string_lossy().into_owned()
    }

    pub fn embedder_model_path(&self) -> String {
        self.embedder_model.to_string_lossy().into_owned()
    }
}

fn parse_var<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}
