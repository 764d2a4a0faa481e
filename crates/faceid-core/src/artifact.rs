//! On-disk classifier and scaler artifacts (JSON).
//!
//! The classifier file records the fingerprint of the scaler its reference
//! set was transformed with, so a classifier can never be paired with a
//! different scaler at load time.

use crate::classifier::{ClassifierError, DistanceMetric, KnnClassifier, TrainedClassifier};
use crate::scaler::{ScalerError, StandardScaler};
use crate::trainer::{TrainedModel, TrainingReport};
use crate::types::LabeledSample;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Version written into both artifacts; bumped on incompatible layout changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: invalid artifact: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("unsupported artifact format version {found} (expected {expected})", expected = FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("unsupported neighbor count k={0}; only k=1 is implemented")]
    UnsupportedK(usize),
    #[error("scaler fingerprint mismatch: classifier was trained with {expected}, scaler file has {found}")]
    ScalerMismatch { expected: String, found: String },
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("scaler: {0}")]
    Scaler(#[from] ScalerError),
}

#[derive(Debug, Serialize, Deserialize)]
struct ClassifierFile {
    format_version: u32,
    k: usize,
    metric: DistanceMetric,
    scaler_fingerprint: String,
    trained_at: DateTime<Utc>,
    report: TrainingReport,
    samples: Vec<LabeledSample>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScalerFile {
    format_version: u32,
    feature_names: Vec<String>,
    mean: Vec<f32>,
    scale: Vec<f32>,
    fingerprint: String,
}

/// Descriptive metadata stored with a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub trained_at: DateTime<Utc>,
    pub report: TrainingReport,
    pub scaler_fingerprint: String,
}

/// A classifier/scaler pair read back from disk.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub classifier: TrainedClassifier,
    pub info: ModelInfo,
}

/// Write the classifier and scaler of `model` to two JSON files.
pub fn save_model(
    model: &TrainedModel,
    classifier_path: &Path,
    scaler_path: &Path,
) -> Result<(), ArtifactError> {
    let scaler = model.classifier.scaler();
    let knn = model.classifier.knn();
    let fingerprint = scaler.fingerprint();

    let scaler_file = ScalerFile {
        format_version: FORMAT_VERSION,
        feature_names: model.report.feature_names.clone(),
        mean: scaler.mean().to_vec(),
        scale: scaler.scale().to_vec(),
        fingerprint: fingerprint.clone(),
    };
    let classifier_file = ClassifierFile {
        format_version: FORMAT_VERSION,
        k: KnnClassifier::K,
        metric: knn.metric(),
        scaler_fingerprint: fingerprint,
        trained_at: Utc::now(),
        report: model.report.clone(),
        samples: knn.samples().to_vec(),
    };

    write_json(scaler_path, &scaler_file)?;
    write_json(classifier_path, &classifier_file)?;

    tracing::info!(
        classifier = %classifier_path.display(),
        scaler = %scaler_path.display(),
        samples = classifier_file.samples.len(),
        "saved model artifacts"
    );
    Ok(())
}

/// Read a classifier/scaler pair and check that they belong together.
pub fn load_model(classifier_path: &Path, scaler_path: &Path) -> Result<LoadedModel, ArtifactError> {
    let scaler = load_scaler(scaler_path)?;
    let file: ClassifierFile = read_json(classifier_path)?;

    if file.format_version != FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedVersion { found: file.format_version });
    }
    if file.k != KnnClassifier::K {
        return Err(ArtifactError::UnsupportedK(file.k));
    }

    let found = scaler.fingerprint();
    if file.scaler_fingerprint != found {
        return Err(ArtifactError::ScalerMismatch {
            expected: file.scaler_fingerprint,
            found,
        });
    }

    let knn = KnnClassifier::fit(file.samples, file.metric)?;
    let classifier = TrainedClassifier::new(knn, scaler)?;

    tracing::info!(
        path = %classifier_path.display(),
        samples = classifier.knn().samples().len(),
        classes = classifier.knn().classes().len(),
        dim = classifier.dim(),
        metric = %classifier.knn().metric(),
        "loaded classifier"
    );

    Ok(LoadedModel {
        classifier,
        info: ModelInfo {
            trained_at: file.trained_at,
            report: file.report,
            scaler_fingerprint: file.scaler_fingerprint,
        },
    })
}

/// Read a scaler artifact on its own.
pub fn load_scaler(path: &Path) -> Result<StandardScaler, ArtifactError> {
    let file: ScalerFile = read_json(path)?;
    if file.format_version != FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedVersion { found: file.format_version });
    }

    let scaler = StandardScaler::from_parts(file.mean, file.scale)?;
    let found = scaler.fingerprint();
    if found != file.fingerprint {
        return Err(ArtifactError::ScalerMismatch {
            expected: file.fingerprint,
            found,
        });
    }
    Ok(scaler)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let io_err = |source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    writer.flush().map_err(io_err)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let file = File::open(path).map_err(|source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })
}
