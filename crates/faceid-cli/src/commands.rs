use crate::config::Config;
use crate::display::{CameraSource, PreviewDisplay};
use anyhow::{Context, Result};
use faceid_core::annotate::Annotator;
use faceid_core::artifact::{self, LoadedModel};
use faceid_core::detector::ScrfdDetector;
use faceid_core::embedder::OnnxEmbedder;
use faceid_core::landmarks::DetectorKeypoints;
use faceid_core::trainer::{self, TrainConfig};
use faceid_core::{
    run_live, CancellationToken, Dataset, IdentificationPolicy, IdentifiedFace, IdentifierContext, RunOptions,
};
use faceid_hw::{Camera, Resolution};
use std::future::Future;
use std::path::Path;
use std::thread::{self, JoinHandle};

pub fn train(config: &Config, data: &Path, label_column: &str, train_config: &TrainConfig) -> Result<()> {
    let dataset = Dataset::load_csv(data, label_column)
        .with_context(|| format!("loading dataset {}", data.display()))?;
    let model = trainer::train(dataset, train_config)?;
    artifact::save_model(&model, &config.classifier_path, &config.scaler_path)?;

    println!("{}", accuracy_line(model.report.accuracy));
    Ok(())
}

fn accuracy_line(accuracy: Option<f64>) -> String {
    match accuracy {
        Some(accuracy) => format!("Accuracy: {accuracy:?}"),
        None => "Accuracy: n/a (no rows held out)".to_string(),
    }
}

fn load_model(config: &Config) -> Result<LoadedModel> {
    artifact::load_model(&config.classifier_path, &config.scaler_path).with_context(|| {
        format!(
            "loading classifier {} with scaler {}",
            config.classifier_path.display(),
            config.scaler_path.display()
        )
    })
}

/// Load the models and wire up the per-frame identifier.
fn build_context(config: &Config, mean_shape_fallback: bool) -> Result<IdentifierContext> {
    let model = load_model(config)?;

    let detector = ScrfdDetector::load(&config.detector_model_path(), config.detection_threshold)?;
    let embedder = OnnxEmbedder::load(&config.embedder_model_path(), config.embedding_dim)?;
    let landmarks = if mean_shape_fallback {
        DetectorKeypoints::with_mean_shape_fallback()
    } else {
        DetectorKeypoints::strict()
    };
    let policy = IdentificationPolicy::new(config.distance_threshold, config.confidence_mapping);

    let annotator = match &config.font_path {
        Some(path) => Annotator::load_font(path)?,
        None => Annotator::with_system_font(),
    };

    tracing::info!(
        threshold = policy.threshold,
        mapping = %policy.mapping,
        classes = model.classifier.knn().classes().len(),
        "identifier ready"
    );

    let ctx = IdentifierContext::new(
        Box::new(detector),
        Box::new(landmarks),
        Box::new(embedder),
        Box::new(model.classifier),
        policy,
    )?;
    Ok(ctx.with_annotator(annotator))
}

pub fn identify(config: &Config, mean_shape_fallback: bool, max_frames: Option<u64>, headless: bool) -> Result<()> {
    let mut ctx = build_context(config, mean_shape_fallback)?;

    let camera = Camera::open(
        &config.camera_device,
        Resolution {
            width: config.width,
            height: config.height,
        },
    )?;
    let mut source = CameraSource::new(camera.stream()?);
    let mut display = PreviewDisplay::new(&config.preview_path, !headless)?;

    if !headless {
        eprint!("Writing frames to {}. Press q to quit.\r\n", config.preview_path.display());
    }

    let options = RunOptions {
        max_frames,
        ..RunOptions::default()
    };
    let cancel = CancellationToken::new();
    let _interrupt = cancel_on(tokio::signal::ctrl_c(), cancel.clone())?;
    let result = run_live(&mut ctx, &mut source, &mut display, &options, &cancel);

    // Restore the terminal and release the device before reporting.
    drop(display);
    drop(source);
    drop(camera);
    ctx.close();

    let summary = result?;
    println!(
        "Stopped ({}): {} frames, {} faces, {} identified",
        summary.stop_reason, summary.frames, summary.faces, summary.identified
    );
    Ok(())
}

/// Cancel `cancel` once `signal` resolves, waiting on a background thread.
fn cancel_on<F>(signal: F, cancel: CancellationToken) -> Result<JoinHandle<()>>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting signal runtime")?;
    let handle = thread::Builder::new()
        .name("faceid-signal".into())
        .spawn(move || match runtime.block_on(signal) {
            Ok(()) => {
                tracing::info!("interrupt received, stopping before the next frame");
                cancel.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "not listening for Ctrl-C"),
        })
        .context("spawning signal thread")?;
    Ok(handle)
}

pub fn classify(config: &Config, mean_shape_fallback: bool, image_path: &Path, output: Option<&Path>) -> Result<()> {
    let mut ctx = build_context(config, mean_shape_fallback)?;
    let frame = image::open(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?
        .to_rgb8();

    let outcome = ctx.process_frame(&frame)?;
    if outcome.faces.is_empty() {
        println!("No faces found");
    }
    for face in &outcome.faces {
        println!("{}", describe(face));
    }

    if let Some(output) = output {
        outcome
            .annotated
            .save(output)
            .with_context(|| format!("writing {}", output.display()))?;
        tracing::info!(path = %output.display(), "annotated image written");
    }
    ctx.close();
    Ok(())
}

fn describe(face: &IdentifiedFace) -> String {
    let b = &face.detection.bbox;
    format!(
        "{} at ({:.0}, {:.0}) {:.0}x{:.0}, distance {:.4}",
        face.result.caption(),
        b.x,
        b.y,
        b.width,
        b.height,
        face.result.distance
    )
}

pub fn inspect(config: &Config) -> Result<()> {
    let model = load_model(config)?;
    let knn = model.classifier.knn();
    let report = &model.info.report;

    println!("Classifier:   {}", config.classifier_path.display());
    println!("Scaler:       {}", config.scaler_path.display());
    println!("Trained at:   {}", model.info.trained_at.to_rfc3339());
    println!("Metric:       {} (k=1)", knn.metric());
    println!("Dimensions:   {}", knn.dim());
    println!("Samples:      {}", knn.samples().len());
    println!("Classes:      {}", knn.classes().join(", "));
    match report.accuracy {
        Some(acc) => println!("Accuracy:     {acc} ({} held out, seed {})", report.test_samples, report.seed),
        None => println!("Accuracy:     n/a"),
    }
    println!("Features:     {}", report.feature_names.join(", "));
    println!("Fingerprint:  {}", model.info.scaler_fingerprint);
    Ok(())
}

pub fn devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}
