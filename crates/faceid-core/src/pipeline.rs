//! The live identification loop.
//!
//! Every iteration is synchronous: acquire a frame, detect on grayscale,
//! localize landmarks, embed, identify, annotate, present. The loop is a two-state
//! machine (`Running` → `Stopped`) and leaves `Running` on end of
//! stream, the quit key, cancellation or an optional frame limit. Any
//! detection, embedding, classification or display failure aborts the run.

use crate::annotate::Annotator;
use crate::classifier::{ClassifierError, NearestNeighbor};
use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::landmarks::{LandmarkError, LandmarkPredictor};
use crate::policy::IdentificationPolicy;
use crate::types::{Detection, Frame, IdentifiedFace};
use image::{imageops, RgbImage};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameAcquisitionError {
    #[error("stream ended")]
    EndOfStream,
    #[error("frame acquisition failed: {0}")]
    Device(String),
}

#[derive(Error, Debug)]
#[error("display: {0}")]
pub struct DisplayError(pub String);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("embedder produces {embedder}-dim vectors but the classifier expects {classifier}")]
    DimensionMismatch { embedder: usize, classifier: usize },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// Produces frames until the stream ends.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, FrameAcquisitionError>;
}

/// A key read from the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    Char(char),
    Escape,
    /// Ctrl-C while the terminal is in raw mode.
    Interrupt,
}

/// Shows an annotated frame and reports at most one pending key press.
pub trait DisplaySurface {
    fn present(&mut self, frame: &RgbImage) -> Result<Option<KeyPress>, DisplayError>;
}

/// Shared flag that stops the loop before its next frame.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    QuitRequested,
    Cancelled,
    FrameLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::EndOfStream => "end of stream",
            StopReason::QuitRequested => "quit requested",
            StopReason::Cancelled => "cancelled",
            StopReason::FrameLimit => "frame limit reached",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Key that ends the loop. Escape and Ctrl-C always do.
    pub quit_key: char,
    /// Stop after this many processed frames.
    pub max_frames: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            quit_key: 'q',
            max_frames: None,
        }
    }
}

impl RunOptions {
    fn is_quit(&self, key: KeyPress) -> bool {
        match key {
            KeyPress::Char(c) => c.eq_ignore_ascii_case(&self.quit_key),
            KeyPress::Escape | KeyPress::Interrupt => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub faces: u64,
    /// Faces matched to a known identity.
    pub identified: u64,
    pub stop_reason: StopReason,
}

/// Result of processing a single frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub faces: Vec<IdentifiedFace>,
    pub annotated: RgbImage,
}

/// Everything the identifier needs, built once at startup.
pub struct IdentifierContext {
    detector: Box<dyn FaceDetector>,
    landmarks: Box<dyn LandmarkPredictor>,
    embedder: Box<dyn FaceEmbedder>,
    classifier: Box<dyn NearestNeighbor>,
    policy: IdentificationPolicy,
    annotator: Annotator,
}

impl IdentifierContext {
    /// Fails when the embedder and classifier disagree on dimensionality.
    pub fn new(
        detector: Box<dyn FaceDetector>,
        landmarks: Box<dyn LandmarkPredictor>,
        embedder: Box<dyn FaceEmbedder>,
        classifier: Box<dyn NearestNeighbor>,
        policy: IdentificationPolicy,
    ) -> Result<Self, PipelineError> {
        if embedder.dim() != classifier.dim() {
            return Err(PipelineError::DimensionMismatch {
                embedder: embedder.dim(),
                classifier: classifier.dim(),
            });
        }
        Ok(Self {
            detector,
            landmarks,
            embedder,
            classifier,
            policy,
            annotator: Annotator::without_font(),
        })
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn policy(&self) -> &IdentificationPolicy {
        &self.policy
    }

    /// Identify every face in `frame`, in detector order.
    pub fn identify(&mut self, frame: &RgbImage) -> Result<Vec<IdentifiedFace>, PipelineError> {
        let gray = imageops::grayscale(frame);
        let boxes = self.detector.detect(&gray)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let keypoints = self.landmarks.predict(&gray, &bbox)?;
            let features = self.embedder.embed(frame, &keypoints)?;
            let result = self.policy.identify(self.classifier.as_ref(), &features)?;
            faces.push(IdentifiedFace {
                detection: Detection { bbox, features },
                result,
            });
        }
        Ok(faces)
    }

    /// Identify and annotate one frame.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameOutcome, PipelineError> {
        let faces = self.identify(frame)?;
        let annotated = self.annotator.annotate(frame, &faces);
        Ok(FrameOutcome { faces, annotated })
    }

    /// Release the models: detector, landmark predictor, embedder, then the
    /// reference set.
    pub fn close(self) {
        let Self {
            detector,
            landmarks,
            embedder,
            classifier,
            ..
        } = self;
        drop(detector);
        drop(landmarks);
        drop(embedder);
        drop(classifier);
        tracing::info!("identifier context released");
    }
}

/// Run the loop until it stops, returning what it did.
pub fn run_live<S, D>(
    ctx: &mut IdentifierContext,
    source: &mut S,
    display: &mut D,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource + ?Sized,
    D: DisplaySurface + ?Sized,
{
    let mut frames = 0u64;
    let mut faces = 0u64;
    let mut identified = 0u64;
    let mut state = PipelineState::Running;

    tracing::info!(quit_key = %options.quit_key, max_frames = ?options.max_frames, "identification loop started");

    let stop_reason = loop {
        if let PipelineState::Stopped(reason) = state {
            break reason;
        }

        if cancel.is_cancelled() {
            state = PipelineState::Stopped(StopReason::Cancelled);
            continue;
        }
        if options.max_frames.is_some_and(|max| frames >= max) {
            state = PipelineState::Stopped(StopReason::FrameLimit);
            continue;
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::info!(reason = %e, "frame source exhausted");
                state = PipelineState::Stopped(StopReason::EndOfStream);
                continue;
            }
        };

        let outcome = ctx.process_frame(&frame.image)?;
        frames += 1;
        faces += outcome.faces.len() as u64;
        identified += outcome.faces.iter().filter(|f| f.result.identity.is_known()).count() as u64;

        for face in &outcome.faces {
            tracing::debug!(
                frame = frame.sequence,
                label = %face.result.identity,
                confidence = face.result.confidence,
                distance = face.result.distance,
                "face identified"
            );
        }

        if let Some(key) = display.present(&outcome.annotated)? {
            if options.is_quit(key) {
                state = PipelineState::Stopped(StopReason::QuitRequested);
            }
        }
    };

    let summary = RunSummary {
        frames,
        faces,
        identified,
        stop_reason,
    };
    tracing::info!(
        frames,
        faces,
        identified,
        reason = %stop_reason,
        "identification loop stopped"
    );
    Ok(summary)
}
