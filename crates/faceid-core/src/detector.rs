//! Face detection: the [`FaceDetector`] capability and an SCRFD implementation
//! running on ONNX Runtime.
//!
//! SCRFD is anchor-free with three output strides. Each stride yields scores,
//! box offsets and five keypoints per anchor; overlapping boxes are merged by
//! non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Minimum detection score kept by default.
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detection model unavailable at {path}: {reason}")]
    ModelUnavailable { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a grayscale image.
///
/// Boxes come back in the detector's own order, which callers must not rely
/// on being stable across frames.
pub trait FaceDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Scale and padding applied when fitting a frame into the square model input.
///
/// Padding is the whole-pixel offset the resized frame is placed at.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
        let letterbox = Self {
            scale,
            pad_x: (target - new_w) / 2,
            pad_y: (target - new_h) / 2,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD face detector.
pub struct ScrfdDetector {
    session: Session,
    threshold: f32,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load an SCRFD ONNX model, keeping detections scoring above `threshold`.
    pub fn load(model_path: &str, threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelUnavailable {
                path: model_path.to_string(),
                reason: "file not found".into(),
            });
        }

        let session = open_session(model_path).map_err(|e| DetectorError::ModelUnavailable {
            path: model_path.to_string(),
            reason: e.to_string(),
        })?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            threshold,
            "loaded SCRFD detector"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::ModelUnavailable {
                path: model_path.to_string(),
                reason: format!(
                    "SCRFD needs 9 outputs (3 strides x score/bbox/kps), model has {}",
                    output_names.len()
                ),
            });
        }

        let stride_outputs = map_stride_outputs(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self {
            session,
            threshold,
            stride_outputs,
        })
    }

    fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
        let size = SCRFD_INPUT_SIZE;
        let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height(), size);
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        // Padding is left at zero, which is what SCRFD_MEAN normalizes to.
        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let v = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }

        (tensor, letterbox)
    }
}

fn open_session(model_path: &str) -> Result<Session, DetectorError> {
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?)
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "keypoints")?;

            candidates.extend(decode_stride(
                StrideTensors { scores, bboxes, kps },
                stride,
                SCRFD_INPUT_SIZE as usize,
                &letterbox,
                self.threshold,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detect");
        Ok(faces)
    }
}

/// Resolve which output tensor holds which stride's scores, boxes and keypoints.
///
/// Exports named `score_8`, `bbox_16`, `kps_32`, ... are mapped by name in any
/// order. Anything else falls back to the standard positional layout:
/// [0-2] scores, [3-5] boxes, [6-8] keypoints.
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => {
            tracing::debug!("SCRFD: name-based output mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::debug!(?names, "SCRFD: positional output mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

struct StrideTensors<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode one stride's anchors into frame-space boxes above `threshold`.
fn decode_stride(
    t: StrideTensors<'_>,
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = t.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(b) = t.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * s;
        let ay = (cell / grid) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
        let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

        let landmarks = t.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Non-maximum suppression; survivors are ordered by descending confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlap_and_orders() {
        let boxes = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(boxes, SCRFD_NMS_THRESHOLD);
        let confs: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), SCRFD_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let (lb, w, h) = Letterbox::fit(1280, 720, 640);
        assert_eq!((w, h), (640, 360));
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);

        let (x, y) = lb.unmap(100.0 * lb.scale, 50.0 * lb.scale + 140.0);
        assert!((x - 100.0).abs() < 1e-3);
        assert!((y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_odd_padding_unmaps_to_placed_pixels() {
        // 640x637 leaves 3 rows of padding: the frame sits at row 1
        let image = GrayImage::from_pixel(SCRFD_INPUT_SIZE, 637, image::Luma([255]));
        let (tensor, lb) = ScrfdDetector::preprocess(&image);
        assert_eq!(lb.pad_y, 1);

        let filled = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert!((tensor[[0, 0, 1, 0]] - filled).abs() < 1e-2);
        assert!((tensor[[0, 0, 637, 0]] - filled).abs() < 1e-2);
        assert_eq!(tensor[[0, 0, 638, 0]], 0.0);

        // first and last placed rows map back onto the frame's edges
        assert_eq!(lb.unmap(0.0, 1.0), (0.0, 0.0));
        assert_eq!(lb.unmap(0.0, 637.0).1, 636.0);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let image = GrayImage::from_pixel(320, 160, image::Luma([255]));
        let (tensor, lb) = ScrfdDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160);
        // top padding row
        assert_eq!(tensor[[0, 0, 0, 320]], 0.0);
        // inside the image
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - expected).abs() < 1e-2);
    }

    #[test]
    fn test_map_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();
        assert_eq!(map_stride_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_map_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (428 + i).to_string()).collect();
        assert_eq!(map_stride_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        let input = 64usize;
        let stride = 32usize;
        let anchors = (input / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];

        // anchor 3 -> cell 1 -> grid (x=1, y=0) -> centre (32, 0)
        scores[3] = 0.9;
        bboxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let boxes = decode_stride(
            StrideTensors { scores: &scores, bboxes: &bboxes, kps: &kps },
            stride,
            input,
            &lb,
            DEFAULT_DETECTION_THRESHOLD,
        );
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!((b.x, b.y, b.width, b.height), (16.0, 0.0, 32.0, 32.0));
        assert_eq!(b.landmarks.unwrap()[0], (48.0, 16.0));
    }
}
