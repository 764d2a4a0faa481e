//! Drawing identification results onto a copy of the frame.

use crate::types::IdentifiedFace;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const CAPTION_PADDING: u32 = 2;
const DEFAULT_TEXT_HEIGHT: f32 = 18.0;

/// Fonts tried by [`Annotator::with_system_font`], in order.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not a usable font")]
    InvalidFont { path: String },
}

/// Draws a box per face and, when a font is available, a
/// `"<label> (<confidence>%)"` caption above it.
///
/// Known faces are drawn in green, unknown faces in red.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::without_font()
    }
}

impl Annotator {
    /// Boxes only; captions are skipped.
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: PxScale::from(DEFAULT_TEXT_HEIGHT),
        }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(font),
            scale: PxScale::from(DEFAULT_TEXT_HEIGHT),
        }
    }

    /// Load a TrueType/OpenType font from `path`.
    pub fn load_font(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| AnnotateError::InvalidFont {
            path: path.display().to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded caption font");
        Ok(Self::with_font(font))
    }

    /// Use the first common system font found; boxes only if none is.
    pub fn with_system_font() -> Self {
        let found = FONT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .find_map(|p| Self::load_font(&p).ok());

        found.unwrap_or_else(|| {
            tracing::warn!("no system font found; captions will not be drawn");
            Self::without_font()
        })
    }

    pub fn text_height(mut self, px: f32) -> Self {
        self.scale = PxScale::from(px);
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Return an annotated copy of `frame`; the input is left untouched.
    pub fn annotate(&self, frame: &RgbImage, faces: &[IdentifiedFace]) -> RgbImage {
        let mut canvas = frame.clone();
        for face in faces {
            self.draw_face(&mut canvas, face);
        }
        canvas
    }

    fn draw_face(&self, canvas: &mut RgbImage, face: &IdentifiedFace) {
        let Some((left, top, width, height)) = face.detection.bbox.clip_to(canvas.width(), canvas.height())
        else {
            return;
        };
        let color = if face.result.identity.is_known() {
            KNOWN_COLOR
        } else {
            UNKNOWN_COLOR
        };

        for inset in 0..BOX_THICKNESS {
            let (w, h) = (width.saturating_sub(2 * inset), height.saturating_sub(2 * inset));
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(left + inset as i32, top + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        if let Some(font) = &self.font {
            let caption = face.result.caption();
            let (text_w, text_h) = text_size(self.scale, font, &caption);
            let bar_w = text_w + 2 * CAPTION_PADDING;
            let bar_h = text_h + 2 * CAPTION_PADDING;

            // Above the box when there is room, otherwise inside its top edge.
            let bar_top = if top >= bar_h as i32 { top - bar_h as i32 } else { top };
            draw_filled_rect_mut(canvas, Rect::at(left, bar_top).of_size(bar_w, bar_h), color);
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                left + CAPTION_PADDING as i32,
                bar_top + CAPTION_PADDING as i32,
                self.scale,
                font,
                &caption,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Detection, FeatureVector, IdentificationResult, Identity};

    const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

    fn face(identity: Identity, x: f32, y: f32) -> IdentifiedFace {
        IdentifiedFace {
            detection: Detection {
                bbox: BoundingBox {
                    x,
                    y,
                    width: 40.0,
                    height: 30.0,
                    confidence: 0.9,
                    landmarks: None,
                },
                features: FeatureVector::new(vec![0.0]),
            },
            result: IdentificationResult {
                identity,
                confidence: 90.0,
                distance: 0.1,
            },
        }
    }

    #[test]
    fn test_no_faces_leaves_frame_unchanged() {
        let frame = RgbImage::from_pixel(64, 48, BACKGROUND);
        let out = Annotator::without_font().annotate(&frame, &[]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_known_face_green_box() {
        let frame = RgbImage::from_pixel(100, 80, BACKGROUND);
        let out = Annotator::without_font().annotate(&frame, &[face(Identity::Known("amy".into()), 10.0, 20.0)]);

        assert_eq!(*out.get_pixel(10, 20), KNOWN_COLOR);
        assert_eq!(*out.get_pixel(11, 21), KNOWN_COLOR);
        assert_eq!(*out.get_pixel(49, 49), KNOWN_COLOR);
        // interior and outside untouched
        assert_eq!(*out.get_pixel(30, 35), BACKGROUND);
        assert_eq!(*out.get_pixel(5, 5), BACKGROUND);
        // source frame is not modified
        assert_eq!(*frame.get_pixel(10, 20), BACKGROUND);
    }

    #[test]
    fn test_unknown_face_red_box() {
        let frame = RgbImage::from_pixel(100, 80, BACKGROUND);
        let out = Annotator::without_font().annotate(&frame, &[face(Identity::Unknown, 50.0, 10.0)]);
        assert_eq!(*out.get_pixel(50, 10), UNKNOWN_COLOR);
    }

    #[test]
    fn test_box_outside_frame_skipped() {
        let frame = RgbImage::from_pixel(32, 32, BACKGROUND);
        let out = Annotator::without_font().annotate(&frame, &[face(Identity::Unknown, 100.0, 100.0)]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_load_font_errors() {
        let missing = Annotator::load_font(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(missing, Err(AnnotateError::Io { .. })));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        assert!(matches!(Annotator::load_font(&path), Err(AnnotateError::InvalidFont { .. })));
    }

    #[test]
    fn test_caption_drawn_with_system_font() {
        let annotator = Annotator::with_system_font();
        if !annotator.has_font() {
            return;
        }
        let frame = RgbImage::from_pixel(200, 120, BACKGROUND);
        let out = annotator.annotate(&frame, &[face(Identity::Known("amy".into()), 20.0, 60.0)]);
        // the caption bar sits above the box
        let bar_pixels = (20..60).filter(|&x| *out.get_pixel(x, 50) != BACKGROUND).count();
        assert!(bar_pixels > 0);
    }
}
