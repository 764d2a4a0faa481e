//! Face alignment: warp a face onto the canonical 112×112 embedding crop using
//! a 4-DOF similarity transform (scale, rotation, translation) fitted to the
//! five keypoints.

use crate::types::Keypoints;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Side length of the aligned crop.
pub const ALIGNED_SIZE: u32 = 112;

/// Canonical keypoint positions inside a 112×112 crop.
pub(crate) const REFERENCE_KEYPOINTS: Keypoints = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Closed-form least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Returns `None` when the source points are all coincident.
    pub fn estimate(src: &Keypoints, dst: &Keypoints) -> Option<Self> {
        let n = src.len() as f32;
        let centroid = |pts: &Keypoints| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (px, py) = (sx - scx, sy - scy);
            let (qx, qy) = (dx - dcx, dy - dcy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }
        if norm < f32::EPSILON {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Row-major 3×3 homogeneous matrix.
    fn matrix(&self) -> [f32; 9] {
        [
            self.a, -self.b, self.tx,
            self.b, self.a, self.ty,
            0.0, 0.0, 1.0,
        ]
    }
}

/// Warp the face described by `keypoints` into a 112×112 crop.
///
/// Pixels that fall outside the source image are black. Degenerate keypoints
/// yield an all-black crop.
pub fn align_face(image: &RgbImage, keypoints: &Keypoints) -> RgbImage {
    let mut out = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);

    let projection = SimilarityTransform::estimate(keypoints, &REFERENCE_KEYPOINTS)
        .and_then(|t| Projection::from_matrix(t.matrix()));
    match projection {
        Some(p) => warp_into(image, &p, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out),
        None => tracing::debug!(?keypoints, "degenerate keypoints; skipping alignment"),
    }
    out
}
