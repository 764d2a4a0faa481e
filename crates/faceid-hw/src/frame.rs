//! Captured frames and pixel-format conversion to RGB.

use image::RgbImage;
use std::time::Instant;
use thiserror::Error;

/// A captured color camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid {format} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YCbCr to RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

/// Convert packed YUYV 4:2:2 to RGB.
///
/// Every 4 bytes `[Y0, U, Y1, V]` describe two horizontally adjacent pixels
/// sharing one chroma sample.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("YUYV", yuyv, pixels * 2)?;

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    // odd total pixel count leaves a trailing half pair
    if pixels % 2 == 1 {
        let tail = &yuyv[(pixels - 1) * 2..pixels * 2];
        rgb.extend_from_slice(&ycbcr_to_rgb(tail[0], tail[1], 128));
    }

    Ok(to_image(rgb, width, height))
}

/// Replicate 8-bit grayscale into three channels.
pub fn gray_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", gray, pixels)?;
    let rgb = gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect();
    Ok(to_image(rgb, width, height))
}

/// Packed 24-bit RGB, copied as-is.
pub fn rgb24_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let bytes = (width * height * 3) as usize;
    check_len("RGB3", buf, bytes)?;
    Ok(to_image(buf[..bytes].to_vec(), width, height))
}

fn to_image(rgb: Vec<u8>, width: u32, height: u32) -> RgbImage {
    // length was checked by the caller
    RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height))
}
