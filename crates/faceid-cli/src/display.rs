//! Adapters between the identification loop and the outside world: the V4L2
//! stream as a frame source, and a preview image file plus terminal keys as
//! the display surface.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use faceid_core::pipeline::{DisplayError, FrameAcquisitionError};
use faceid_core::{DisplaySurface, Frame, FrameSource, KeyPress};
use faceid_hw::LiveStream;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Frames from a running camera stream.
pub struct CameraSource<'a> {
    stream: LiveStream<'a>,
}

impl<'a> CameraSource<'a> {
    pub fn new(stream: LiveStream<'a>) -> Self {
        Self { stream }
    }
}

impl FrameSource for CameraSource<'_> {
    fn next_frame(&mut self) -> Result<Frame, FrameAcquisitionError> {
        let frame = self
            .stream
            .next_frame()
            .map_err(|e| FrameAcquisitionError::Device(e.to_string()))?;
        Ok(Frame {
            image: frame.image,
            sequence: frame.sequence,
        })
    }
}

/// Writes each annotated frame to an image file and polls the terminal for a
/// key press.
///
/// Raw mode is enabled only when stdin is a terminal and is restored on drop.
pub struct PreviewDisplay {
    path: PathBuf,
    staging: PathBuf,
    format: ImageFormat,
    interactive: bool,
}

impl PreviewDisplay {
    pub fn new(path: &Path, interactive: bool) -> Result<Self, DisplayError> {
        let format = ImageFormat::from_path(path)
            .map_err(|e| DisplayError(format!("{}: {e}", path.display())))?;

        let interactive = interactive && std::io::stdin().is_tty();
        if interactive {
            enable_raw_mode().map_err(|e| DisplayError(format!("enabling raw mode: {e}")))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "preview".to_string());
        let staging = path.with_file_name(format!(".{file_name}.partial"));

        tracing::info!(path = %path.display(), interactive, "preview display ready");
        Ok(Self {
            path: path.to_path_buf(),
            staging,
            format,
            interactive,
        })
    }

    fn write_frame(&self, frame: &RgbImage) -> Result<(), DisplayError> {
        frame
            .save_with_format(&self.staging, self.format)
            .map_err(|e| DisplayError(format!("{}: {e}", self.staging.display())))?;
        std::fs::rename(&self.staging, &self.path)
            .map_err(|e| DisplayError(format!("{}: {e}", self.path.display())))
    }

    fn poll_key(&self) -> Result<Option<KeyPress>, DisplayError> {
        if !self.interactive {
            return Ok(None);
        }
        let to_err = |e: std::io::Error| DisplayError(format!("reading terminal: {e}"));
        while event::poll(Duration::ZERO).map_err(to_err)? {
            if let Event::Key(key) = event::read().map_err(to_err)? {
                if let Some(press) = map_key(key) {
                    return Ok(Some(press));
                }
            }
        }
        Ok(None)
    }
}

impl DisplaySurface for PreviewDisplay {
    fn present(&mut self, frame: &RgbImage) -> Result<Option<KeyPress>, DisplayError> {
        self.write_frame(frame)?;
        self.poll_key()
    }
}

impl Drop for PreviewDisplay {
    fn drop(&mut self) {
        if self.interactive {
            let _ = disable_raw_mode();
        }
    }
}

fn map_key(key: KeyEvent) -> Option<KeyPress> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(KeyPress::Interrupt),
        KeyCode::Char(c) => Some(KeyPress::Char(c)),
        KeyCode::Esc => Some(KeyPress::Escape),
        _ => None,
    }
}
