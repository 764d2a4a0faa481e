//! faceid-hw — V4L2 camera capture to RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, LiveStream, PixelFormat, Resolution};
pub use frame::Frame;
