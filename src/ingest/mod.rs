//! Camera capture.
//!
//! This module provides the camera abstraction and the `FrameSource` that
//! drives it:
//! - Synthetic test-pattern camera (tests, hosts without a camera)
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! A `Camera` is the exclusive device handle. It is moved into the capture
//! thread owned by `FrameSource` and handed back only when that thread exits,
//! so nothing else ever touches the device. Dropping a `Camera` releases it.

mod encode;
#[cfg(feature = "camera-v4l2")]
mod normalize;
mod source;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use serde::Deserialize;
use std::time::Duration;

use crate::StreamError;

/// Longest wait between capture ticks, however low the frame rate.
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub use encode::encode_jpeg;
pub use source::{CaptureStats, FrameSource};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Capture parameters for one `FrameSource`.
///
/// Fixed for the lifetime of the source; open a new source to change them.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Numeric camera index (`/dev/video<index>` on Linux).
    pub device_index: u32,
    /// Target capture rate in frames per second. Must be positive.
    pub target_fps: f64,
    /// Preferred frame width. Back-ends may negotiate a different size.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            target_fps: 15.0,
            width: 640,
            height: 480,
            jpeg_quality: 80,
        }
    }
}

impl CaptureConfig {
    pub fn with_device(device_index: u32) -> Self {
        Self {
            device_index,
            ..Self::default()
        }
    }

    /// Time between capture ticks, capped at one hour.
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.target_fps)
            .map(|interval| interval.min(MAX_FRAME_INTERVAL))
            .unwrap_or(MAX_FRAME_INTERVAL)
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(StreamError::device(
                self.device_index,
                format!("target fps must be positive, got {}", self.target_fps),
            ));
        }
        if Duration::try_from_secs_f64(1.0 / self.target_fps).is_err() {
            return Err(StreamError::device(
                self.device_index,
                format!("target fps {} is too low to schedule", self.target_fps),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(StreamError::device(
                self.device_index,
                format!("jpeg quality must be 1..=100, got {}", self.jpeg_quality),
            ));
        }
        Ok(())
    }
}

/// One unencoded (or already JPEG-compressed) capture.
#[derive(Debug)]
pub enum RawImage {
    /// Packed 8-bit RGB, `width * height * 3` bytes.
    Rgb24 {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    /// A complete JPEG produced by the device itself (MJPG cameras).
    Jpeg(Vec<u8>),
}

/// An open camera device.
///
/// `read` returns `TransientCaptureFailure` for a single bad frame and
/// `DeviceUnavailable` once the device is gone for good.
pub trait Camera: Send {
    fn read(&mut self) -> Result<RawImage, StreamError>;

    /// Human-readable device name, for logs.
    fn name(&self) -> &str;
}

/// Claims camera devices.
///
/// Implementations return `TransientCaptureFailure` when a retry may
/// succeed (device busy) and `DeviceUnavailable` otherwise.
pub trait CameraOpener: Send + Sync {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn Camera>, StreamError>;
}

/// Built-in camera back-ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    Synthetic,
    V4l2,
}

impl Default for CameraBackend {
    fn default() -> Self {
        if cfg!(feature = "camera-v4l2") {
            CameraBackend::V4l2
        } else {
            CameraBackend::Synthetic
        }
    }
}

impl std::str::FromStr for CameraBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(CameraBackend::Synthetic),
            "v4l2" => Ok(CameraBackend::V4l2),
            other => Err(anyhow::anyhow!(
                "unknown camera backend '{}'; expected synthetic or v4l2",
                other
            )),
        }
    }
}

impl CameraOpener for CameraBackend {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn Camera>, StreamError> {
        match self {
            CameraBackend::Synthetic => Ok(Box::new(SyntheticCamera::new(config))),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::V4l2 => Ok(Box::new(V4l2Camera::open(config)?)),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::V4l2 => Err(StreamError::device(
                config.device_index,
                "built without camera-v4l2 support",
            )),
        }
    }
}

/// A camera the host exposes, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Enumerate cameras for the presentation layer.
///
/// Falls back to `Camera 0` .. `Camera 4` when nothing can be enumerated, so
/// a user can still pick an index by hand.
pub fn list_cameras() -> Vec<CameraInfo> {
    #[cfg(feature = "camera-v4l2")]
    {
        let found = v4l2::enumerate();
        if !found.is_empty() {
            return found;
        }
    }
    log::debug!("camera enumeration unavailable, offering generic indices");
    (0..5)
        .map(|index| CameraInfo {
            index,
            name: format!("Camera {index}"),
        })
        .collect()
}
