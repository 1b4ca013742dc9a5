//! V4L2 camera.
//!
//! Opens `/dev/video<index>`, preferring MJPG so frames can be published
//! without re-encoding. Cameras that only offer raw formats (YUYV, RGB3,
//! NV12) are normalized to RGB and encoded by the capture loop.

use ouroboros::self_referencing;
use std::io;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{Camera, CameraInfo, CaptureConfig, RawImage};
use crate::StreamError;

const BUFFER_COUNT: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireFormat {
    Mjpeg,
    Raw(PixelFormat),
}

pub struct V4l2Camera {
    index: u32,
    name: String,
    state: V4l2State,
    format: WireFormat,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn open(config: &CaptureConfig) -> Result<Self, StreamError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let index = config.device_index;
        let device = v4l::Device::new(index as usize).map_err(|err| open_error(index, err))?;
        let name = device
            .query_caps()
            .map(|caps| caps.card)
            .unwrap_or_else(|_| format!("/dev/video{index}"));

        let mut format = device
            .format()
            .map_err(|err| StreamError::device(index, format!("read v4l2 format: {err}")))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", name, err);
                device.format().map_err(|err| {
                    StreamError::device(index, format!("read v4l2 format after set failure: {err}"))
                })?
            }
        };

        let wire = if &format.fourcc.repr == b"MJPG" {
            WireFormat::Mjpeg
        } else {
            match PixelFormat::from_fourcc(&format.fourcc.repr) {
                Some(pixel) => WireFormat::Raw(pixel),
                None => {
                    return Err(StreamError::device(
                        index,
                        format!("unsupported pixel format {}", format.fourcc),
                    ))
                }
            }
        };

        let fps = config.target_fps.round().max(1.0) as u32;
        let params = v4l::video::capture::Parameters::with_fps(fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Camera: failed to set fps on {}: {}", name, err);
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| open_error(index, err))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{}, {})",
            name,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(Self {
            index,
            name,
            state,
            format: wire,
            width: format.width,
            height: format.height,
        })
    }
}

impl Camera for V4l2Camera {
    fn read(&mut self) -> Result<RawImage, StreamError> {
        use v4l::io::traits::CaptureStream;

        let format = self.format;
        let index = self.index;
        let (width, height) = (self.width, self.height);
        self.state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next().map_err(|err| capture_error(index, err))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used == 0 { buf } else { &buf[..used] };
            match format {
                WireFormat::Mjpeg => Ok(RawImage::Jpeg(data.to_vec())),
                WireFormat::Raw(pixel) => Ok(RawImage::Rgb24 {
                    width,
                    height,
                    pixels: normalize_to_rgb(data, width, height, pixel)?,
                }),
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Enumerate `/dev/video*` capture nodes.
pub(crate) fn enumerate() -> Vec<CameraInfo> {
    let mut cameras: Vec<CameraInfo> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| {
            let index = node.index() as u32;
            CameraInfo {
                index,
                name: node.name().unwrap_or_else(|| format!("Camera {index}")),
            }
        })
        .collect();
    cameras.sort_by_key(|camera| camera.index);
    cameras
}

fn open_error(index: u32, err: io::Error) -> StreamError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            StreamError::device(index, err.to_string())
        }
        // Typically EBUSY while another process still holds the device.
        _ => StreamError::TransientCaptureFailure(format!("open /dev/video{index}: {err}")),
    }
}

fn capture_error(index: u32, err: io::Error) -> StreamError {
    match err.raw_os_error() {
        // ENODEV: the camera was unplugged.
        Some(19) => StreamError::device(index, err.to_string()),
        _ => StreamError::TransientCaptureFailure(err.to_string()),
    }
}
