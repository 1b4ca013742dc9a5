//! Webcam Cast
//!
//! Streams a local camera to browsers on the same network as an MJPEG
//! (`multipart/x-mixed-replace`) feed, either over an existing LAN or over an
//! access point the host creates itself.
//!
//! # Architecture
//!
//! - `ingest`: camera back-ends and the `FrameSource` capture thread
//! - `frame`: the single-slot latest-frame buffer shared with viewers
//! - `stream`: HTTP broadcaster, one thread per viewer
//! - `network`: LAN address resolution and hosted-network control
//! - `advertise`: URL / Wi-Fi join payloads for QR codes
//! - `session`: start/stop orchestration with full rollback
//! - `config`: file + environment configuration for the binaries

pub mod advertise;
pub mod config;
mod error;
pub mod frame;
pub mod ingest;
pub mod network;
pub mod session;
pub mod stream;

pub use advertise::{build_payload, ConnectionPayload, WifiCredentials};
pub use error::StreamError;
pub use frame::{Frame, FrameBuffer};
pub use ingest::{
    list_cameras, Camera, CameraBackend, CameraInfo, CameraOpener, CaptureConfig, CaptureStats,
    FrameSource, RawImage,
};
pub use network::{HostedNetwork, NetworkMode, NetworkPath, NetworkProvisioner, ProvisionedNetwork};
pub use session::{SessionController, SessionSettings, SessionState, StartOutcome, StopOutcome};
pub use stream::{BroadcastHandle, StreamConfig, StreamServer};
