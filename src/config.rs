use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::ingest::{CameraBackend, CaptureConfig};
use crate::network::{NetworkMode, NetworkProvisioner, DEFAULT_PROBE_ADDR, DEFAULT_SSID_PREFIX};
use crate::session::SessionSettings;
use crate::stream::{StreamConfig, DEFAULT_ENDPOINT, DEFAULT_PORT};

const DEFAULT_CAMERA: u32 = 0;
const DEFAULT_FPS: f64 = 15.0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2_000;
/// SSIDs are limited to 32 bytes and the random suffix takes 4.
const MAX_SSID_PREFIX_LEN: usize = 24;

#[derive(Debug, Deserialize, Default)]
struct WebcastConfigFile {
    server: Option<ServerConfigFile>,
    capture: Option<CaptureConfigFile>,
    network: Option<NetworkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    port: Option<u16>,
    endpoint: Option<String>,
    drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    camera: Option<u32>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
    backend: Option<CameraBackend>,
}

#[derive(Debug, Deserialize, Default)]
struct NetworkConfigFile {
    mode: Option<NetworkMode>,
    ssid_prefix: Option<String>,
    probe_addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebcastConfig {
    pub port: u16,
    pub endpoint: String,
    pub drain_timeout: Duration,
    pub camera: u32,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub backend: CameraBackend,
    pub mode: NetworkMode,
    pub ssid_prefix: String,
    pub probe_addr: SocketAddr,
}

impl WebcastConfig {
    /// Load from the JSON file named by `WEBCAST_CONFIG` (if set), then apply
    /// `WEBCAST_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WEBCAST_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WebcastConfigFile) -> Result<Self> {
        let server = file.server.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let network = file.network.unwrap_or_default();
        let probe_addr = match network.probe_addr.as_deref() {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|e| anyhow!("network.probe_addr must be ip:port: {}", e))?,
            None => DEFAULT_PROBE_ADDR,
        };
        Ok(Self {
            port: server.port.unwrap_or(DEFAULT_PORT),
            endpoint: server
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            drain_timeout: Duration::from_millis(
                server.drain_timeout_ms.unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS),
            ),
            camera: capture.camera.unwrap_or(DEFAULT_CAMERA),
            fps: capture.fps.unwrap_or(DEFAULT_FPS),
            width: capture.width.unwrap_or(DEFAULT_WIDTH),
            height: capture.height.unwrap_or(DEFAULT_HEIGHT),
            jpeg_quality: capture.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            backend: capture.backend.unwrap_or_default(),
            mode: network.mode.unwrap_or(NetworkMode::Lan),
            ssid_prefix: network
                .ssid_prefix
                .unwrap_or_else(|| DEFAULT_SSID_PREFIX.to_string()),
            probe_addr,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_value("WEBCAST_PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow!("WEBCAST_PORT must be a TCP port number"))?;
        }
        if let Some(camera) = env_value("WEBCAST_CAMERA") {
            self.camera = camera
                .parse()
                .map_err(|_| anyhow!("WEBCAST_CAMERA must be a non-negative camera index"))?;
        }
        if let Some(fps) = env_value("WEBCAST_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| anyhow!("WEBCAST_FPS must be a number"))?;
        }
        if let Some(mode) = env_value("WEBCAST_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(backend) = env_value("WEBCAST_CAMERA_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(prefix) = env_value("WEBCAST_SSID_PREFIX") {
            self.ssid_prefix = prefix;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        self.endpoint = self.endpoint.trim().trim_start_matches('/').to_string();
        if self.endpoint.is_empty() {
            return Err(anyhow!("stream endpoint must not be empty"));
        }
        if self.ssid_prefix.len() > MAX_SSID_PREFIX_LEN {
            return Err(anyhow!(
                "ssid prefix must be at most {} bytes",
                MAX_SSID_PREFIX_LEN
            ));
        }
        Ok(())
    }

    /// Session parameters for `SessionController`.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            capture: CaptureConfig {
                device_index: self.camera,
                target_fps: self.fps,
                width: self.width,
                height: self.height,
                jpeg_quality: self.jpeg_quality,
            },
            stream: StreamConfig {
                port: self.port,
                endpoint: self.endpoint.clone(),
                drain_timeout: self.drain_timeout,
                ..StreamConfig::default()
            },
        }
    }

    /// Provisioner for this host's hosted-network facility.
    pub fn provisioner(&self) -> NetworkProvisioner {
        NetworkProvisioner::for_platform()
            .with_probe_addr(self.probe_addr)
            .with_ssid_prefix(self.ssid_prefix.clone())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<WebcastConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
