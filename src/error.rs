use thiserror::Error;

/// Errors surfaced by the capture-and-stream core.
///
/// Only `DeviceUnavailable`, `HotspotUnsupported`, `HotspotCreateFailed` and
/// `ServerBind` are fatal to a session start. The remaining variants are
/// handled where they occur and only escape for logging.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("camera {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },

    #[error("frame capture failed: {0}")]
    TransientCaptureFailure(String),

    #[error("jpeg encoding failed: {0}")]
    Encode(String),

    #[error("hosted network not supported on this host")]
    HotspotUnsupported,

    #[error("hosted network creation failed: {0}")]
    HotspotCreateFailed(String),

    #[error("hosted network teardown failed: {0}")]
    HotspotTeardownFailed(String),

    #[error("viewer disconnected")]
    ViewerDisconnected,

    #[error("no network interface available: {0}")]
    NetworkUnresolvable(String),

    #[error("failed to bind stream server on {addr}: {source}")]
    ServerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    pub(crate) fn device(index: u32, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            index,
            reason: reason.into(),
        }
    }

    /// Whether the capture loop may skip this error and keep running.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::TransientCaptureFailure(_) | StreamError::Encode(_)
        )
    }
}
