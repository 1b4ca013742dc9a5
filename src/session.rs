//! Session lifecycle.
//!
//! `SessionController` owns at most one running session and moves it through
//! `Idle -> Starting -> Active -> Stopping -> Idle`. Start acquires the
//! network path, then the camera, then the HTTP server; a failure at any step
//! releases what was already acquired, in reverse order, before the error is
//! returned. Stop tears down in the opposite order of start.
//!
//! `start`/`stop` while in the wrong state are no-ops that report the current
//! state. Neither call waits on viewer I/O beyond the server's bounded drain.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::advertise::{build_payload, ConnectionPayload};
use crate::ingest::{CameraOpener, CaptureConfig, CaptureStats, FrameSource};
use crate::network::{NetworkMode, NetworkPath, NetworkProvisioner, ProvisionedNetwork};
use crate::stream::{BroadcastHandle, StreamConfig, StreamServer};
use crate::StreamError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started(ConnectionPayload),
    /// A session is already starting, running or stopping.
    Rejected(SessionState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// No session was active.
    Rejected(SessionState),
}

/// Per-session parameters the caller does not pick at `start` time.
#[derive(Clone, Debug, Default)]
pub struct SessionSettings {
    /// Capture parameters; `device_index` is replaced by the camera passed to
    /// `start`.
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
}

type Observer = Box<dyn Fn(SessionState) + Send + Sync>;

pub struct SessionController {
    settings: SessionSettings,
    provisioner: NetworkProvisioner,
    opener: Arc<dyn CameraOpener>,
    state: Mutex<SessionState>,
    active: Mutex<Option<ActiveSession>>,
    observer: Option<Observer>,
}

struct ActiveSession {
    network: ProvisionedNetwork,
    source: FrameSource,
    server: BroadcastHandle,
    payload: ConnectionPayload,
}

impl ActiveSession {
    fn teardown(&mut self) {
        self.server.stop();
        self.source.close();
        if let Err(err) = self.network.release() {
            log::error!("session: network teardown failed: {}", err);
        }
    }
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        provisioner: NetworkProvisioner,
        opener: Arc<dyn CameraOpener>,
    ) -> Self {
        Self {
            settings,
            provisioner,
            opener,
            state: Mutex::new(SessionState::Idle),
            active: Mutex::new(None),
            observer: None,
        }
    }

    /// Call `observer` on every state change. It runs with the state lock
    /// held and must not call back into the controller.
    pub fn with_observer(
        mut self,
        observer: impl Fn(SessionState) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Whether the hotspot mode can be offered on this host.
    pub fn hotspot_supported(&self) -> bool {
        self.provisioner.hotspot_supported()
    }

    pub fn start(&self, mode: NetworkMode, camera_index: u32) -> Result<StartOutcome, StreamError> {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Idle {
                log::warn!("session: start ignored while {}", *state);
                return Ok(StartOutcome::Rejected(*state));
            }
            self.transition(&mut state, SessionState::Starting);
        }

        log::info!("session: starting ({} mode, camera {})", mode, camera_index);
        match self.acquire(mode, camera_index) {
            Ok(session) => {
                let payload = session.payload.clone();
                *lock(&self.active) = Some(session);
                self.transition(&mut lock(&self.state), SessionState::Active);
                log::info!("session: active at {}", payload.url);
                Ok(StartOutcome::Started(payload))
            }
            Err(err) => {
                log::error!("session: start failed: {}", err);
                self.transition(&mut lock(&self.state), SessionState::Idle);
                Err(err)
            }
        }
    }

    pub fn stop(&self) -> StopOutcome {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Active {
                log::debug!("session: stop ignored while {}", *state);
                return StopOutcome::Rejected(*state);
            }
            self.transition(&mut state, SessionState::Stopping);
        }

        log::info!("session: stopping");
        let session = lock(&self.active).take();
        if let Some(mut session) = session {
            session.teardown();
        }
        self.transition(&mut lock(&self.state), SessionState::Idle);
        log::info!("session: stopped");
        StopOutcome::Stopped
    }

    pub fn payload(&self) -> Option<ConnectionPayload> {
        lock(&self.active).as_ref().map(|s| s.payload.clone())
    }

    pub fn network_path(&self) -> Option<NetworkPath> {
        lock(&self.active).as_ref().map(|s| s.network.path().clone())
    }

    /// Address the stream server is bound to.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        lock(&self.active).as_ref().map(|s| s.server.addr())
    }

    pub fn viewer_count(&self) -> usize {
        lock(&self.active)
            .as_ref()
            .map(|s| s.server.viewer_count())
            .unwrap_or(0)
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        lock(&self.active).as_ref().map(|s| s.source.stats())
    }

    fn acquire(&self, mode: NetworkMode, camera_index: u32) -> Result<ActiveSession, StreamError> {
        let mut network = self.provisioner.resolve(mode, self.settings.stream.port)?;

        let capture = CaptureConfig {
            device_index: camera_index,
            ..self.settings.capture.clone()
        };
        let mut source = match FrameSource::open(capture, self.opener.as_ref()) {
            Ok(source) => source,
            Err(err) => {
                rollback_network(&mut network);
                return Err(err);
            }
        };

        let server = match StreamServer::new(self.settings.stream.clone(), source.buffer()).spawn() {
            Ok(server) => server,
            Err(err) => {
                source.close();
                rollback_network(&mut network);
                return Err(err);
            }
        };

        network.bind_port(server.addr().port());
        let payload = build_payload(network.path(), &self.settings.stream.endpoint);
        Ok(ActiveSession {
            network,
            source,
            server,
            payload,
        })
    }

    fn transition(&self, state: &mut SessionState, to: SessionState) {
        log::debug!("session: {} -> {}", *state, to);
        *state = to;
        if let Some(observer) = &self.observer {
            observer(to);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state() == SessionState::Active {
            self.stop();
        }
    }
}

fn rollback_network(network: &mut ProvisionedNetwork) {
    if let Err(err) = network.release() {
        log::error!("session: network rollback failed: {}", err);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CameraBackend;
    use crate::network::UnsupportedHostedNetwork;
    use std::net::{Ipv4Addr, SocketAddr};

    fn controller() -> SessionController {
        let settings = SessionSettings {
            capture: CaptureConfig {
                width: 32,
                height: 24,
                target_fps: 30.0,
                ..CaptureConfig::default()
            },
            stream: StreamConfig {
                bind_ip: Ipv4Addr::LOCALHOST.into(),
                port: 0,
                ..StreamConfig::default()
            },
        };
        let provisioner = NetworkProvisioner::new(Arc::new(UnsupportedHostedNetwork))
            .with_probe_addr(SocketAddr::from(([127, 0, 0, 1], 9)));
        SessionController::new(settings, provisioner, Arc::new(CameraBackend::Synthetic))
    }

    #[test]
    fn stop_while_idle_is_rejected() {
        let session = controller();
        assert_eq!(session.stop(), StopOutcome::Rejected(SessionState::Idle));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn start_while_active_is_rejected() -> Result<(), StreamError> {
        let session = controller();
        assert!(matches!(
            session.start(NetworkMode::Lan, 0)?,
            StartOutcome::Started(_)
        ));
        assert_eq!(
            session.start(NetworkMode::Lan, 1)?,
            StartOutcome::Rejected(SessionState::Active)
        );
        assert_eq!(session.stop(), StopOutcome::Stopped);
        assert_eq!(session.state(), SessionState::Idle);
        Ok(())
    }

    #[test]
    fn unsupported_hotspot_leaves_session_idle() {
        let session = controller();
        assert!(matches!(
            session.start(NetworkMode::Hotspot, 0),
            Err(StreamError::HotspotUnsupported)
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.payload().is_none());
    }

    #[test]
    fn dropping_an_active_controller_stops_it() -> Result<(), StreamError> {
        let session = controller();
        session.start(NetworkMode::Lan, 0)?;
        let addr = session.stream_addr().expect("bound address");
        drop(session);
        assert!(std::net::TcpStream::connect(addr).is_err());
        Ok(())
    }
}
